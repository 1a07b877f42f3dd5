//! Signing failure containment.
//!
//! A failed signing backend must leave the original artifact byte-for-byte
//! unchanged and must not leave temp siblings behind.

use signforge::signing::{Signer, SigningBackend};
use std::fs;

#[tokio::test]
async fn failed_backend_leaves_the_artifact_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let artifact = dir.path().join("MyTool.exe");
    fs::write(&artifact, b"unsigned-bytes").expect("artifact");
    let pfx = dir.path().join("Acme.pfx");
    fs::write(&pfx, b"container").expect("pfx");

    // Empty tool dir: the backend binary is missing, so the invocation fails
    // before any output can be produced.
    let tool_dir = dir.path().join("tools");
    fs::create_dir(&tool_dir).expect("tool dir");

    let signer = Signer::new();
    let backend = SigningBackend::Osslsigncode {
        tool_dir: tool_dir.clone(),
    };
    let result = signer
        .sign(&backend, &artifact, &pfx, "secret", "MyTool")
        .await;

    assert!(result.is_err());
    assert_eq!(fs::read(&artifact).expect("artifact bytes"), b"unsigned-bytes");
    assert!(!dir.path().join("MyTool.exe.signed").exists());
}

#[tokio::test]
async fn missing_credential_fails_before_invoking_any_backend() {
    let dir = tempfile::tempdir().expect("tempdir");
    let artifact = dir.path().join("MyTool.exe");
    fs::write(&artifact, b"unsigned-bytes").expect("artifact");

    let signer = Signer::new();
    let backend = SigningBackend::OsNative;
    let result = signer
        .sign(
            &backend,
            &artifact,
            &dir.path().join("absent.pfx"),
            "secret",
            "MyTool",
        )
        .await;

    assert!(matches!(
        result,
        Err(signforge::PipelineError::CredentialNotFound(_))
    ));
    assert_eq!(fs::read(&artifact).expect("artifact bytes"), b"unsigned-bytes");
}
