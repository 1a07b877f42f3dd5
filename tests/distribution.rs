//! Distribution package assembly.

use signforge::build::BuildArtifact;
use signforge::certs::Credential;
use signforge::package;
use std::fs;

#[tokio::test]
async fn distribution_contains_trust_materials_and_instructions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let dist = dir.path().join("dist");
    fs::create_dir(&dist).expect("dist dir");
    let artifact_path = dist.join("MyTool.exe");
    fs::write(&artifact_path, b"signed-bytes").expect("artifact");

    let store = dir.path().join("certs");
    fs::create_dir(&store).expect("store");
    let cer = store.join("Acme.cer");
    fs::write(&cer, b"public-container").expect("cer");

    let artifact = BuildArtifact {
        path: artifact_path.clone(),
        app_name: "MyTool".to_string(),
    };
    let credential = Credential {
        name: "Acme".to_string(),
        pfx: store.join("Acme.pfx"),
        cer: Some(cer),
    };

    let pkg = package::assemble_distribution(&dist, &artifact, &credential)
        .await
        .expect("assemble");

    assert_eq!(pkg.artifact, artifact_path);
    assert_eq!(pkg.cer.as_deref(), Some(dist.join("Acme.cer").as_path()));
    assert_eq!(
        fs::read(dist.join("Acme.cer")).expect("cer copy"),
        b"public-container"
    );

    let script = fs::read_to_string(dist.join("install_cert.bat")).expect("script");
    assert!(script.contains("certutil -addstore -f \"TrustedPeople\" \"%~dp0Acme.cer\""));
    assert!(script.contains("certutil -addstore -f \"Root\" \"%~dp0Acme.cer\""));

    let readme = fs::read_to_string(dist.join("README.txt")).expect("readme");
    assert!(readme.contains("MyTool.exe"));
    assert!(readme.contains("install_cert.bat"));
}

#[tokio::test]
async fn missing_public_container_skips_trust_materials() {
    let dir = tempfile::tempdir().expect("tempdir");
    let dist = dir.path().join("dist");
    fs::create_dir(&dist).expect("dist dir");
    let artifact_path = dist.join("MyTool");
    fs::write(&artifact_path, b"signed-bytes").expect("artifact");

    let artifact = BuildArtifact {
        path: artifact_path,
        app_name: "MyTool".to_string(),
    };
    let credential = Credential {
        name: "External".to_string(),
        pfx: dir.path().join("External.pfx"),
        cer: None,
    };

    let pkg = package::assemble_distribution(&dist, &artifact, &credential)
        .await
        .expect("assemble");

    assert!(pkg.cer.is_none());
    assert!(!dist.join("install_cert.bat").exists());
    assert!(dist.join("README.txt").exists());
}
