//! Credential store caching behavior.
//!
//! A cache hit must be observable as zero creation-backend invocations:
//! these tests run without openssl or powershell being exercised at all,
//! so any backend call would fail loudly.

use signforge::certs::{CertificateBackend, CertificateStore};
use std::fs;

#[tokio::test]
async fn cache_hit_returns_the_pair_unchanged() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store_dir = dir.path().join("certs");
    fs::create_dir(&store_dir).expect("store dir");
    fs::write(store_dir.join("Acme.pfx"), b"private-container").expect("pfx");
    fs::write(store_dir.join("Acme.cer"), b"public-container").expect("cer");

    let store = CertificateStore::new(&store_dir);
    let credential = store
        .get_or_create("Acme", "secret", CertificateBackend::Portable)
        .await
        .expect("cache hit");

    assert_eq!(credential.name, "Acme");
    assert_eq!(credential.pfx, store_dir.join("Acme.pfx"));
    assert_eq!(credential.cer.as_deref(), Some(store_dir.join("Acme.cer").as_path()));
    // Containers are returned as-is, never regenerated under the same name
    assert_eq!(fs::read(&credential.pfx).expect("pfx bytes"), b"private-container");
    assert_eq!(
        fs::read(store_dir.join("Acme.cer")).expect("cer bytes"),
        b"public-container"
    );
}

#[cfg(not(windows))]
#[tokio::test]
async fn half_present_pair_is_a_cache_miss() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store_dir = dir.path().join("certs");
    fs::create_dir(&store_dir).expect("store dir");
    // Private container without its public sibling: not a valid cached pair,
    // so the backend runs; with no openssl reachable under this name the
    // creation must surface as a credential error, not a silent reuse.
    fs::write(store_dir.join("Lone.pfx"), b"private-container").expect("pfx");

    let store = CertificateStore::new(&store_dir);
    let result = store
        .get_or_create("Lone", "secret", CertificateBackend::Native)
        .await;
    assert!(matches!(
        result,
        Err(signforge::PipelineError::CredentialCreation { .. })
    ));
}

#[tokio::test]
async fn listing_enumerates_private_containers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store_dir = dir.path().join("certs");
    fs::create_dir(&store_dir).expect("store dir");
    fs::write(store_dir.join("Beta.pfx"), b"x").expect("pfx");
    fs::write(store_dir.join("Alpha.pfx"), b"x").expect("pfx");
    fs::write(store_dir.join("Alpha.cer"), b"x").expect("cer");
    fs::write(store_dir.join("notes.txt"), b"x").expect("noise");

    let store = CertificateStore::new(&store_dir);
    let credentials = store.list_available().await.expect("list");

    let names: Vec<&str> = credentials.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["Alpha", "Beta"]);
    assert!(credentials[0].cer.is_some());
    assert!(credentials[1].cer.is_none());
}

#[tokio::test]
async fn empty_store_lists_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CertificateStore::new(dir.path().join("never-created"));
    assert!(store.list_available().await.expect("list").is_empty());
}
