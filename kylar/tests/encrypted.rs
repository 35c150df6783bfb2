mod common;

use common::*;
use kylar::{
    Compression, Error, Installer, PropertyValue, RepositoryDescriptor, RepositoryLayout,
    RepositoryOptions, RepositoryProperty, ValidationResult, API_VERSION_2_0,
};

fn encrypted_repo(
    source: &std::path::Path,
    repo: &std::path::Path,
    passphrase: &str,
) -> String {
    write_file(source, "secret.bin", &[0xabu8; 50_000]);
    let descriptor = RepositoryDescriptor {
        features: vec![feature_description(FEATURE_X, vec![FILE_A])],
        files: vec![file_description("secret.bin", FILE_A)],
        encryption_key: Some(passphrase.to_owned()),
        ..Default::default()
    };
    build(
        &descriptor,
        RepositoryLayout::Packed,
        source,
        repo,
        Compression::Brotli(kylar::DEFAULT_BROTLI_QUALITY),
    );
    repo.to_string_lossy().into_owned()
}

#[test]
fn encrypted_repository_reports_the_property() {
    let source = tempfile::tempdir().unwrap();
    let repo = tempfile::tempdir().unwrap();
    let repo_location = encrypted_repo(source.path(), repo.path(), "pw");

    let installer = Installer::new(API_VERSION_2_0).unwrap();
    let handle = installer
        .open_source_repository(&repo_location, RepositoryOptions::default())
        .unwrap();
    assert_eq!(
        installer
            .get_repository_property(&handle, RepositoryProperty::IsEncrypted)
            .unwrap(),
        PropertyValue::Int(1)
    );
}

#[test]
fn install_without_key_fails_before_writing_files() {
    let source = tempfile::tempdir().unwrap();
    let repo = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    let repo_location = encrypted_repo(source.path(), repo.path(), "pw");

    let result = install(&repo_location, target.path(), &[FEATURE_X], None);
    assert!(matches!(result, Err(Error::AuthRequired)));
    assert!(!target.path().join("secret.bin").exists());
}

#[test]
fn install_with_the_right_key_succeeds() {
    let source = tempfile::tempdir().unwrap();
    let repo = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    let repo_location = encrypted_repo(source.path(), repo.path(), "pw");

    install(&repo_location, target.path(), &[FEATURE_X], Some("pw")).unwrap();

    assert_eq!(
        std::fs::read(target.path().join("secret.bin")).unwrap(),
        vec![0xabu8; 50_000]
    );
    let reports = verify(target.path());
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].1, ValidationResult::Ok);
}

#[test]
fn install_with_a_wrong_key_reports_corruption() {
    let source = tempfile::tempdir().unwrap();
    let repo = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    let repo_location = encrypted_repo(source.path(), repo.path(), "pw");

    let result = install(&repo_location, target.path(), &[FEATURE_X], Some("wrong"));
    assert!(matches!(result, Err(Error::StorageCorrupted(_))));
    assert!(!target.path().join("secret.bin").exists());
}
