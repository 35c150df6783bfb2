mod common;

use common::*;
use kylar::{
    Compression, Error, Log, OpenMode, Repository, RepositoryDescriptor, RepositoryLayout,
    ValidationResult,
};
use std::io::{Read, Seek, SeekFrom, Write};

fn three_file_descriptor() -> RepositoryDescriptor {
    RepositoryDescriptor {
        features: vec![feature_description(FEATURE_X, vec![FILE_A, FILE_B, FILE_C])],
        files: vec![
            file_description("one.bin", FILE_A),
            file_description("two.bin", FILE_B),
            file_description("three.bin", FILE_C),
        ],
        ..Default::default()
    }
}

fn build_and_install(
    source: &std::path::Path,
    repo: &std::path::Path,
    target: &std::path::Path,
) -> String {
    write_file(source, "one.bin", b"the first file");
    write_file(source, "two.bin", &[7u8; 4096]);
    write_file(source, "three.bin", b"");

    build(
        &three_file_descriptor(),
        RepositoryLayout::Packed,
        source,
        repo,
        Compression::Brotli(kylar::DEFAULT_BROTLI_QUALITY),
    );
    let repo_location = repo.to_string_lossy().into_owned();
    install(&repo_location, target, &[FEATURE_X], None).unwrap();
    repo_location
}

// ============================================================================
// Verify
// ============================================================================
#[test]
fn verify_after_install_reports_all_ok() {
    let source = tempfile::tempdir().unwrap();
    let repo = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    build_and_install(source.path(), repo.path(), target.path());

    let reports = verify(target.path());
    assert_eq!(reports.len(), 3);
    assert!(reports
        .iter()
        .all(|(_, result)| *result == ValidationResult::Ok));
}

#[test]
fn a_single_flipped_byte_is_detected() {
    let source = tempfile::tempdir().unwrap();
    let repo = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    build_and_install(source.path(), repo.path(), target.path());

    let victim = target.path().join("two.bin");
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&victim)
        .unwrap();
    file.seek(SeekFrom::Start(100)).unwrap();
    let mut byte = [0u8; 1];
    file.read_exact(&mut byte).unwrap();
    file.seek(SeekFrom::Start(100)).unwrap();
    file.write_all(&[byte[0] ^ 0xff]).unwrap();
    drop(file);

    let reports = verify(target.path());
    for (name, result) in &reports {
        if name == "two.bin" {
            assert_eq!(*result, ValidationResult::Corrupted);
        } else {
            assert_eq!(*result, ValidationResult::Ok);
        }
    }
}

#[test]
fn size_change_and_removal_are_detected() {
    let source = tempfile::tempdir().unwrap();
    let repo = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    build_and_install(source.path(), repo.path(), target.path());

    std::fs::remove_file(target.path().join("one.bin")).unwrap();
    let truncated = std::fs::OpenOptions::new()
        .write(true)
        .open(target.path().join("two.bin"))
        .unwrap();
    truncated.set_len(17).unwrap();
    drop(truncated);

    let mut reports = verify(target.path());
    reports.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        reports,
        vec![
            ("one.bin".to_owned(), ValidationResult::Missing),
            ("three.bin".to_owned(), ValidationResult::Ok),
            ("two.bin".to_owned(), ValidationResult::Corrupted),
        ]
    );
}

// ============================================================================
// Repair
// ============================================================================
#[test]
fn repair_restores_a_damaged_target() {
    let source = tempfile::tempdir().unwrap();
    let repo = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    let repo_location = build_and_install(source.path(), repo.path(), target.path());

    std::fs::remove_file(target.path().join("one.bin")).unwrap();
    std::fs::write(target.path().join("two.bin"), b"vandalised").unwrap();

    repair(&repo_location, target.path(), None).unwrap();

    let reports = verify(target.path());
    assert_eq!(reports.len(), 3);
    assert!(reports
        .iter()
        .all(|(_, result)| *result == ValidationResult::Ok));
    assert_eq!(
        std::fs::read(target.path().join("one.bin")).unwrap(),
        b"the first file"
    );
}

#[test]
fn loose_repository_can_be_repaired() {
    let source = tempfile::tempdir().unwrap();
    let loose = tempfile::tempdir().unwrap();
    let packed = tempfile::tempdir().unwrap();
    write_file(source.path(), "one.bin", b"the first file");
    write_file(source.path(), "two.bin", &[7u8; 4096]);
    write_file(source.path(), "three.bin", b"");

    build(
        &three_file_descriptor(),
        RepositoryLayout::Loose,
        source.path(),
        loose.path(),
        Compression::None,
    );
    build(
        &three_file_descriptor(),
        RepositoryLayout::Packed,
        source.path(),
        packed.path(),
        Compression::Brotli(kylar::DEFAULT_BROTLI_QUALITY),
    );

    // Damage one object, remove another
    let objects = loose.path().join(".ky/objects");
    let mut entries: Vec<_> = std::fs::read_dir(&objects)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    entries.sort();
    std::fs::write(&entries[0], b"garbage").unwrap();
    std::fs::remove_file(&entries[1]).unwrap();

    let mut target =
        Repository::open(&loose.path().to_string_lossy(), OpenMode::Read).unwrap();
    let mut repair_source =
        Repository::open(&packed.path().to_string_lossy(), OpenMode::Read).unwrap();
    target
        .repair(&mut repair_source, None, &Log::default())
        .unwrap();

    let mut results = Vec::new();
    target
        .validate(None, &mut |_hash, _name, result| results.push(result))
        .unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|result| *result == ValidationResult::Ok));
}

// ============================================================================
// Pipeline corruption propagation
// ============================================================================
#[test]
fn a_corrupted_chunk_fails_the_install() {
    let source = tempfile::tempdir().unwrap();
    let repo = tempfile::tempdir().unwrap();
    let target = tempfile::tempdir().unwrap();
    write_file(source.path(), "data.bin", &[42u8; 100_000]);

    let descriptor = RepositoryDescriptor {
        features: vec![feature_description(FEATURE_X, vec![FILE_A])],
        files: vec![file_description("data.bin", FILE_A)],
        ..Default::default()
    };
    build(
        &descriptor,
        RepositoryLayout::Packed,
        source.path(),
        repo.path(),
        Compression::Brotli(kylar::DEFAULT_BROTLI_QUALITY),
    );

    // Flip one byte inside the chunk's stored bytes
    let index = open_index(&repo.path().join("repository.db"));
    let (offset, size): (i64, i64) = index
        .connection()
        .query_row(
            "SELECT PackageOffset, PackageSize FROM fs_chunks LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    drop(index);
    let package_path = repo.path().join("main.kypkg");
    let mut package = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&package_path)
        .unwrap();
    package
        .seek(SeekFrom::Start((offset + size / 2) as u64))
        .unwrap();
    let mut byte = [0u8; 1];
    package.read_exact(&mut byte).unwrap();
    package
        .seek(SeekFrom::Start((offset + size / 2) as u64))
        .unwrap();
    package.write_all(&[byte[0] ^ 0xff]).unwrap();
    drop(package);

    let result = install(
        &repo.path().to_string_lossy(),
        target.path(),
        &[FEATURE_X],
        None,
    );
    assert!(matches!(result, Err(Error::StorageCorrupted(_))));
    // The failed content never made it into the index
    assert_eq!(count_rows(&target.path().join("k.db"), "fs_contents"), 0);
    assert_eq!(count_rows(&target.path().join("k.db"), "fs_files"), 0);
}
