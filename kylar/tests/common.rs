#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use kylar::{
    build_repository, Action, BuildOptions, BuildStatistics, Compression, FeatureDescription,
    FileDescription, Index, Installer, OpenMode, PropertyValue, RepositoryDescriptor,
    RepositoryLayout, RepositoryOptions, RepositoryProperty, ValidationResult, API_VERSION_2_0,
};

pub const FEATURE_X: Uuid = Uuid::from_u128(1);
pub const FEATURE_Y: Uuid = Uuid::from_u128(2);
pub const FILE_A: Uuid = Uuid::from_u128(0x10);
pub const FILE_B: Uuid = Uuid::from_u128(0x11);
pub const FILE_C: Uuid = Uuid::from_u128(0x12);

pub fn write_file(root: &Path, name: &str, contents: &[u8]) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

pub fn file_description(source: &str, id: Uuid) -> FileDescription {
    FileDescription {
        source: source.to_owned(),
        target: None,
        id: Some(id),
    }
}

pub fn feature_description(id: Uuid, references: Vec<Uuid>) -> FeatureDescription {
    FeatureDescription {
        id,
        references,
        ..Default::default()
    }
}

/// Two features, each owning one file with the same "hello" bytes.
pub fn two_feature_descriptor() -> RepositoryDescriptor {
    RepositoryDescriptor {
        features: vec![
            feature_description(FEATURE_X, vec![FILE_A]),
            feature_description(FEATURE_Y, vec![FILE_B]),
        ],
        files: vec![
            file_description("a.txt", FILE_A),
            file_description("b.txt", FILE_B),
        ],
        ..Default::default()
    }
}

pub fn build(
    descriptor: &RepositoryDescriptor,
    layout: RepositoryLayout,
    source_directory: &Path,
    target_directory: &Path,
    compression: Compression,
) -> BuildStatistics {
    let mut options = BuildOptions::new(layout, source_directory, target_directory);
    options.compression = compression;
    build_repository(descriptor, &options).unwrap()
}

pub fn install(
    source_location: &str,
    target_directory: &Path,
    desired: &[Uuid],
    key: Option<&str>,
) -> Result<(), kylar::Error> {
    run_action(Action::Install, source_location, target_directory, Some(desired), key)
}

pub fn configure(
    source_location: &str,
    target_directory: &Path,
    desired: &[Uuid],
    key: Option<&str>,
) -> Result<(), kylar::Error> {
    run_action(
        Action::Configure,
        source_location,
        target_directory,
        Some(desired),
        key,
    )
}

pub fn repair(
    source_location: &str,
    target_directory: &Path,
    key: Option<&str>,
) -> Result<(), kylar::Error> {
    run_action(Action::Repair, source_location, target_directory, None, key)
}

fn run_action(
    action: Action,
    source_location: &str,
    target_directory: &Path,
    desired: Option<&[Uuid]>,
    key: Option<&str>,
) -> Result<(), kylar::Error> {
    let mut installer = Installer::new(API_VERSION_2_0)?;
    let mut source =
        installer.open_source_repository(source_location, RepositoryOptions::default())?;
    if let Some(key) = key {
        installer.set_repository_property(
            &mut source,
            RepositoryProperty::DecryptionKey,
            PropertyValue::Bytes(key.as_bytes().to_vec()),
        )?;
    }
    let mut target = installer.open_target_repository(
        &target_directory.to_string_lossy(),
        RepositoryOptions {
            create: action == Action::Install,
            read_only: false,
        },
    )?;
    installer.execute(action, &mut target, Some(&mut source), desired)
}

/// Validate a target through the installer callback, returning
/// `(file name, result)` pairs.
pub fn verify(target_directory: &Path) -> Vec<(String, ValidationResult)> {
    let mut installer = Installer::new(API_VERSION_2_0).unwrap();
    let reports = Arc::new(Mutex::new(Vec::new()));
    {
        let reports = reports.clone();
        installer.set_validation_callback(Box::new(move |result, name| {
            reports.lock().unwrap().push((name.to_owned(), result));
        }));
    }
    let mut target = installer
        .open_target_repository(
            &target_directory.to_string_lossy(),
            RepositoryOptions {
                create: false,
                read_only: true,
            },
        )
        .unwrap();
    installer
        .execute(Action::Verify, &mut target, None, None)
        .unwrap();
    let reports = reports.lock().unwrap().clone();
    reports
}

pub fn open_index(path: &Path) -> Index {
    Index::open(path, OpenMode::Read).unwrap()
}

pub fn count_rows(index_path: &Path, table: &str) -> i64 {
    let index = open_index(index_path);
    let count = index
        .connection()
        .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })
        .unwrap();
    count
}

pub fn leaked_contents(index_path: &Path) -> i64 {
    let index = open_index(index_path);
    let count = index
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM fs_contents_with_reference_count WHERE ReferenceCount = 0",
            [],
            |row| row.get(0),
        )
        .unwrap();
    count
}

/// Sorted `(path, content hex digest)` pairs of a deployed target's index.
pub fn indexed_files(target_directory: &Path) -> Vec<(String, String)> {
    let index = open_index(&target_directory.join("k.db"));
    let mut stmt = index
        .connection()
        .prepare(
            "SELECT fs_files.Path, fs_contents.Hash FROM fs_files
             INNER JOIN fs_contents ON fs_files.ContentId = fs_contents.Id
             ORDER BY fs_files.Path",
        )
        .unwrap();
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })
        .unwrap();
    let files = rows
        .map(|row| {
            let (path, hash) = row.unwrap();
            (path, hex::encode(hash))
        })
        .collect();
    drop(stmt);
    files
}

pub fn file_digest(path: &Path) -> String {
    kylar::HashSum::sha256_file(path).unwrap().to_string()
}
