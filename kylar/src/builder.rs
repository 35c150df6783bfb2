use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::catalog::{self, BuildIndex, RELATION_REQUIRES};
use crate::compression::Compression;
use crate::encryption::{Encryptor, ENCRYPTION_ALGORITHM_ID};
use crate::file_io;
use crate::index::Index;
use crate::loose::KY_DIRECTORY;
use crate::package;
use crate::{Error, HashSum};

/// Default maximum uncompressed bytes per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 4 << 20;

/// Which of the three layouts to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryLayout {
    Loose,
    Packed,
    Deployed,
}

/// A feature node: a user-selectable unit referencing files and groups,
/// optionally carrying child features and dependencies on other features.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureDescription {
    pub id: Uuid,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub references: Vec<Uuid>,
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    #[serde(default)]
    pub children: Vec<FeatureDescription>,
}

/// A single file: where to read it from, where it lands in the target, and
/// an optional id so features, groups and packages can reference it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDescription {
    pub source: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub id: Option<Uuid>,
}

/// A named collection of files, referenced as one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDescription {
    pub id: Uuid,
    #[serde(default)]
    pub files: Vec<FileDescription>,
}

/// An explicitly declared package and the objects it collects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageDescription {
    pub name: String,
    #[serde(default)]
    pub references: Vec<Uuid>,
}

/// The human-authored description of a repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    #[serde(default)]
    pub features: Vec<FeatureDescription>,
    #[serde(default)]
    pub files: Vec<FileDescription>,
    #[serde(default)]
    pub groups: Vec<GroupDescription>,
    #[serde(default)]
    pub packages: Vec<PackageDescription>,
    #[serde(default)]
    pub encryption_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub layout: RepositoryLayout,
    pub source_directory: PathBuf,
    pub target_directory: PathBuf,
    pub compression: Compression,
    pub chunk_size: usize,
}

impl BuildOptions {
    pub fn new(layout: RepositoryLayout, source_directory: &Path, target_directory: &Path) -> Self {
        Self {
            layout,
            source_directory: source_directory.to_owned(),
            target_directory: target_directory.to_owned(),
            compression: Compression::Brotli(crate::compression::DEFAULT_BROTLI_QUALITY),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildStatistics {
    pub stored_uncompressed: u64,
    pub stored_compressed: u64,
}

impl BuildStatistics {
    pub fn compression_ratio(&self) -> f64 {
        if self.stored_compressed == 0 {
            return 1.0;
        }
        self.stored_uncompressed as f64 / self.stored_compressed as f64
    }
}

// The object model the descriptor is lowered into before persisting.

#[derive(Clone, Copy)]
enum ObjectRef {
    Feature(usize),
    Group(usize),
    File(usize),
}

struct FeatureEntry {
    uuid: Uuid,
    references: Vec<Uuid>,
    dependencies: Vec<Uuid>,
    db_id: i64,
}

struct GroupEntry {
    files: Vec<usize>,
}

struct FileEntry {
    source: PathBuf,
    target: String,
    content_index: usize,
    feature_id: Option<i64>,
    package: Option<usize>,
}

struct ContentEntry {
    hash: HashSum,
    size: u64,
    source: PathBuf,
    db_id: i64,
}

struct PackageEntry {
    filename: String,
    references: Vec<Uuid>,
    files: Vec<usize>,
    db_id: i64,
}

/// Build a repository in the requested layout from a descriptor.
pub fn build_repository(
    descriptor: &RepositoryDescriptor,
    options: &BuildOptions,
) -> Result<BuildStatistics, Error> {
    std::fs::create_dir_all(&options.target_directory)?;
    let index_path = match options.layout {
        RepositoryLayout::Loose => options
            .target_directory
            .join(KY_DIRECTORY)
            .join("repository.db"),
        RepositoryLayout::Packed => options.target_directory.join("repository.db"),
        RepositoryLayout::Deployed => options.target_directory.join("k.db"),
    };
    let index = Index::create(&index_path)?;
    index.begin_bulk_build()?;

    let statistics = build_into(descriptor, options, &index)?;

    index.end_bulk_build()?;
    Ok(statistics)
}

fn build_into(
    descriptor: &RepositoryDescriptor,
    options: &BuildOptions,
    index: &Index,
) -> Result<BuildStatistics, Error> {
    let conn = index.connection();
    let mut objects: HashMap<Uuid, ObjectRef> = HashMap::new();
    let mut statistics = BuildStatistics::default();

    // Features, depth first so parents are persisted before children
    let mut features = Vec::new();
    store_features(conn, &descriptor.features, None, &mut features, &mut objects)?;
    for feature in &features {
        for dependency in &feature.dependencies {
            catalog::insert_feature_dependency(conn, &feature.uuid, dependency, RELATION_REQUIRES)?;
        }
    }

    // Files and groups
    let mut files: Vec<FileEntry> = Vec::new();
    let mut groups: Vec<GroupEntry> = Vec::new();
    for file in &descriptor.files {
        add_file(file, options, &mut files, &mut objects)?;
    }
    for group in &descriptor.groups {
        let mut members = Vec::new();
        for file in &group.files {
            members.push(add_file(file, options, &mut files, &mut objects)?);
        }
        groups.push(GroupEntry { files: members });
        register_object(&mut objects, group.id, ObjectRef::Group(groups.len() - 1))?;
    }

    // Hash every file, collapsing identical bytes into one content
    let mut build = BuildIndex::new(conn)?;
    let mut contents: Vec<ContentEntry> = Vec::new();
    let mut content_by_hash: HashMap<HashSum, usize> = HashMap::new();
    for file in &mut files {
        let hash = HashSum::sha256_file(&file.source)?;
        let content_index = match content_by_hash.entry(hash) {
            Entry::Occupied(existing) => *existing.get(),
            Entry::Vacant(vacant) => {
                let size = std::fs::metadata(&file.source)?.len();
                let db_id = build.store_content(&hash, size as i64)?;
                contents.push(ContentEntry {
                    hash,
                    size,
                    source: file.source.clone(),
                    db_id,
                });
                *vacant.insert(contents.len() - 1)
            }
        };
        file.content_index = content_index;
    }

    // Resolve feature references: claim files, expanding groups
    for feature_index in 0..features.len() {
        let references = features[feature_index].references.clone();
        let feature_db_id = features[feature_index].db_id;
        for reference in references {
            let file_indices = expand_reference(&objects, &groups, &reference)?;
            for file_index in file_indices {
                let file = &mut files[file_index];
                if let Some(assigned) = file.feature_id {
                    if assigned != feature_db_id {
                        return Err(Error::InvalidArgument(format!(
                            "file '{}' is referenced by more than one feature",
                            file.target
                        )));
                    }
                } else {
                    file.feature_id = Some(feature_db_id);
                }
            }
        }
    }

    // Persist files; every file must have been claimed by now
    for file in &files {
        let feature_id = file.feature_id.ok_or_else(|| {
            Error::InvalidArgument(format!(
                "file '{}' is not referenced by any feature",
                file.target
            ))
        })?;
        build.store_file(&file.target, contents[file.content_index].db_id, feature_id)?;
    }

    match options.layout {
        RepositoryLayout::Loose => {
            let objects_root = options
                .target_directory
                .join(KY_DIRECTORY)
                .join("objects");
            std::fs::create_dir_all(&objects_root)?;
            for content in &contents {
                std::fs::copy(&content.source, objects_root.join(content.hash.to_string()))?;
            }
        }
        RepositoryLayout::Deployed => {
            for file in &files {
                let target = options.target_directory.join(&file.target);
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(&file.source, &target)?;
            }
        }
        RepositoryLayout::Packed => {
            let packages = assign_packages(
                descriptor,
                &objects,
                &groups,
                &features,
                &mut files,
                &mut build,
            )?;
            let encryptor = descriptor
                .encryption_key
                .as_deref()
                .map(Encryptor::new);
            for package in &packages {
                statistics = write_package(
                    package,
                    &files,
                    &contents,
                    options,
                    encryptor.as_ref(),
                    &mut build,
                    statistics,
                )?;
            }
        }
    }

    Ok(statistics)
}

fn store_features(
    conn: &rusqlite::Connection,
    descriptions: &[FeatureDescription],
    parent: Option<i64>,
    out: &mut Vec<FeatureEntry>,
    objects: &mut HashMap<Uuid, ObjectRef>,
) -> Result<(), Error> {
    for description in descriptions {
        let db_id = catalog::insert_feature(
            conn,
            &description.id,
            description.title.as_deref(),
            description.description.as_deref(),
            parent,
        )?;
        out.push(FeatureEntry {
            uuid: description.id,
            references: description.references.clone(),
            dependencies: description.dependencies.clone(),
            db_id,
        });
        register_object(objects, description.id, ObjectRef::Feature(out.len() - 1))?;
        store_features(conn, &description.children, Some(db_id), out, objects)?;
    }
    Ok(())
}

fn register_object(
    objects: &mut HashMap<Uuid, ObjectRef>,
    uuid: Uuid,
    object: ObjectRef,
) -> Result<(), Error> {
    if objects.insert(uuid, object).is_some() {
        return Err(Error::InvalidArgument(format!(
            "duplicate object id '{}'",
            uuid
        )));
    }
    Ok(())
}

fn add_file(
    description: &FileDescription,
    options: &BuildOptions,
    files: &mut Vec<FileEntry>,
    objects: &mut HashMap<Uuid, ObjectRef>,
) -> Result<usize, Error> {
    let source = if Path::new(&description.source).is_absolute() {
        PathBuf::from(&description.source)
    } else {
        options.source_directory.join(&description.source)
    };
    let target = description
        .target
        .clone()
        .unwrap_or_else(|| description.source.clone());
    files.push(FileEntry {
        source,
        target,
        content_index: 0,
        feature_id: None,
        package: None,
    });
    let index = files.len() - 1;
    if let Some(id) = description.id {
        register_object(objects, id, ObjectRef::File(index))?;
    }
    Ok(index)
}

/// Expand a reference to the files it stands for: a file is itself, a group
/// its members, a feature the files it has claimed so far. Feature
/// references inside features resolve to nothing here; claiming happens on
/// files.
fn expand_reference(
    objects: &HashMap<Uuid, ObjectRef>,
    groups: &[GroupEntry],
    reference: &Uuid,
) -> Result<Vec<usize>, Error> {
    match objects.get(reference) {
        Some(ObjectRef::File(index)) => Ok(vec![*index]),
        Some(ObjectRef::Group(index)) => Ok(groups[*index].files.clone()),
        Some(ObjectRef::Feature(_)) => Ok(Vec::new()),
        None => Err(Error::InvalidArgument(format!(
            "unknown reference '{}'",
            reference
        ))),
    }
}

/// Resolve package references to files. Unlike feature references, a
/// reference to a feature collects every file that feature claimed.
fn expand_package_reference(
    objects: &HashMap<Uuid, ObjectRef>,
    groups: &[GroupEntry],
    features: &[FeatureEntry],
    files: &[FileEntry],
    reference: &Uuid,
) -> Result<Vec<usize>, Error> {
    match objects.get(reference) {
        Some(ObjectRef::File(index)) => Ok(vec![*index]),
        Some(ObjectRef::Group(index)) => Ok(groups[*index].files.clone()),
        Some(ObjectRef::Feature(index)) => {
            let feature_db_id = features[*index].db_id;
            Ok(files
                .iter()
                .enumerate()
                .filter(|(_, file)| file.feature_id == Some(feature_db_id))
                .map(|(file_index, _)| file_index)
                .collect())
        }
        None => Err(Error::InvalidArgument(format!(
            "unknown reference '{}'",
            reference
        ))),
    }
}

/// Assign every file to exactly one package. Files not reached by any
/// declared package fall into a synthesised "main" package, which is
/// dropped again if it stays empty.
fn assign_packages(
    descriptor: &RepositoryDescriptor,
    objects: &HashMap<Uuid, ObjectRef>,
    groups: &[GroupEntry],
    features: &[FeatureEntry],
    files: &mut [FileEntry],
    build: &mut BuildIndex<'_>,
) -> Result<Vec<PackageEntry>, Error> {
    let mut packages = Vec::new();
    for description in &descriptor.packages {
        let db_id = build.store_package(&format!("{}.kypkg", description.name))?;
        packages.push(PackageEntry {
            filename: format!("{}.kypkg", description.name),
            references: description.references.clone(),
            files: Vec::new(),
            db_id,
        });
    }
    for package_index in 0..packages.len() {
        let references = packages[package_index].references.clone();
        for reference in &references {
            for file_index in
                expand_package_reference(objects, groups, features, files, reference)?
            {
                match files[file_index].package {
                    // Double links to the same package collapse; a file in
                    // two different packages has no single storage location
                    Some(assigned) if assigned == package_index => {}
                    Some(_) => {
                        return Err(Error::InvalidArgument(format!(
                            "file '{}' is assigned to more than one package",
                            files[file_index].target
                        )));
                    }
                    None => {
                        files[file_index].package = Some(package_index);
                        packages[package_index].files.push(file_index);
                    }
                }
            }
        }
    }

    // Collect the remainder into "main"
    let main_db_id = build.store_package("main.kypkg")?;
    let mut main = PackageEntry {
        filename: "main.kypkg".to_owned(),
        references: Vec::new(),
        files: Vec::new(),
        db_id: main_db_id,
    };
    let main_index = packages.len();
    for (file_index, file) in files.iter_mut().enumerate() {
        if file.package.is_none() {
            file.package = Some(main_index);
            main.files.push(file_index);
        }
    }
    if main.files.is_empty() {
        build.remove_package(main_db_id)?;
    } else {
        packages.push(main);
    }
    Ok(packages)
}

/// Write one `.kypkg`: the fixed header, then every unique content of the
/// package as a run of transformed chunks, recording rows as it goes.
fn write_package(
    package: &PackageEntry,
    files: &[FileEntry],
    contents: &[ContentEntry],
    options: &BuildOptions,
    encryptor: Option<&Encryptor>,
    build: &mut BuildIndex<'_>,
    mut statistics: BuildStatistics,
) -> Result<BuildStatistics, Error> {
    let mut package_file =
        file_io::create_with_parents(&options.target_directory.join(&package.filename))?;
    package_file.write_all(&package::build_header())?;

    // Unique contents in digest order keeps package layout deterministic
    let mut unique: Vec<usize> = package
        .files
        .iter()
        .map(|&file_index| files[file_index].content_index)
        .collect();
    unique.sort_by(|a, b| contents[*a].hash.cmp(&contents[*b].hash));
    unique.dedup();

    let mut read_buffer = vec![0u8; options.chunk_size];
    for &content_index in &unique {
        let content = &contents[content_index];
        if content.size == 0 {
            // Zero-byte contents still get a chunk row so the content is
            // locatable, but no hash, compression or encryption rows
            let offset = package_file.stream_position()?;
            build.store_chunk(content.db_id, package.db_id, offset as i64, 0, 0, 0)?;
            continue;
        }
        let mut input = file_io::open_read(&content.source)?;
        let mut source_offset: u64 = 0;
        loop {
            let bytes_read = read_up_to(&mut input, &mut read_buffer)?;
            if bytes_read == 0 {
                break;
            }
            let chunk = &read_buffer[..bytes_read];
            let compressed = options.compression.compress(chunk)?;
            let compressed_size = compressed.len();
            statistics.stored_uncompressed += bytes_read as u64;
            statistics.stored_compressed += compressed_size as u64;
            let storage_hash = HashSum::sha256(&compressed);

            let (payload, encryption_data) = match encryptor {
                Some(encryptor) => {
                    let (data, ciphertext) = encryptor.encrypt(&compressed)?;
                    (ciphertext, Some(data))
                }
                None => (compressed, None),
            };

            let package_offset = package_file.stream_position()?;
            package_file.write_all(&payload)?;

            let chunk_id = build.store_chunk(
                content.db_id,
                package.db_id,
                package_offset as i64,
                payload.len() as i64,
                source_offset as i64,
                bytes_read as i64,
            )?;
            build.store_chunk_hash(chunk_id, &storage_hash)?;
            if let Some(algorithm) = options.compression.id() {
                build.store_chunk_compression(
                    chunk_id,
                    algorithm,
                    bytes_read as i64,
                    compressed_size as i64,
                )?;
            }
            if let Some(data) = encryption_data {
                build.store_chunk_encryption(
                    chunk_id,
                    ENCRYPTION_ALGORITHM_ID,
                    &data.pack(),
                    compressed_size as i64,
                    payload.len() as i64,
                )?;
            }
            source_offset += bytes_read as u64;
        }
    }
    Ok(statistics)
}

/// Fill as much of the buffer as the reader can provide.
fn read_up_to<R: Read>(reader: &mut R, buffer: &mut [u8]) -> Result<usize, std::io::Error> {
    let mut filled = 0;
    while filled < buffer.len() {
        let read = reader.read(&mut buffer[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}
