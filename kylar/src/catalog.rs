use rusqlite::{params, Connection, OptionalExtension, Statement};
use std::collections::HashSet;
use uuid::Uuid;

use crate::compression::Compression;
use crate::encryption::EncryptionData;
use crate::{Error, HashSum};

/// The one dependency relation the engine recognises.
pub const RELATION_REQUIRES: &str = "requires";

/// A labelled edge between two features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureDependency {
    pub source: Uuid,
    pub target: Uuid,
    pub relation: String,
}

/// Title and description of a feature, both optional.
#[derive(Debug, Clone, Default)]
pub struct FeatureDetails {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChunkCompressionRecord {
    pub compression: Compression,
    pub input_size: u64,
    pub output_size: u64,
}

#[derive(Debug, Clone)]
pub struct ChunkEncryptionRecord {
    pub algorithm: String,
    pub data: EncryptionData,
    pub input_size: u64,
    pub output_size: u64,
}

/// One row of `fs_content_view`: a chunk with its content metadata and the
/// optional hash, compression and encryption records.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub content_hash: HashSum,
    pub total_size: u64,
    pub package_offset: u64,
    pub package_size: u64,
    pub source_offset: u64,
    pub source_size: u64,
    pub storage_hash: Option<HashSum>,
    pub compression: Option<ChunkCompressionRecord>,
    pub encryption: Option<ChunkEncryptionRecord>,
}

fn uuid_from_blob(blob: Vec<u8>) -> Result<Uuid, Error> {
    Uuid::from_slice(&blob)
        .map_err(|_| Error::IndexViolation(format!("expected a 16 byte uuid, got {}", blob.len())))
}

pub fn feature_uuids(conn: &Connection) -> Result<Vec<Uuid>, Error> {
    let mut stmt = conn.prepare("SELECT Uuid FROM features ORDER BY Id")?;
    let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
    let mut result = Vec::new();
    for row in rows {
        result.push(uuid_from_blob(row?)?);
    }
    Ok(result)
}

pub fn feature_exists(conn: &Connection, uuid: &Uuid) -> Result<bool, Error> {
    let mut stmt = conn.prepare("SELECT 1 FROM features WHERE Uuid = ?1")?;
    Ok(stmt.exists(params![uuid.as_bytes().to_vec()])?)
}

pub fn feature_details(conn: &Connection, uuid: &Uuid) -> Result<FeatureDetails, Error> {
    conn.query_row(
        "SELECT Title, Description FROM features WHERE Uuid = ?1",
        params![uuid.as_bytes().to_vec()],
        |row| {
            Ok(FeatureDetails {
                title: row.get(0)?,
                description: row.get(1)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("unknown feature '{}'", uuid)))
}

/// Installed byte size of a feature: the sum of the content sizes of all its
/// files. Files sharing a content count once per file, matching the bytes
/// the feature occupies when deployed.
pub fn feature_size(conn: &Connection, uuid: &Uuid) -> Result<i64, Error> {
    require_feature(conn, uuid)?;
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(fs_contents.Size), 0)
         FROM features
         INNER JOIN fs_files ON features.Id = fs_files.FeatureId
         INNER JOIN fs_contents ON fs_contents.Id = fs_files.ContentId
         WHERE features.Uuid = ?1",
        params![uuid.as_bytes().to_vec()],
        |row| row.get(0),
    )?)
}

pub fn feature_file_count(conn: &Connection, uuid: &Uuid) -> Result<i64, Error> {
    require_feature(conn, uuid)?;
    Ok(conn.query_row(
        "SELECT COUNT(fs_files.Id)
         FROM features
         INNER JOIN fs_files ON features.Id = fs_files.FeatureId
         WHERE features.Uuid = ?1",
        params![uuid.as_bytes().to_vec()],
        |row| row.get(0),
    )?)
}

/// Dependencies declared by the given feature.
pub fn feature_dependencies(
    conn: &Connection,
    uuid: &Uuid,
) -> Result<Vec<FeatureDependency>, Error> {
    require_feature(conn, uuid)?;
    let mut stmt = conn.prepare(
        "SELECT source.Uuid, target.Uuid, feature_dependencies.Relation
         FROM feature_dependencies
         INNER JOIN features AS source ON feature_dependencies.SourceId = source.Id
         INNER JOIN features AS target ON feature_dependencies.TargetId = target.Id
         WHERE source.Uuid = ?1",
    )?;
    let rows = stmt.query_map(params![uuid.as_bytes().to_vec()], |row| {
        Ok((
            row.get::<_, Vec<u8>>(0)?,
            row.get::<_, Vec<u8>>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    let mut result = Vec::new();
    for row in rows {
        let (source, target, relation) = row?;
        result.push(FeatureDependency {
            source: uuid_from_blob(source)?,
            target: uuid_from_blob(target)?,
            relation,
        });
    }
    Ok(result)
}

fn require_feature(conn: &Connection, uuid: &Uuid) -> Result<(), Error> {
    if !feature_exists(conn, uuid)? {
        return Err(Error::NotFound(format!("unknown feature '{}'", uuid)));
    }
    Ok(())
}

/// Whether any chunk of this repository carries encryption data.
pub fn is_encrypted(conn: &Connection) -> Result<bool, Error> {
    let mut stmt = conn.prepare("SELECT 1 FROM fs_chunk_encryption LIMIT 1")?;
    Ok(stmt.exists([])?)
}

/// Insert a feature row. The parent chain is walked first so a corrupt
/// parent loop surfaces as an index error instead of hanging later tree
/// walks.
pub fn insert_feature(
    conn: &Connection,
    uuid: &Uuid,
    title: Option<&str>,
    description: Option<&str>,
    parent_id: Option<i64>,
) -> Result<i64, Error> {
    if let Some(parent) = parent_id {
        let mut seen = HashSet::new();
        let mut current = Some(parent);
        while let Some(id) = current {
            if !seen.insert(id) {
                return Err(Error::IndexViolation(format!(
                    "feature parent chain contains a cycle at row {}",
                    id
                )));
            }
            current = conn
                .query_row(
                    "SELECT ParentId FROM features WHERE Id = ?1",
                    params![id],
                    |row| row.get::<_, Option<i64>>(0),
                )
                .optional()?
                .flatten();
        }
    }
    conn.execute(
        "INSERT INTO features (Uuid, Title, Description, ParentId) VALUES (?1, ?2, ?3, ?4)",
        params![uuid.as_bytes().to_vec(), title, description, parent_id],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Insert a dependency edge; both features must exist already.
pub fn insert_feature_dependency(
    conn: &Connection,
    source: &Uuid,
    target: &Uuid,
    relation: &str,
) -> Result<(), Error> {
    conn.execute(
        "INSERT INTO feature_dependencies (SourceId, TargetId, Relation) VALUES (
            (SELECT Id FROM features WHERE Uuid = ?1),
            (SELECT Id FROM features WHERE Uuid = ?2),
            ?3)",
        params![
            source.as_bytes().to_vec(),
            target.as_bytes().to_vec(),
            relation
        ],
    )?;
    Ok(())
}

/// `(path, content hash, content size)` for every deployed file, smallest
/// contents first so validation makes visible progress before the large
/// files dominate.
pub fn deployed_validation_rows(
    conn: &Connection,
) -> Result<Vec<(String, HashSum, i64)>, Error> {
    let mut stmt = conn.prepare(
        "SELECT fs_files.Path, fs_contents.Hash, fs_contents.Size
         FROM fs_files
         LEFT JOIN fs_contents ON fs_contents.Id = fs_files.ContentId
         ORDER BY fs_contents.Size",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Vec<u8>>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;
    let mut result = Vec::new();
    for row in rows {
        let (path, hash, size) = row?;
        result.push((path, HashSum::from_slice(&hash)?, size));
    }
    Ok(result)
}

/// `(content hash, content size)` for every content object, smallest first.
pub fn content_validation_rows(conn: &Connection) -> Result<Vec<(HashSum, i64)>, Error> {
    let mut stmt = conn.prepare("SELECT Hash, Size FROM fs_contents ORDER BY Size")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut result = Vec::new();
    for row in rows {
        let (hash, size) = row?;
        result.push((HashSum::from_slice(&hash)?, size));
    }
    Ok(result)
}

/// Size of a content by hash, if present.
pub fn content_size(conn: &Connection, hash: &HashSum) -> Result<Option<i64>, Error> {
    Ok(conn
        .query_row(
            "SELECT Size FROM fs_contents WHERE Hash = ?1",
            params![hash.as_slice()],
            |row| row.get(0),
        )
        .optional()?)
}

/// Any one deployed path referencing the given content.
pub fn any_path_for_content(
    conn: &Connection,
    hash: &HashSum,
) -> Result<Option<String>, Error> {
    Ok(conn
        .query_row(
            "SELECT Path FROM fs_files
             WHERE ContentId = (SELECT Id FROM fs_contents WHERE Hash = ?1)
             LIMIT 1",
            params![hash.as_slice()],
            |row| row.get(0),
        )
        .optional()?)
}

/// Drop all content rows nothing references any more. Returns how many rows
/// went away.
pub fn collect_garbage_contents(conn: &Connection) -> Result<usize, Error> {
    Ok(conn.execute(
        "DELETE FROM fs_contents WHERE Id IN (
            SELECT Id FROM fs_contents_with_reference_count WHERE ReferenceCount = 0)",
        [],
    )?)
}

/// Stage the requested content hashes in a temp table so the package and
/// chunk queries can join against them.
pub fn create_requested_contents(conn: &Connection, requested: &[HashSum]) -> Result<(), Error> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS temp.requested_fs_contents;
         CREATE TEMP TABLE requested_fs_contents (Hash BLOB NOT NULL UNIQUE);",
    )?;
    let mut stmt = conn.prepare("INSERT INTO requested_fs_contents (Hash) VALUES (?1)")?;
    for hash in requested {
        stmt.execute(params![hash.as_slice()])?;
    }
    Ok(())
}

pub fn drop_requested_contents(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch("DROP TABLE IF EXISTS temp.requested_fs_contents;")?;
    Ok(())
}

/// All packages holding at least one requested content, in discovery order.
pub fn requested_packages(conn: &Connection) -> Result<Vec<(i64, String)>, Error> {
    let stmt = conn.prepare(
        "SELECT DISTINCT fs_packages.Id, fs_packages.Filename
         FROM fs_chunks
         INNER JOIN fs_contents ON fs_chunks.ContentId = fs_contents.Id
         INNER JOIN fs_packages ON fs_chunks.PackageId = fs_packages.Id
         WHERE fs_contents.Hash IN (SELECT Hash FROM requested_fs_contents)
         ORDER BY fs_packages.Id",
    )?;
    collect_packages(stmt)
}

pub fn all_packages(conn: &Connection) -> Result<Vec<(i64, String)>, Error> {
    let stmt = conn.prepare("SELECT Id, Filename FROM fs_packages ORDER BY Id")?;
    collect_packages(stmt)
}

fn collect_packages(mut stmt: Statement<'_>) -> Result<Vec<(i64, String)>, Error> {
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

const CONTENT_VIEW_COLUMNS: &str = "
    PackageOffset,
    PackageSize,
    SourceOffset,
    SourceSize,
    ContentHash,
    TotalSize,
    StorageHash,
    CompressionAlgorithm,
    CompressionInputSize,
    CompressionOutputSize,
    EncryptionAlgorithm,
    EncryptionData,
    EncryptionInputSize,
    EncryptionOutputSize";

/// Requested chunks within one package, in chunk-row (= insertion) order,
/// which is increasing source offset per content by construction.
pub fn requested_chunks_in_package(
    conn: &Connection,
    package_id: i64,
) -> Result<Vec<ChunkRecord>, Error> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM fs_content_view
         WHERE ContentHash IN (SELECT Hash FROM requested_fs_contents)
           AND PackageId = ?1
         ORDER BY ChunkId",
        CONTENT_VIEW_COLUMNS
    ))?;
    collect_chunk_records(&mut stmt, package_id)
}

/// Every chunk of one package, in chunk-row order.
pub fn chunks_in_package(conn: &Connection, package_id: i64) -> Result<Vec<ChunkRecord>, Error> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM fs_content_view
         WHERE PackageId = ?1
         ORDER BY ChunkId",
        CONTENT_VIEW_COLUMNS
    ))?;
    collect_chunk_records(&mut stmt, package_id)
}

fn collect_chunk_records(
    stmt: &mut Statement<'_>,
    package_id: i64,
) -> Result<Vec<ChunkRecord>, Error> {
    struct RawRecord {
        package_offset: i64,
        package_size: i64,
        source_offset: i64,
        source_size: i64,
        content_hash: Vec<u8>,
        total_size: i64,
        storage_hash: Option<Vec<u8>>,
        compression_algorithm: Option<String>,
        compression_input_size: Option<i64>,
        compression_output_size: Option<i64>,
        encryption_algorithm: Option<String>,
        encryption_data: Option<Vec<u8>>,
        encryption_input_size: Option<i64>,
        encryption_output_size: Option<i64>,
    }
    let rows = stmt.query_map(params![package_id], |row| {
        Ok(RawRecord {
            package_offset: row.get(0)?,
            package_size: row.get(1)?,
            source_offset: row.get(2)?,
            source_size: row.get(3)?,
            content_hash: row.get(4)?,
            total_size: row.get(5)?,
            storage_hash: row.get(6)?,
            compression_algorithm: row.get(7)?,
            compression_input_size: row.get(8)?,
            compression_output_size: row.get(9)?,
            encryption_algorithm: row.get(10)?,
            encryption_data: row.get(11)?,
            encryption_input_size: row.get(12)?,
            encryption_output_size: row.get(13)?,
        })
    })?;
    let mut result = Vec::new();
    for row in rows {
        let raw = row?;
        let compression = match raw.compression_algorithm {
            Some(algorithm) => Some(ChunkCompressionRecord {
                compression: Compression::from_id(Some(&algorithm))?,
                input_size: raw.compression_input_size.unwrap_or(0) as u64,
                output_size: raw.compression_output_size.unwrap_or(0) as u64,
            }),
            None => None,
        };
        let encryption = match (raw.encryption_algorithm, raw.encryption_data) {
            (Some(algorithm), Some(data)) => Some(ChunkEncryptionRecord {
                algorithm,
                data: EncryptionData::unpack(&data)?,
                input_size: raw.encryption_input_size.unwrap_or(0) as u64,
                output_size: raw.encryption_output_size.unwrap_or(0) as u64,
            }),
            _ => None,
        };
        result.push(ChunkRecord {
            content_hash: HashSum::from_slice(&raw.content_hash)?,
            total_size: raw.total_size as u64,
            package_offset: raw.package_offset as u64,
            package_size: raw.package_size as u64,
            source_offset: raw.source_offset as u64,
            source_size: raw.source_size as u64,
            storage_hash: match raw.storage_hash {
                Some(hash) => Some(HashSum::from_slice(&hash)?),
                None => None,
            },
            compression,
            encryption,
        });
    }
    Ok(result)
}

/// Prepared insert statements for bulk index population during a build.
pub struct BuildIndex<'conn> {
    conn: &'conn Connection,
    insert_content: Statement<'conn>,
    insert_file: Statement<'conn>,
    insert_package: Statement<'conn>,
    delete_package: Statement<'conn>,
    insert_chunk: Statement<'conn>,
    insert_chunk_hash: Statement<'conn>,
    insert_chunk_compression: Statement<'conn>,
    insert_chunk_encryption: Statement<'conn>,
}

impl<'conn> BuildIndex<'conn> {
    pub fn new(conn: &'conn Connection) -> Result<Self, Error> {
        Ok(Self {
            conn,
            insert_content: conn
                .prepare("INSERT INTO fs_contents (Hash, Size) VALUES (?1, ?2)")?,
            insert_file: conn.prepare(
                "INSERT INTO fs_files (Path, ContentId, FeatureId) VALUES (?1, ?2, ?3)",
            )?,
            insert_package: conn.prepare("INSERT INTO fs_packages (Filename) VALUES (?1)")?,
            delete_package: conn.prepare("DELETE FROM fs_packages WHERE Id = ?1")?,
            insert_chunk: conn.prepare(
                "INSERT INTO fs_chunks
                 (ContentId, PackageId, PackageOffset, PackageSize, SourceOffset, SourceSize)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?,
            insert_chunk_hash: conn
                .prepare("INSERT INTO fs_chunk_hashes (ChunkId, Hash) VALUES (?1, ?2)")?,
            insert_chunk_compression: conn.prepare(
                "INSERT INTO fs_chunk_compression (ChunkId, Algorithm, InputSize, OutputSize)
                 VALUES (?1, ?2, ?3, ?4)",
            )?,
            insert_chunk_encryption: conn.prepare(
                "INSERT INTO fs_chunk_encryption
                 (ChunkId, Algorithm, Data, InputSize, OutputSize)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?,
        })
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    pub fn store_content(&mut self, hash: &HashSum, size: i64) -> Result<i64, Error> {
        Ok(self.insert_content.insert(params![hash.as_slice(), size])?)
    }

    pub fn store_file(&mut self, path: &str, content_id: i64, feature_id: i64) -> Result<i64, Error> {
        Ok(self
            .insert_file
            .insert(params![path, content_id, feature_id])?)
    }

    pub fn store_package(&mut self, filename: &str) -> Result<i64, Error> {
        Ok(self.insert_package.insert(params![filename])?)
    }

    pub fn remove_package(&mut self, id: i64) -> Result<(), Error> {
        self.delete_package.execute(params![id])?;
        Ok(())
    }

    pub fn store_chunk(
        &mut self,
        content_id: i64,
        package_id: i64,
        package_offset: i64,
        package_size: i64,
        source_offset: i64,
        source_size: i64,
    ) -> Result<i64, Error> {
        Ok(self.insert_chunk.insert(params![
            content_id,
            package_id,
            package_offset,
            package_size,
            source_offset,
            source_size
        ])?)
    }

    pub fn store_chunk_hash(&mut self, chunk_id: i64, hash: &HashSum) -> Result<(), Error> {
        self.insert_chunk_hash
            .execute(params![chunk_id, hash.as_slice()])?;
        Ok(())
    }

    pub fn store_chunk_compression(
        &mut self,
        chunk_id: i64,
        algorithm: &str,
        input_size: i64,
        output_size: i64,
    ) -> Result<(), Error> {
        self.insert_chunk_compression
            .execute(params![chunk_id, algorithm, input_size, output_size])?;
        Ok(())
    }

    pub fn store_chunk_encryption(
        &mut self,
        chunk_id: i64,
        algorithm: &str,
        data: &[u8],
        input_size: i64,
        output_size: i64,
    ) -> Result<(), Error> {
        self.insert_chunk_encryption
            .execute(params![chunk_id, algorithm, data, input_size, output_size])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;

    fn test_index() -> (tempfile::TempDir, Index) {
        let dir = tempfile::tempdir().unwrap();
        let index = Index::create(&dir.path().join("repository.db")).unwrap();
        (dir, index)
    }

    #[test]
    fn insert_and_list_features() {
        let (_dir, index) = test_index();
        let conn = index.connection();
        let root = Uuid::from_u128(1);
        let child = Uuid::from_u128(2);
        let root_id = insert_feature(conn, &root, Some("Root"), None, None).unwrap();
        insert_feature(conn, &child, None, Some("child feature"), Some(root_id)).unwrap();
        assert_eq!(feature_uuids(conn).unwrap(), vec![root, child]);
        let details = feature_details(conn, &root).unwrap();
        assert_eq!(details.title.as_deref(), Some("Root"));
        assert!(details.description.is_none());
    }

    #[test]
    fn dependencies_round_trip() {
        let (_dir, index) = test_index();
        let conn = index.connection();
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        insert_feature(conn, &a, None, None, None).unwrap();
        insert_feature(conn, &b, None, None, None).unwrap();
        insert_feature_dependency(conn, &a, &b, RELATION_REQUIRES).unwrap();
        let deps = feature_dependencies(conn, &a).unwrap();
        assert_eq!(
            deps,
            vec![FeatureDependency {
                source: a,
                target: b,
                relation: RELATION_REQUIRES.to_owned()
            }]
        );
        assert!(feature_dependencies(conn, &b).unwrap().is_empty());
    }

    #[test]
    fn dependency_on_unknown_feature_is_an_index_error() {
        let (_dir, index) = test_index();
        let conn = index.connection();
        let a = Uuid::from_u128(1);
        insert_feature(conn, &a, None, None, None).unwrap();
        let result = insert_feature_dependency(conn, &a, &Uuid::from_u128(9), RELATION_REQUIRES);
        assert!(matches!(result, Err(Error::Index(_))));
    }

    #[test]
    fn parent_cycle_is_detected() {
        let (_dir, index) = test_index();
        let conn = index.connection();
        let a_id = insert_feature(conn, &Uuid::from_u128(1), None, None, None).unwrap();
        let b_id = insert_feature(conn, &Uuid::from_u128(2), None, None, Some(a_id)).unwrap();
        // Force a loop behind the catalog's back, then try to hang a new
        // feature off it.
        conn.execute(
            "UPDATE features SET ParentId = ?1 WHERE Id = ?2",
            params![b_id, a_id],
        )
        .unwrap();
        let result = insert_feature(conn, &Uuid::from_u128(3), None, None, Some(a_id));
        assert!(matches!(result, Err(Error::IndexViolation(_))));
    }

    #[test]
    fn garbage_collection_only_removes_unreferenced() {
        let (_dir, index) = test_index();
        let conn = index.connection();
        let feature = insert_feature(conn, &Uuid::from_u128(1), None, None, None).unwrap();
        let mut build = BuildIndex::new(conn).unwrap();
        let live = build.store_content(&HashSum::sha256(b"live"), 4).unwrap();
        build.store_content(&HashSum::sha256(b"dead"), 4).unwrap();
        build.store_file("live.txt", live, feature).unwrap();
        drop(build);
        assert_eq!(collect_garbage_contents(conn).unwrap(), 1);
        assert_eq!(
            content_size(conn, &HashSum::sha256(b"live")).unwrap(),
            Some(4)
        );
        assert_eq!(content_size(conn, &HashSum::sha256(b"dead")).unwrap(), None);
    }

    #[test]
    fn requested_contents_select_packages_and_chunks() {
        let (_dir, index) = test_index();
        let conn = index.connection();
        let feature = insert_feature(conn, &Uuid::from_u128(1), None, None, None).unwrap();
        let wanted = HashSum::sha256(b"wanted");
        let other = HashSum::sha256(b"other");
        let mut build = BuildIndex::new(conn).unwrap();
        let wanted_id = build.store_content(&wanted, 6).unwrap();
        let other_id = build.store_content(&other, 5).unwrap();
        build.store_file("wanted.bin", wanted_id, feature).unwrap();
        build.store_file("other.bin", other_id, feature).unwrap();
        let pkg_a = build.store_package("a.kypkg").unwrap();
        let pkg_b = build.store_package("b.kypkg").unwrap();
        let chunk = build
            .store_chunk(wanted_id, pkg_a, 64, 6, 0, 6)
            .unwrap();
        build
            .store_chunk_hash(chunk, &HashSum::sha256(b"stored"))
            .unwrap();
        build.store_chunk(other_id, pkg_b, 64, 5, 0, 5).unwrap();
        drop(build);

        create_requested_contents(conn, &[wanted]).unwrap();
        let packages = requested_packages(conn).unwrap();
        assert_eq!(packages, vec![(pkg_a, "a.kypkg".to_owned())]);
        let chunks = requested_chunks_in_package(conn, pkg_a).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content_hash, wanted);
        assert_eq!(chunks[0].total_size, 6);
        assert_eq!(
            chunks[0].storage_hash,
            Some(HashSum::sha256(b"stored"))
        );
        assert!(chunks[0].compression.is_none());
        assert!(chunks[0].encryption.is_none());
        drop_requested_contents(conn).unwrap();
    }
}
