use rusqlite::backup::Backup;
use rusqlite::{Connection, DatabaseName, OpenFlags, Transaction};
use std::path::Path;
use std::time::Duration;

use crate::Error;

/// Schema shared by all repository layouts. Loose and deployed repositories
/// simply leave the package and chunk tables empty.
const SCHEMA: &str = "
CREATE TABLE features (
    Id INTEGER PRIMARY KEY,
    Uuid BLOB NOT NULL UNIQUE CHECK (length(Uuid) = 16),
    Title TEXT,
    Description TEXT,
    ParentId INTEGER REFERENCES features(Id)
);

CREATE TABLE feature_dependencies (
    SourceId INTEGER NOT NULL REFERENCES features(Id),
    TargetId INTEGER NOT NULL REFERENCES features(Id),
    Relation TEXT NOT NULL
);

CREATE TABLE fs_contents (
    Id INTEGER PRIMARY KEY,
    Hash BLOB NOT NULL UNIQUE CHECK (length(Hash) = 32),
    Size INTEGER NOT NULL
);

CREATE TABLE fs_files (
    Id INTEGER PRIMARY KEY,
    Path TEXT NOT NULL UNIQUE,
    ContentId INTEGER NOT NULL REFERENCES fs_contents(Id),
    FeatureId INTEGER NOT NULL REFERENCES features(Id)
);

CREATE TABLE fs_packages (
    Id INTEGER PRIMARY KEY,
    Filename TEXT NOT NULL
);

CREATE TABLE fs_chunks (
    Id INTEGER PRIMARY KEY,
    ContentId INTEGER NOT NULL REFERENCES fs_contents(Id),
    PackageId INTEGER NOT NULL REFERENCES fs_packages(Id),
    PackageOffset INTEGER NOT NULL,
    PackageSize INTEGER NOT NULL,
    SourceOffset INTEGER NOT NULL,
    SourceSize INTEGER NOT NULL
);

CREATE TABLE fs_chunk_hashes (
    ChunkId INTEGER PRIMARY KEY REFERENCES fs_chunks(Id),
    Hash BLOB NOT NULL CHECK (length(Hash) = 32)
);

CREATE TABLE fs_chunk_compression (
    ChunkId INTEGER PRIMARY KEY REFERENCES fs_chunks(Id),
    Algorithm TEXT NOT NULL,
    InputSize INTEGER NOT NULL,
    OutputSize INTEGER NOT NULL
);

CREATE TABLE fs_chunk_encryption (
    ChunkId INTEGER PRIMARY KEY REFERENCES fs_chunks(Id),
    Algorithm TEXT NOT NULL,
    Data BLOB NOT NULL CHECK (length(Data) = 24),
    InputSize INTEGER NOT NULL,
    OutputSize INTEGER NOT NULL
);

CREATE INDEX fs_files_content_idx ON fs_files (ContentId);
CREATE INDEX fs_chunks_package_idx ON fs_chunks (PackageId);

CREATE VIEW fs_content_view AS
SELECT
    fs_chunks.Id AS ChunkId,
    fs_chunks.ContentId AS ContentId,
    fs_chunks.PackageId AS PackageId,
    fs_chunks.PackageOffset AS PackageOffset,
    fs_chunks.PackageSize AS PackageSize,
    fs_chunks.SourceOffset AS SourceOffset,
    fs_chunks.SourceSize AS SourceSize,
    fs_contents.Hash AS ContentHash,
    fs_contents.Size AS TotalSize,
    fs_chunk_hashes.Hash AS StorageHash,
    fs_chunk_compression.Algorithm AS CompressionAlgorithm,
    fs_chunk_compression.InputSize AS CompressionInputSize,
    fs_chunk_compression.OutputSize AS CompressionOutputSize,
    fs_chunk_encryption.Algorithm AS EncryptionAlgorithm,
    fs_chunk_encryption.Data AS EncryptionData,
    fs_chunk_encryption.InputSize AS EncryptionInputSize,
    fs_chunk_encryption.OutputSize AS EncryptionOutputSize
FROM fs_chunks
INNER JOIN fs_contents ON fs_chunks.ContentId = fs_contents.Id
LEFT JOIN fs_chunk_hashes ON fs_chunk_hashes.ChunkId = fs_chunks.Id
LEFT JOIN fs_chunk_compression ON fs_chunk_compression.ChunkId = fs_chunks.Id
LEFT JOIN fs_chunk_encryption ON fs_chunk_encryption.ChunkId = fs_chunks.Id;

CREATE VIEW fs_contents_with_reference_count AS
SELECT
    fs_contents.Id AS Id,
    COUNT(fs_files.Id) AS ReferenceCount
FROM fs_contents
LEFT JOIN fs_files ON fs_contents.Id = fs_files.ContentId
GROUP BY fs_contents.Id;
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    ReadWrite,
}

/// The canonical on-disk index of a repository, one SQLite database.
pub struct Index {
    conn: Connection,
}

impl Index {
    /// Open an existing index file.
    pub fn open(path: &Path, mode: OpenMode) -> Result<Self, Error> {
        let flags = match mode {
            OpenMode::Read => OpenFlags::SQLITE_OPEN_READ_ONLY,
            OpenMode::ReadWrite => OpenFlags::SQLITE_OPEN_READ_WRITE,
        };
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "no repository index at '{}'",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(path, flags)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    /// Create a fresh index file with the full schema. An existing file at
    /// the same path is replaced.
    pub fn create(path: &Path) -> Result<Self, Error> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn transaction(&mut self) -> Result<Transaction<'_>, Error> {
        Ok(self.conn.transaction()?)
    }

    pub fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// Attach an in-memory copy of `source` under the given logical name,
    /// via the SQLite online backup API. The copy decouples the attached
    /// data from the source's availability.
    pub fn attach_memory_copy(&mut self, name: &str, source: &Index) -> Result<(), Error> {
        self.conn
            .execute_batch(&format!("ATTACH DATABASE ':memory:' AS {};", name))?;
        let backup = Backup::new_with_names(
            &source.conn,
            DatabaseName::Main,
            &mut self.conn,
            DatabaseName::Attached(name),
        )?;
        backup.run_to_completion(4096, Duration::from_millis(0), None)?;
        Ok(())
    }

    pub fn detach(&self, name: &str) -> Result<(), Error> {
        self.conn
            .execute_batch(&format!("DETACH DATABASE {};", name))?;
        Ok(())
    }

    /// Switch to WAL journaling for the duration of a configure run.
    pub fn begin_write_ahead_log(&self) -> Result<(), Error> {
        // journal_mode returns the resulting mode as a row
        self.conn
            .query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))?;
        self.conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        Ok(())
    }

    /// Switch back to rollback journaling before closing a freshly
    /// configured target.
    pub fn end_write_ahead_log(&self) -> Result<(), Error> {
        self.conn
            .query_row("PRAGMA journal_mode = DELETE;", [], |_| Ok(()))?;
        Ok(())
    }

    pub fn analyze(&self) -> Result<(), Error> {
        self.conn.execute_batch("ANALYZE;")?;
        Ok(())
    }

    /// Fast, unsafe-on-crash journaling for build runs, where a crash just
    /// means rebuilding.
    pub fn begin_bulk_build(&self) -> Result<(), Error> {
        self.conn
            .query_row("PRAGMA journal_mode = MEMORY;", [], |_| Ok(()))?;
        self.conn.execute_batch("PRAGMA synchronous = OFF;")?;
        Ok(())
    }

    pub fn end_bulk_build(&self) -> Result<(), Error> {
        self.conn
            .query_row("PRAGMA journal_mode = DELETE;", [], |_| Ok(()))?;
        self.conn.execute_batch(
            "PRAGMA synchronous = FULL;
             PRAGMA optimize;
             VACUUM;",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repository.db");
        {
            let index = Index::create(&path).unwrap();
            index
                .connection()
                .execute(
                    "INSERT INTO fs_contents (Hash, Size) VALUES (?1, ?2)",
                    rusqlite::params![vec![7u8; 32], 42i64],
                )
                .unwrap();
        }
        let index = Index::open(&path, OpenMode::Read).unwrap();
        let size: i64 = index
            .connection()
            .query_row("SELECT Size FROM fs_contents", [], |row| row.get(0))
            .unwrap();
        assert_eq!(size, 42);
    }

    #[test]
    fn open_missing_index_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        match Index::open(&dir.path().join("nope.db"), OpenMode::Read) {
            Err(Error::NotFound(_)) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn hash_length_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let index = Index::create(&dir.path().join("repository.db")).unwrap();
        let result = index.connection().execute(
            "INSERT INTO fs_contents (Hash, Size) VALUES (?1, ?2)",
            rusqlite::params![vec![7u8; 16], 42i64],
        );
        assert!(result.is_err());
    }

    #[test]
    fn attach_memory_copy_sees_source_rows() {
        let dir = tempfile::tempdir().unwrap();
        let source = Index::create(&dir.path().join("source.db")).unwrap();
        source
            .connection()
            .execute(
                "INSERT INTO fs_contents (Hash, Size) VALUES (?1, ?2)",
                rusqlite::params![vec![1u8; 32], 1i64],
            )
            .unwrap();
        let mut target = Index::create(&dir.path().join("target.db")).unwrap();
        target.attach_memory_copy("source", &source).unwrap();
        let count: i64 = target
            .connection()
            .query_row("SELECT COUNT(*) FROM source.fs_contents", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
        target.detach("source").unwrap();
    }

    #[test]
    fn reference_count_view() {
        let dir = tempfile::tempdir().unwrap();
        let index = Index::create(&dir.path().join("repository.db")).unwrap();
        let conn = index.connection();
        conn.execute(
            "INSERT INTO features (Uuid) VALUES (?1)",
            rusqlite::params![vec![0u8; 16]],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO fs_contents (Hash, Size) VALUES (?1, 5)",
            rusqlite::params![vec![1u8; 32]],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO fs_contents (Hash, Size) VALUES (?1, 5)",
            rusqlite::params![vec![2u8; 32]],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO fs_files (Path, ContentId, FeatureId) VALUES ('a', 1, 1)",
            [],
        )
        .unwrap();
        let orphaned: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM fs_contents_with_reference_count WHERE ReferenceCount = 0",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(orphaned, 1);
    }
}
