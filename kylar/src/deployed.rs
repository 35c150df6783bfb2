use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::catalog;
use crate::file_io;
use crate::index::{Index, OpenMode};
use crate::logging::Log;
use crate::progress::ProgressHelper;
use crate::repository::{ContentSink, Repository, ValidationResult, ValidationSink};
use crate::{Error, HashSum};

/// Extension of staging files for streamed multi-chunk contents.
const STAGING_EXTENSION: &str = "kytmp";

/// Remove a file, treating an already missing file as removed.
fn remove_file_if_exists(path: &Path) -> Result<(), std::io::Error> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// A repository whose files are materialised at their target paths, indexed
/// by `k.db` in the target root. The only layout configure can write to.
pub struct DeployedRepository {
    index: Index,
    path: PathBuf,
}

impl DeployedRepository {
    pub fn open(path: &Path, mode: OpenMode) -> Result<Self, Error> {
        let index = Index::open(&path.join("k.db"), mode)?;
        Ok(Self {
            index,
            path: path.to_owned(),
        })
    }

    /// Install: initialise an empty target and configure it to the desired
    /// feature set.
    pub fn create_from(
        source: &mut Repository,
        desired: &[Uuid],
        target_directory: &Path,
        decryption_key: Option<&str>,
        log: &Log,
        progress: &mut ProgressHelper<'_>,
    ) -> Result<Self, Error> {
        std::fs::create_dir_all(target_directory)?;
        // Create the schema, close, then reopen through the regular path
        Index::create(&target_directory.join("k.db"))?;
        let mut repository = Self::open(target_directory, OpenMode::ReadWrite)?;
        repository.configure(source, desired, decryption_key, log, progress)?;
        Ok(repository)
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Serve contents out of the deployed files themselves, for local
    /// copies during configure and as a repair source.
    pub fn get_contents(
        &mut self,
        requested: &[HashSum],
        sink: &mut ContentSink<'_>,
    ) -> Result<(), Error> {
        for hash in requested {
            let path = catalog::any_path_for_content(self.index.connection(), hash)?
                .ok_or_else(|| Error::NotFound(format!("missing content object '{}'", hash)))?;
            let file = file_io::open_read(&self.path.join(&path))?;
            let size = file.metadata()?.len();
            if size > 0 {
                let map = file_io::map_read(&file)?;
                sink(hash, &map, 0, size)?;
            } else {
                sink(hash, &[], 0, 0)?;
            }
        }
        Ok(())
    }

    pub fn validate(&self, sink: &mut ValidationSink<'_>) -> Result<(), Error> {
        for (path, hash, size) in catalog::deployed_validation_rows(self.index.connection())? {
            let file_path = self.path.join(&path);
            if !file_path.exists() {
                sink(&hash, &path, ValidationResult::Missing);
                continue;
            }
            let actual_size = match std::fs::metadata(&file_path) {
                Ok(metadata) => metadata.len(),
                Err(_) => {
                    sink(&hash, &path, ValidationResult::Corrupted);
                    continue;
                }
            };
            if actual_size != size as u64 {
                sink(&hash, &path, ValidationResult::Corrupted);
                continue;
            }
            // Zero-size files are valid without hashing
            if size != 0 {
                match HashSum::sha256_file(&file_path) {
                    Ok(actual) if actual == hash => {}
                    // A read failure mid-walk counts as corruption, not as
                    // a validation abort
                    _ => {
                        sink(&hash, &path, ValidationResult::Corrupted);
                        continue;
                    }
                }
            }
            sink(&hash, &path, ValidationResult::Ok);
        }
        Ok(())
    }

    /// Recover every missing or corrupted file from the source, writing the
    /// decoded bytes at their content offsets through write mappings.
    pub fn repair(
        &mut self,
        source: &mut Repository,
        decryption_key: Option<&str>,
        log: &Log,
    ) -> Result<(), Error> {
        let mut required = Vec::new();
        let mut target_paths: HashMap<HashSum, Vec<String>> = HashMap::new();
        self.validate(&mut |hash, path, result| {
            if result != ValidationResult::Ok {
                let entry = target_paths.entry(*hash).or_default();
                if entry.is_empty() {
                    required.push(*hash);
                }
                entry.push(path.to_owned());
            }
        })?;
        log.debug(
            "repair",
            &format!("recovering {} content objects", required.len()),
        );
        let root = self.path.clone();
        source.get_contents(&required, decryption_key, &mut |hash, data, offset, total| {
            for path in &target_paths[hash] {
                file_io::write_content_bytes(&root.join(path), data, offset, total)?;
            }
            Ok(())
        })
    }

    /// Bring the target from its current feature set to the desired one,
    /// fetching only contents it does not already have.
    pub fn configure(
        &mut self,
        source: &mut Repository,
        desired: &[Uuid],
        decryption_key: Option<&str>,
        log: &Log,
        progress: &mut ProgressHelper<'_>,
    ) -> Result<(), Error> {
        self.index.begin_write_ahead_log()?;

        self.remove_stale_staging(log)?;

        // Drop unreferenced contents left over from an interrupted run, so
        // a partially configured target is processable.
        catalog::collect_garbage_contents(self.index.connection())?;

        // Copy the source index next to ours so every following step can
        // join across both.
        self.index.attach_memory_copy("source", source.index())?;

        let result = self.configure_steps(source, desired, decryption_key, log, progress);

        let _ = self.index.detach("source");
        let _ = self
            .index
            .connection()
            .execute_batch("DROP TABLE IF EXISTS temp.pending_features;");

        if result.is_ok() {
            self.index.end_write_ahead_log()?;
            self.index.analyze()?;
        } else {
            let _ = self.index.end_write_ahead_log();
        }
        result
    }

    fn configure_steps(
        &mut self,
        source: &mut Repository,
        desired: &[Uuid],
        decryption_key: Option<&str>,
        log: &Log,
        progress: &mut ProgressHelper<'_>,
    ) -> Result<(), Error> {
        progress.start(2);
        progress.advance_stage("Setup");

        self.prepare_pending_features(desired, log, progress)?;
        self.update_features()?;
        self.rebind_unchanged_files()?;
        self.remove_changed_files(log)?;

        progress.advance_stage("Install");
        self.fetch_new_contents(source, decryption_key, log, progress)?;
        self.copy_existing_files(log)?;
        self.cleanup(log)?;
        Ok(())
    }

    /// Remove stale staging remnants of an interrupted prior run.
    fn remove_stale_staging(&self, log: &Log) -> Result<(), Error> {
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(STAGING_EXTENSION) {
                log.debug(
                    "configure",
                    &format!("removing stale staging file '{}'", path.display()),
                );
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Store the desired feature set in a temp table for the joins below.
    /// Every desired feature must exist in the source.
    fn prepare_pending_features(
        &mut self,
        desired: &[Uuid],
        log: &Log,
        progress: &mut ProgressHelper<'_>,
    ) -> Result<(), Error> {
        if desired.is_empty() {
            return Err(Error::InvalidArgument(
                "the desired feature set must not be empty".into(),
            ));
        }
        let conn = self.index.connection();
        conn.execute_batch(
            "DROP TABLE IF EXISTS temp.pending_features;
             CREATE TEMP TABLE pending_features (Uuid BLOB NOT NULL UNIQUE);",
        )?;
        let tx = conn.unchecked_transaction()?;
        {
            let mut known = conn.prepare("SELECT 1 FROM source.features WHERE Uuid = ?1")?;
            let mut insert = conn.prepare("INSERT INTO pending_features (Uuid) VALUES (?1)")?;
            progress.set_stage_target(desired.len() as i64);
            progress.set_action("Selecting features");
            for uuid in desired {
                if !known.exists(params![uuid.as_bytes().to_vec()])? {
                    return Err(Error::NotFound(format!("unknown feature '{}'", uuid)));
                }
                insert.execute(params![uuid.as_bytes().to_vec()])?;
                log.debug("configure", &format!("selected feature '{}'", uuid));
                progress.advance();
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Insert the pending features we do not have yet. Features already
    /// present with a matching UUID are left alone.
    fn update_features(&self) -> Result<(), Error> {
        self.index.connection().execute(
            "INSERT INTO features (Uuid, Title, Description)
             SELECT Uuid, Title, Description FROM source.features
             WHERE source.features.Uuid IN (SELECT Uuid FROM pending_features)
               AND source.features.Uuid NOT IN (SELECT Uuid FROM features)",
            [],
        )?;
        Ok(())
    }

    /// Files with unchanged path and content merely moved between features:
    /// point them at the feature row the new configuration uses.
    fn rebind_unchanged_files(&self) -> Result<(), Error> {
        self.index.connection().execute(
            "UPDATE fs_files SET FeatureId = (
                SELECT main.features.Id FROM main.features
                WHERE main.features.Uuid = (
                    SELECT source.features.Uuid FROM source.fs_files
                    INNER JOIN source.features
                        ON source.fs_files.FeatureId = source.features.Id
                    WHERE source.fs_files.Path = main.fs_files.Path))
             WHERE fs_files.Path IN (
                SELECT main.fs_files.Path FROM main.fs_files
                INNER JOIN main.fs_contents
                    ON main.fs_files.ContentId = main.fs_contents.Id
                INNER JOIN source.fs_files
                    ON source.fs_files.Path = main.fs_files.Path
                INNER JOIN source.fs_contents
                    ON source.fs_files.ContentId = source.fs_contents.Id
                WHERE main.fs_contents.Hash IS source.fs_contents.Hash
                  AND source.fs_files.FeatureId IN (
                      SELECT Id FROM source.features
                      WHERE Uuid IN (SELECT Uuid FROM pending_features)))",
            [],
        )?;
        Ok(())
    }

    /// Files whose path now maps to different content get removed; their
    /// replacements arrive with the new contents.
    fn remove_changed_files(&self, log: &Log) -> Result<(), Error> {
        let conn = self.index.connection();
        let changed: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT main.fs_files.Path FROM main.fs_files
                 INNER JOIN main.fs_contents
                     ON main.fs_files.ContentId = main.fs_contents.Id
                 INNER JOIN source.fs_files
                     ON source.fs_files.Path = main.fs_files.Path
                 INNER JOIN source.fs_contents
                     ON source.fs_files.ContentId = source.fs_contents.Id
                 WHERE main.fs_contents.Hash IS NOT source.fs_contents.Hash
                   AND source.fs_files.FeatureId IN (
                       SELECT Id FROM source.features
                       WHERE Uuid IN (SELECT Uuid FROM pending_features))",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            let mut paths = Vec::new();
            for row in rows {
                paths.push(row?);
            }
            paths
        };
        let tx = conn.unchecked_transaction()?;
        {
            let mut delete = conn.prepare("DELETE FROM fs_files WHERE Path = ?1")?;
            for path in &changed {
                delete.execute(params![path])?;
                remove_file_if_exists(&self.path.join(path))?;
                log.debug("configure", &format!("deleted changed file '{}'", path));
            }
        }
        tx.commit()?;
        catalog::collect_garbage_contents(conn)?;
        Ok(())
    }

    /// Fetch the contents we lack, apply them to the file system and record
    /// the new rows. Each completed content commits on its own.
    fn fetch_new_contents(
        &mut self,
        source: &mut Repository,
        decryption_key: Option<&str>,
        log: &Log,
        progress: &mut ProgressHelper<'_>,
    ) -> Result<(), Error> {
        let conn = self.index.connection();
        let required: Vec<HashSum> = {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT source.fs_contents.Hash FROM source.fs_contents
                 INNER JOIN source.fs_files
                     ON source.fs_contents.Id = source.fs_files.ContentId
                 WHERE source.fs_files.FeatureId IN (
                       SELECT Id FROM source.features
                       WHERE Uuid IN (SELECT Uuid FROM pending_features))
                   AND source.fs_contents.Hash NOT IN (SELECT Hash FROM main.fs_contents)",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
            let mut hashes = Vec::new();
            for row in rows {
                hashes.push(HashSum::from_slice(&row?)?);
            }
            hashes
        };
        for hash in &required {
            log.debug("configure", &format!("discovered content object '{}'", hash));
        }
        progress.set_stage_target(required.len() as i64);

        let root = self.path.clone();
        let mut insert_content =
            conn.prepare("INSERT INTO fs_contents (Hash, Size) VALUES (?1, ?2)")?;
        let mut target_paths = conn.prepare(
            "SELECT Path FROM source.fs_files
             WHERE ContentId = (SELECT Id FROM source.fs_contents WHERE Hash = ?1)
               AND FeatureId IN (
                   SELECT Id FROM source.features
                   WHERE Uuid IN (SELECT Uuid FROM pending_features))",
        )?;
        let mut insert_file = conn.prepare(
            "INSERT INTO main.fs_files (Path, ContentId, FeatureId)
             SELECT ?1, ?2, main.features.Id FROM source.fs_files
             INNER JOIN source.features ON source.features.Id = source.fs_files.FeatureId
             INNER JOIN main.features ON source.features.Uuid = main.features.Uuid
             WHERE source.fs_files.Path = ?3",
        )?;

        // Chunks of one content must tile it front to back; anything else
        // means the source index is damaged
        let mut expected_offsets: HashMap<HashSum, u64> = HashMap::new();
        let mut sink = |hash: &HashSum, data: &[u8], offset: u64, total: u64| -> Result<(), Error> {
            let staging_path = root.join(format!("{}.{}", hash, STAGING_EXTENSION));
            let single_shot = offset == 0 && data.len() as u64 == total;
            if !single_shot {
                let expected = expected_offsets.entry(*hash).or_insert(0);
                if offset != *expected {
                    return Err(Error::StorageCorrupted(format!(
                        "chunks for content '{}' arrived out of order",
                        hash
                    )));
                }
                *expected += data.len() as u64;
                let mut file = if offset == 0 {
                    log.debug(
                        "configure",
                        &format!("created staging file '{}'", staging_path.display()),
                    );
                    file_io::create_sized(&staging_path, total)?
                } else {
                    file_io::open_write(&staging_path)?
                };
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(data)?;
                if offset + data.len() as u64 != total {
                    return Ok(());
                }
                expected_offsets.remove(hash);
            }

            // The content is complete; move it to its target paths and
            // record it in one transaction.
            let tx = conn.unchecked_transaction()?;
            let content_id = insert_content.insert(params![hash.as_slice(), total as i64])?;
            log.debug(
                "configure",
                &format!("received content object '{}' ({} bytes)", hash, total),
            );
            let paths: Vec<String> = {
                let rows = target_paths.query_map(params![hash.as_slice()], |row| row.get(0))?;
                let mut paths = Vec::new();
                for row in rows {
                    paths.push(row?);
                }
                paths
            };
            let mut previous: Option<PathBuf> = None;
            for path in &paths {
                progress.set_action(path);
                let target = root.join(path);
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                match &previous {
                    None if !single_shot => {
                        std::fs::rename(&staging_path, &target)?;
                    }
                    None => {
                        let mut file = file_io::create_with_parents(&target)?;
                        file.write_all(data)?;
                    }
                    Some(previous) => {
                        // Same declared content twice: copy, do not link
                        std::fs::copy(previous, &target)?;
                    }
                }
                insert_file.execute(params![path, content_id, path])?;
                log.debug("configure", &format!("wrote file '{}'", path));
                previous = Some(target);
            }
            tx.commit()?;
            progress.advance();
            Ok(())
        };
        source.get_contents(&required, decryption_key, &mut sink)
    }

    /// Pending files whose content is already present under another path
    /// only need a local copy, not a fetch.
    fn copy_existing_files(&self, log: &Log) -> Result<(), Error> {
        let conn = self.index.connection();
        let missing: Vec<(String, HashSum)> = {
            let mut stmt = conn.prepare(
                "SELECT source.fs_files.Path, source.fs_contents.Hash
                 FROM source.fs_contents
                 INNER JOIN source.fs_files
                     ON source.fs_contents.Id = source.fs_files.ContentId
                 WHERE source.fs_files.FeatureId IN (
                       SELECT Id FROM source.features
                       WHERE Uuid IN (SELECT Uuid FROM pending_features))
                   AND source.fs_files.Path NOT IN (SELECT Path FROM main.fs_files)",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;
            let mut result = Vec::new();
            for row in rows {
                let (path, hash) = row?;
                result.push((path, HashSum::from_slice(&hash)?));
            }
            result
        };
        if missing.is_empty() {
            return Ok(());
        }
        let tx = conn.unchecked_transaction()?;
        {
            let mut exemplar = conn.prepare(
                "SELECT fs_files.Path, fs_contents.Id FROM fs_files
                 INNER JOIN fs_contents ON fs_files.ContentId = fs_contents.Id
                 WHERE fs_contents.Hash = ?1
                 LIMIT 1",
            )?;
            let mut insert_file = conn.prepare(
                "INSERT INTO main.fs_files (Path, ContentId, FeatureId)
                 SELECT ?1, ?2, main.features.Id FROM source.fs_files
                 INNER JOIN source.features ON source.features.Id = source.fs_files.FeatureId
                 INNER JOIN main.features ON source.features.Uuid = main.features.Uuid
                 WHERE source.fs_files.Path = ?3",
            )?;
            for (path, hash) in &missing {
                let (exemplar_path, content_id): (String, i64) = exemplar
                    .query_row(params![hash.as_slice()], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })
                    .optional()?
                    .ok_or_else(|| {
                        Error::IndexViolation(format!(
                            "no local copy of content '{}' for '{}'",
                            hash, path
                        ))
                    })?;
                let target = self.path.join(path);
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(self.path.join(&exemplar_path), &target)?;
                insert_file.execute(params![path, content_id, path])?;
                log.debug(
                    "configure",
                    &format!("copied file '{}' to '{}'", exemplar_path, path),
                );
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove files, features and contents no longer part of the desired
    /// set, in that order to keep referential integrity.
    fn cleanup(&self, log: &Log) -> Result<(), Error> {
        let conn = self.index.connection();
        let unused: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT Path FROM fs_files WHERE FeatureId NOT IN (
                    SELECT Id FROM features
                    WHERE features.Uuid IN (SELECT Uuid FROM pending_features))",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            let mut paths = Vec::new();
            for row in rows {
                paths.push(row?);
            }
            paths
        };
        {
            let tx = conn.unchecked_transaction()?;
            {
                let mut delete = conn.prepare("DELETE FROM fs_files WHERE Path = ?1")?;
                for path in &unused {
                    delete.execute(params![path])?;
                    remove_file_if_exists(&self.path.join(path))?;
                    log.debug("configure", &format!("deleted file '{}'", path));
                }
            }
            tx.commit()?;
        }

        conn.execute(
            "DELETE FROM features
             WHERE features.Uuid NOT IN (SELECT Uuid FROM pending_features)",
            [],
        )?;
        let collected = catalog::collect_garbage_contents(conn)?;
        log.debug(
            "configure",
            &format!("removed {} unused content objects", collected),
        );
        Ok(())
    }
}
