use std::path::{Path, PathBuf};

use crate::catalog;
use crate::file_io;
use crate::index::{Index, OpenMode};
use crate::repository::{ContentSink, Repository, ValidationResult, ValidationSink};
use crate::{Error, HashSum};

/// Directory holding the index and the object store of a loose repository.
pub const KY_DIRECTORY: &str = ".ky";

const OBJECTS_DIRECTORY: &str = "objects";

/// A repository storing every content as a standalone, untransformed file
/// under `.ky/objects/<hex digest>`.
pub struct LooseRepository {
    index: Index,
    path: PathBuf,
}

impl LooseRepository {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let index = Index::open(
            &path.join(KY_DIRECTORY).join("repository.db"),
            OpenMode::Read,
        )?;
        Ok(Self {
            index,
            path: path.to_owned(),
        })
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    fn object_path(&self, hash: &HashSum) -> PathBuf {
        self.path
            .join(KY_DIRECTORY)
            .join(OBJECTS_DIRECTORY)
            .join(hash.to_string())
    }

    /// Deliver each requested content as a single full-range callback. The
    /// repository must be in a valid state; a missing object is an error
    /// here, not a validation report.
    pub fn get_contents(
        &mut self,
        requested: &[HashSum],
        sink: &mut ContentSink<'_>,
    ) -> Result<(), Error> {
        for hash in requested {
            let object_path = self.object_path(hash);
            let file = file_io::open_read(&object_path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::NotFound(format!("missing content object '{}'", hash))
                } else {
                    Error::Io(e)
                }
            })?;
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
        for (hash, size) in catalog::content_validation_rows(self.index.connection())? {
            let object_path = self.object_path(&hash);
            let name = object_path.to_string_lossy().into_owned();
            if !object_path.exists() {
                sink(&hash, &name, ValidationResult::Missing);
                continue;
            }
            let actual_size = match std::fs::metadata(&object_path) {
                Ok(metadata) => metadata.len(),
                Err(_) => {
                    sink(&hash, &name, ValidationResult::Corrupted);
                    continue;
                }
            };
            if actual_size != size as u64 {
                sink(&hash, &name, ValidationResult::Corrupted);
                continue;
            }
            // Zero-size objects are valid without hashing
            if size != 0 {
                match HashSum::sha256_file(&object_path) {
                    Ok(actual) if actual == hash => {}
                    _ => {
                        sink(&hash, &name, ValidationResult::Corrupted);
                        continue;
                    }
                }
            }
            sink(&hash, &name, ValidationResult::Ok);
        }
        Ok(())
    }

    /// Re-fetch every missing or corrupted object from the source.
    pub fn repair(
        &mut self,
        source: &mut Repository,
        decryption_key: Option<&str>,
    ) -> Result<(), Error> {
        let mut required = Vec::new();
        self.validate(&mut |hash, _name, result| {
            if result != ValidationResult::Ok {
                required.push(*hash);
            }
        })?;
        log::debug!("repairing {} content objects", required.len());
        let objects_root = self.path.join(KY_DIRECTORY).join(OBJECTS_DIRECTORY);
        source.get_contents(&required, decryption_key, &mut |hash, data, offset, total| {
            file_io::write_content_bytes(&objects_root.join(hash.to_string()), data, offset, total)
                .map_err(Error::Io)
        })
    }
}
