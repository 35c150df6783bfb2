use std::path::{Path, PathBuf};

use crate::catalog::{self, ChunkRecord};
use crate::encryption::Decryptor;
use crate::index::{Index, OpenMode};
use crate::package::{LocalPackageFile, PackageFile};
use crate::pipeline::{run_stage, BoundedQueue, ErrorState, DEFAULT_QUEUE_BUDGET};
use crate::repository::{ContentSink, ValidationResult, ValidationSink};
use crate::{Error, HashSum};

/// A read-only repository packing its contents into `.kypkg` files next to
/// `repository.db`.
pub struct PackedRepository {
    index: Index,
    path: PathBuf,
}

impl PackedRepository {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let index = Index::open(&path.join("repository.db"), OpenMode::Read)?;
        Ok(Self {
            index,
            path: path.to_owned(),
        })
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    fn open_package(&self, filename: &str) -> Result<Box<dyn PackageFile>, Error> {
        Ok(Box::new(LocalPackageFile::open(&self.path.join(filename))?))
    }

    pub fn get_contents(
        &mut self,
        requested: &[HashSum],
        decryption_key: Option<&str>,
        sink: &mut ContentSink<'_>,
    ) -> Result<(), Error> {
        fetch_contents(
            &self.index,
            requested,
            decryption_key,
            |filename| self.open_package(filename),
            sink,
        )
    }

    pub fn validate(
        &mut self,
        decryption_key: Option<&str>,
        sink: &mut ValidationSink<'_>,
    ) -> Result<(), Error> {
        validate_chunks(
            &self.index,
            decryption_key,
            |filename| self.open_package(filename),
            sink,
        )
    }
}

/// What travels through the pipeline queues: one chunk's metadata plus its
/// current byte buffer (raw after the read stage, decoded after the
/// process stage).
struct PipelineItem {
    record: ChunkRecord,
    data: Vec<u8>,
}

/// Stream the requested contents out of their packages, shared by the local
/// and remote packed layouts.
///
/// Packages are processed sequentially; within one package the three
/// pipeline stages run concurrently.
pub(crate) fn fetch_contents<F>(
    index: &Index,
    requested: &[HashSum],
    decryption_key: Option<&str>,
    mut open_package: F,
    sink: &mut ContentSink<'_>,
) -> Result<(), Error>
where
    F: FnMut(&str) -> Result<Box<dyn PackageFile>, Error>,
{
    if requested.is_empty() {
        return Ok(());
    }
    let decryptor = decryption_key.map(Decryptor::new);
    let conn = index.connection();
    catalog::create_requested_contents(conn, requested)?;
    let result = (|| {
        for (package_id, filename) in catalog::requested_packages(conn)? {
            let records = catalog::requested_chunks_in_package(conn, package_id)?;
            if decryptor.is_none() && records.iter().any(|r| r.encryption.is_some()) {
                return Err(Error::AuthRequired);
            }
            log::debug!("fetching {} chunks from '{}'", records.len(), filename);
            let mut package = open_package(&filename)?;
            run_package_pass(package.as_mut(), records, decryptor.as_ref(), sink)?;
        }
        Ok(())
    })();
    let _ = catalog::drop_requested_contents(conn);
    result
}

/// One pass over one package: a reader and a processor task feed the sink,
/// which runs on the calling thread so it may touch the caller's index.
fn run_package_pass(
    package: &mut dyn PackageFile,
    records: Vec<ChunkRecord>,
    decryptor: Option<&Decryptor>,
    sink: &mut ContentSink<'_>,
) -> Result<(), Error> {
    let process_queue: BoundedQueue<PipelineItem> =
        BoundedQueue::new(DEFAULT_QUEUE_BUDGET, |item: &PipelineItem| item.data.len() as u64);
    let output_queue: BoundedQueue<PipelineItem> =
        BoundedQueue::new(DEFAULT_QUEUE_BUDGET, |item: &PipelineItem| item.data.len() as u64);
    let error_state = ErrorState::new(vec![&process_queue, &output_queue]);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            run_stage(&error_state, || {
                for record in records {
                    if error_state.is_signaled() {
                        break;
                    }
                    let mut data = vec![0u8; record.package_size as usize];
                    package.read_at(record.package_offset, &mut data)?;
                    process_queue.insert(PipelineItem { record, data });
                }
                Ok(())
            });
            process_queue.close();
        });

        scope.spawn(|| {
            run_stage(&error_state, || {
                while let Some(item) = process_queue.get() {
                    if error_state.is_signaled() {
                        break;
                    }
                    let item = decode_chunk(item, decryptor)?;
                    output_queue.insert(item);
                }
                Ok(())
            });
            output_queue.close();
        });

        run_stage(&error_state, || {
            while let Some(item) = output_queue.get() {
                sink(
                    &item.record.content_hash,
                    &item.data,
                    item.record.source_offset,
                    item.record.total_size,
                )?;
            }
            Ok(())
        });
    });

    match error_state.into_error() {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Decrypt, verify and decompress one chunk. The stored hash covers the
/// compressed bytes before encryption, so it is checked after decrypting
/// and before decompressing.
fn decode_chunk(item: PipelineItem, decryptor: Option<&Decryptor>) -> Result<PipelineItem, Error> {
    let PipelineItem { record, mut data } = item;
    if let Some(encryption) = &record.encryption {
        let decryptor = decryptor.ok_or(Error::AuthRequired)?;
        data = decryptor.decrypt(&data, &encryption.data)?;
    }
    if let Some(storage_hash) = &record.storage_hash {
        if HashSum::sha256(&data) != *storage_hash {
            return Err(Error::StorageCorrupted(format!(
                "stored data for content '{}' is corrupted",
                record.content_hash
            )));
        }
    }
    if let Some(compression) = &record.compression {
        data = compression
            .compression
            .decompress(&data, compression.input_size as usize)?;
    }
    Ok(PipelineItem { record, data })
}

/// Chunk-level validation of every package, shared by the local and remote
/// packed layouts. Per-chunk problems are reported through the sink; only
/// index access failures and a missing key raise.
pub(crate) fn validate_chunks<F>(
    index: &Index,
    decryption_key: Option<&str>,
    mut open_package: F,
    sink: &mut ValidationSink<'_>,
) -> Result<(), Error>
where
    F: FnMut(&str) -> Result<Box<dyn PackageFile>, Error>,
{
    let decryptor = decryption_key.map(Decryptor::new);
    let conn = index.connection();
    for (package_id, filename) in catalog::all_packages(conn)? {
        let records = catalog::chunks_in_package(conn, package_id)?;
        if decryptor.is_none() && records.iter().any(|r| r.encryption.is_some()) {
            return Err(Error::AuthRequired);
        }
        let mut package = match open_package(&filename) {
            Ok(package) => package,
            Err(Error::NotFound(_)) => {
                for record in &records {
                    sink(&record.content_hash, &filename, ValidationResult::Missing);
                }
                continue;
            }
            Err(Error::StorageCorrupted(_)) => {
                for record in &records {
                    sink(&record.content_hash, &filename, ValidationResult::Corrupted);
                }
                continue;
            }
            Err(error) => return Err(error),
        };
        for record in &records {
            let Some(storage_hash) = &record.storage_hash else {
                // Zero-size chunks carry no hash and nothing to check.
                sink(&record.content_hash, &filename, ValidationResult::Ok);
                continue;
            };
            let mut data = vec![0u8; record.package_size as usize];
            if package.read_at(record.package_offset, &mut data).is_err() {
                sink(&record.content_hash, &filename, ValidationResult::Corrupted);
                continue;
            }
            if let Some(encryption) = &record.encryption {
                // Checked above; all encrypted chunks need the decryptor.
                let decryptor = decryptor.as_ref().ok_or(Error::AuthRequired)?;
                match decryptor.decrypt(&data, &encryption.data) {
                    Ok(decrypted) => data = decrypted,
                    Err(_) => {
                        sink(&record.content_hash, &filename, ValidationResult::Corrupted);
                        continue;
                    }
                }
            }
            let result = if HashSum::sha256(&data) == *storage_hash {
                ValidationResult::Ok
            } else {
                ValidationResult::Corrupted
            };
            sink(&record.content_hash, &filename, result);
        }
    }
    Ok(())
}
