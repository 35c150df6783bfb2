use std::path::Path;
use uuid::Uuid;

use crate::deployed::DeployedRepository;
use crate::index::{Index, OpenMode};
use crate::logging::Log;
use crate::loose::{LooseRepository, KY_DIRECTORY};
use crate::packed::PackedRepository;
use crate::progress::ProgressHelper;
use crate::remote::RemoteRepository;
use crate::{Error, HashSum};

/// Per-file (or per-chunk) outcome of a validation walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    Ok,
    Corrupted,
    Missing,
}

/// Receives each decoded run of a content:
/// `(content hash, bytes, offset within the content, total content size)`.
/// Runs of one content arrive in increasing offset order.
pub type ContentSink<'a> = dyn FnMut(&HashSum, &[u8], u64, u64) -> Result<(), Error> + 'a;

/// Receives `(content hash, file name, result)` for every validated item.
pub type ValidationSink<'a> = dyn FnMut(&HashSum, &str, ValidationResult) + 'a;

/// A repository of any layout. The layout is sniffed at open time; every
/// operation dispatches on it.
pub enum Repository {
    Loose(LooseRepository),
    Packed(PackedRepository),
    Remote(RemoteRepository),
    Deployed(DeployedRepository),
}

impl Repository {
    /// Open a repository at a directory path or an http(s) url.
    ///
    /// A `.ky` directory marks a loose repository, a `repository.db` a
    /// packed one; everything else is assumed deployed.
    pub fn open(location: &str, mode: OpenMode) -> Result<Self, Error> {
        if location.starts_with("http") {
            return Ok(Repository::Remote(RemoteRepository::open(location)?));
        }
        let path = Path::new(location);
        if path.join(KY_DIRECTORY).exists() {
            Ok(Repository::Loose(LooseRepository::open(path)?))
        } else if path.join("repository.db").exists() {
            Ok(Repository::Packed(PackedRepository::open(path)?))
        } else {
            Ok(Repository::Deployed(DeployedRepository::open(path, mode)?))
        }
    }

    pub fn index(&self) -> &Index {
        match self {
            Repository::Loose(r) => r.index(),
            Repository::Packed(r) => r.index(),
            Repository::Remote(r) => r.index(),
            Repository::Deployed(r) => r.index(),
        }
    }

    /// Stream the requested contents to the sink. The decryption key only
    /// matters for packed layouts with encrypted chunks.
    pub fn get_contents(
        &mut self,
        requested: &[HashSum],
        decryption_key: Option<&str>,
        sink: &mut ContentSink<'_>,
    ) -> Result<(), Error> {
        match self {
            Repository::Loose(r) => r.get_contents(requested, sink),
            Repository::Packed(r) => r.get_contents(requested, decryption_key, sink),
            Repository::Remote(r) => r.get_contents(requested, decryption_key, sink),
            Repository::Deployed(r) => r.get_contents(requested, sink),
        }
    }

    /// Walk the index and check every stored item. Read-only; per-item
    /// problems go to the sink, only index access failures raise.
    pub fn validate(
        &mut self,
        decryption_key: Option<&str>,
        sink: &mut ValidationSink<'_>,
    ) -> Result<(), Error> {
        match self {
            Repository::Loose(r) => r.validate(sink),
            Repository::Packed(r) => r.validate(decryption_key, sink),
            Repository::Remote(r) => r.validate(decryption_key, sink),
            Repository::Deployed(r) => r.validate(sink),
        }
    }

    /// Bring a deployed target to the desired feature set.
    pub fn configure(
        &mut self,
        source: &mut Repository,
        desired: &[Uuid],
        decryption_key: Option<&str>,
        log: &Log,
        progress: &mut ProgressHelper<'_>,
    ) -> Result<(), Error> {
        match self {
            Repository::Deployed(r) => {
                r.configure(source, desired, decryption_key, log, progress)
            }
            _ => Err(Error::NotImplemented(
                "configure requires a deployed target",
            )),
        }
    }

    /// Recover missing or corrupted items from the source.
    pub fn repair(
        &mut self,
        source: &mut Repository,
        decryption_key: Option<&str>,
        log: &Log,
    ) -> Result<(), Error> {
        match self {
            Repository::Deployed(r) => r.repair(source, decryption_key, log),
            Repository::Loose(r) => r.repair(source, decryption_key),
            _ => Err(Error::NotImplemented(
                "repair requires a deployed or loose target",
            )),
        }
    }
}

/// Install: create the target directory, initialise its index and configure
/// it to the desired feature set.
pub fn deploy(
    source: &mut Repository,
    target_directory: &Path,
    desired: &[Uuid],
    decryption_key: Option<&str>,
    log: &Log,
    progress: &mut ProgressHelper<'_>,
) -> Result<Repository, Error> {
    let repository = DeployedRepository::create_from(
        source,
        desired,
        target_directory,
        decryption_key,
        log,
        progress,
    )?;
    Ok(Repository::Deployed(repository))
}
