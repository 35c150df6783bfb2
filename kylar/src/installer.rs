use std::path::PathBuf;
use uuid::Uuid;

use crate::catalog::{self, FeatureDependency};
use crate::index::OpenMode;
use crate::logging::{Log, LogCallback};
use crate::progress::{Progress, ProgressCallback, ProgressHelper};
use crate::repository::{self, Repository, ValidationResult};
use crate::Error;

/// Build an API version constant: major.minor.patch.
pub const fn make_api_version(major: u32, minor: u32, patch: u32) -> u32 {
    major << 22 | minor << 12 | patch
}

/// The API version this crate implements.
pub const API_VERSION_2_0: u32 = make_api_version(2, 0, 0);

/// Status codes for boundary use. Library calls return `Result`; hosts
/// which need a flat code (process exit status, FFI) map through this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok = 0,
    Error = 1,
    ErrorInvalidArgument = 2,
    ErrorUnsupportedApiVersion = 3,
}

impl ResultCode {
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::InvalidArgument(_) => ResultCode::ErrorInvalidArgument,
            Error::UnsupportedApiVersion(_) => ResultCode::ErrorUnsupportedApiVersion,
            _ => ResultCode::Error,
        }
    }

    pub fn of<T>(result: &Result<T, Error>) -> Self {
        match result {
            Ok(_) => ResultCode::Ok,
            Err(error) => Self::from_error(error),
        }
    }
}

/// The actions `execute` can run against a target repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Install,
    Configure,
    Repair,
    Verify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryProperty {
    /// The available feature UUIDs.
    AvailableFeatures,
    /// Whether any chunk is encrypted.
    IsEncrypted,
    /// The key used for encrypted repositories. Write only.
    DecryptionKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureProperty {
    /// Installed byte size of the feature.
    Size,
    /// The dependencies the feature declares.
    Dependencies,
}

/// A property value crossing the installer boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Int(i64),
    Bytes(Vec<u8>),
    Uuids(Vec<Uuid>),
    Dependencies(Vec<FeatureDependency>),
}

/// Flags for opening repositories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepositoryOptions {
    /// The target will be initialised during `execute(Install)`.
    pub create: bool,
    /// Open without write access; only `Verify` is possible then.
    pub read_only: bool,
}

/// A source repository handle. Sources are always opened read-only.
pub struct SourceRepository {
    repository: Repository,
    decryption_key: Option<String>,
}

impl SourceRepository {
    pub fn repository(&mut self) -> &mut Repository {
        &mut self.repository
    }
}

/// A target repository handle. The path is recorded on open; the
/// repository itself is opened (or created) when an action executes.
pub struct TargetRepository {
    path: PathBuf,
    create: bool,
    read_only: bool,
    repository: Option<Repository>,
}

impl TargetRepository {
    fn open(&mut self, mode: OpenMode) -> Result<&mut Repository, Error> {
        if let Some(ref mut repository) = self.repository {
            return Ok(repository);
        }
        let location = self.path.to_string_lossy().into_owned();
        let repository = Repository::open(&location, mode)?;
        Ok(self.repository.insert(repository))
    }

    pub fn repository(&mut self) -> Option<&mut Repository> {
        self.repository.as_mut()
    }
}

/// Receives `(result, file name)` for every item a `Verify` walks.
pub type ValidationCallback = Box<dyn Fn(ValidationResult, &str) + Send>;

/// The stable entry point: callbacks, repository handles, properties and
/// the four actions.
pub struct Installer {
    log: Log,
    progress: Progress,
    validation_callback: Option<ValidationCallback>,
}

impl Installer {
    pub fn new(api_version: u32) -> Result<Self, Error> {
        if api_version != API_VERSION_2_0 {
            return Err(Error::UnsupportedApiVersion(api_version));
        }
        Ok(Self {
            log: Log::default(),
            progress: Progress::default(),
            validation_callback: None,
        })
    }

    pub fn set_log_callback(&mut self, callback: LogCallback) {
        self.log = Log::new(callback);
    }

    pub fn set_progress_callback(&mut self, callback: ProgressCallback) {
        self.progress = Progress::new(callback);
    }

    pub fn set_validation_callback(&mut self, callback: ValidationCallback) {
        self.validation_callback = Some(callback);
    }

    /// Open a source repository at a path or http(s) url.
    pub fn open_source_repository(
        &self,
        location: &str,
        _options: RepositoryOptions,
    ) -> Result<SourceRepository, Error> {
        Ok(SourceRepository {
            repository: Repository::open(location, OpenMode::Read)?,
            decryption_key: None,
        })
    }

    /// Open a target repository. With `create` set the target is
    /// initialised during `execute(Install)`.
    pub fn open_target_repository(
        &self,
        path: &str,
        options: RepositoryOptions,
    ) -> Result<TargetRepository, Error> {
        if path.starts_with("http") {
            return Err(Error::InvalidArgument(
                "a target repository must be local".into(),
            ));
        }
        Ok(TargetRepository {
            path: PathBuf::from(path),
            create: options.create,
            read_only: options.read_only,
            repository: None,
        })
    }

    pub fn get_repository_property(
        &self,
        repository: &SourceRepository,
        property: RepositoryProperty,
    ) -> Result<PropertyValue, Error> {
        let conn = repository.repository.index().connection();
        match property {
            RepositoryProperty::AvailableFeatures => {
                Ok(PropertyValue::Uuids(catalog::feature_uuids(conn)?))
            }
            RepositoryProperty::IsEncrypted => Ok(PropertyValue::Int(i64::from(
                catalog::is_encrypted(conn)?,
            ))),
            RepositoryProperty::DecryptionKey => Err(Error::InvalidArgument(
                "the decryption key can only be set".into(),
            )),
        }
    }

    pub fn set_repository_property(
        &self,
        repository: &mut SourceRepository,
        property: RepositoryProperty,
        value: PropertyValue,
    ) -> Result<(), Error> {
        match (property, value) {
            (RepositoryProperty::DecryptionKey, PropertyValue::Bytes(bytes)) => {
                let key = String::from_utf8(bytes).map_err(|_| {
                    Error::InvalidArgument("the decryption key must be valid utf-8".into())
                })?;
                repository.decryption_key = Some(key);
                Ok(())
            }
            _ => Err(Error::InvalidArgument(
                "unsupported property for set_repository_property".into(),
            )),
        }
    }

    pub fn get_feature_property(
        &self,
        repository: &SourceRepository,
        feature: &Uuid,
        property: FeatureProperty,
    ) -> Result<PropertyValue, Error> {
        let conn = repository.repository.index().connection();
        match property {
            FeatureProperty::Size => Ok(PropertyValue::Int(catalog::feature_size(conn, feature)?)),
            FeatureProperty::Dependencies => Ok(PropertyValue::Dependencies(
                catalog::feature_dependencies(conn, feature)?,
            )),
        }
    }

    /// Execute an action against a target repository. `Install` and
    /// `Configure` require a desired feature set; everything but `Verify`
    /// requires a source.
    pub fn execute(
        &mut self,
        action: Action,
        target: &mut TargetRepository,
        source: Option<&mut SourceRepository>,
        desired: Option<&[Uuid]>,
    ) -> Result<(), Error> {
        if matches!(action, Action::Install | Action::Configure) {
            match desired {
                None => {
                    return Err(Error::InvalidArgument(
                        "a desired feature set is required".into(),
                    ))
                }
                Some(desired) if desired.is_empty() => {
                    return Err(Error::InvalidArgument(
                        "the desired feature set must not be empty".into(),
                    ))
                }
                Some(_) => {}
            }
        }
        if target.read_only && action != Action::Verify {
            return Err(Error::InvalidArgument(
                "the target repository is read-only".into(),
            ));
        }
        let mut progress = ProgressHelper::new(&self.progress);
        match action {
            Action::Install => {
                let source = require_source(source)?;
                if !target.create {
                    return Err(Error::InvalidArgument(
                        "install requires a target opened with the create option".into(),
                    ));
                }
                let desired = desired.unwrap_or_default();
                let repository = repository::deploy(
                    &mut source.repository,
                    &target.path,
                    desired,
                    source.decryption_key.as_deref(),
                    &self.log,
                    &mut progress,
                )?;
                target.repository = Some(repository);
                Ok(())
            }
            Action::Configure => {
                let source = require_source(source)?;
                let key = source.decryption_key.clone();
                let desired = desired.unwrap_or_default();
                target.open(OpenMode::ReadWrite)?.configure(
                    &mut source.repository,
                    desired,
                    key.as_deref(),
                    &self.log,
                    &mut progress,
                )
            }
            Action::Repair => {
                let source = require_source(source)?;
                let key = source.decryption_key.clone();
                target.open(OpenMode::ReadWrite)?.repair(
                    &mut source.repository,
                    key.as_deref(),
                    &self.log,
                )
            }
            Action::Verify => {
                let callback = self.validation_callback.as_ref();
                target
                    .open(OpenMode::Read)?
                    .validate(None, &mut |_hash, name, result| {
                        if let Some(callback) = callback {
                            callback(result, name);
                        }
                    })
            }
        }
    }
}

fn require_source(
    source: Option<&mut SourceRepository>,
) -> Result<&mut SourceRepository, Error> {
    source.ok_or_else(|| Error::InvalidArgument("a source repository is required".into()))
}
