mod builder;
mod catalog;
mod compression;
mod deployed;
mod encryption;
mod error;
mod file_io;
mod hashsum;
mod index;
mod installer;
mod logging;
mod loose;
mod package;
mod packed;
mod pipeline;
mod progress;
mod remote;
mod repository;

pub use builder::{
    build_repository, BuildOptions, BuildStatistics, FeatureDescription, FileDescription,
    GroupDescription, PackageDescription, RepositoryDescriptor, RepositoryLayout,
    DEFAULT_CHUNK_SIZE,
};
pub use catalog::{FeatureDependency, FeatureDetails, RELATION_REQUIRES};
pub use compression::{Compression, CompressionError, DEFAULT_BROTLI_QUALITY};
pub use error::Error;
pub use hashsum::{HashSum, HASH_SIZE};
pub use index::{Index, OpenMode};
pub use installer::{
    make_api_version, Action, FeatureProperty, Installer, PropertyValue, RepositoryOptions,
    RepositoryProperty, ResultCode, SourceRepository, TargetRepository, ValidationCallback,
    API_VERSION_2_0,
};
pub use logging::{Log, LogCallback, LogSeverity};
pub use package::{PACKAGE_HEADER_SIZE, PACKAGE_MAGIC, PACKAGE_VERSION};
pub use pipeline::DEFAULT_QUEUE_BUDGET;
pub use progress::{Progress, ProgressCallback, ProgressHelper};
pub use repository::{deploy, ContentSink, Repository, ValidationResult, ValidationSink};

/// Typed feature queries over an open repository, for hosts that want more
/// than the property surface.
pub mod features {
    pub use crate::catalog::{
        feature_dependencies, feature_details, feature_file_count, feature_size, feature_uuids,
        is_encrypted,
    };
}
