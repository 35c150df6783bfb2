use anyhow::{Context, Result};
use clap::ArgMatches;
use log::*;

use kylar::{
    FeatureProperty, Installer, PropertyValue, RepositoryOptions, RepositoryProperty,
    API_VERSION_2_0,
};

use crate::string_utils::size_to_str;

pub fn run(matches: &ArgMatches) -> Result<()> {
    let source_location = matches.get_one::<String>("SOURCE").expect("required");

    let installer = Installer::new(API_VERSION_2_0)?;
    let source = installer
        .open_source_repository(source_location, RepositoryOptions::default())
        .with_context(|| format!("unable to open source repository '{}'", source_location))?;

    if let PropertyValue::Int(encrypted) =
        installer.get_repository_property(&source, RepositoryProperty::IsEncrypted)?
    {
        if encrypted != 0 {
            info!("Repository is encrypted");
        }
    }

    let features = match installer
        .get_repository_property(&source, RepositoryProperty::AvailableFeatures)?
    {
        PropertyValue::Uuids(features) => features,
        _ => Vec::new(),
    };
    info!("{} feature(s):", features.len());
    for feature in &features {
        let size = match installer.get_feature_property(&source, feature, FeatureProperty::Size)? {
            PropertyValue::Int(size) => size,
            _ => 0,
        };
        info!("  {}  {}", feature, size_to_str(size as u64));
        if let PropertyValue::Dependencies(dependencies) =
            installer.get_feature_property(&source, feature, FeatureProperty::Dependencies)?
        {
            for dependency in dependencies {
                info!("    {} {}", dependency.relation, dependency.target);
            }
        }
    }
    Ok(())
}
