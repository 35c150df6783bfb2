use anyhow::{Context, Result};
use clap::ArgMatches;
use log::*;

use kylar::{
    Action, Installer, PropertyValue, RepositoryOptions, RepositoryProperty, API_VERSION_2_0,
};

use crate::parse_uuid;

/// Shared driver for `install` and `configure`.
pub fn run(action: Action, matches: &ArgMatches) -> Result<()> {
    let source_location = matches.get_one::<String>("SOURCE").expect("required");
    let target_path = matches.get_one::<String>("TARGET").expect("required");
    let desired = matches
        .get_many::<String>("feature")
        .expect("required")
        .map(|s| parse_uuid(s))
        .collect::<Result<Vec<_>>>()?;

    let mut installer = Installer::new(API_VERSION_2_0)?;
    installer.set_progress_callback(Box::new(|total, action, detail| {
        if detail.is_empty() {
            debug!("[{:3.0}%] {}", total * 100.0, action);
        } else {
            debug!("[{:3.0}%] {}: {}", total * 100.0, action, detail);
        }
    }));

    let mut source = installer
        .open_source_repository(source_location, RepositoryOptions::default())
        .with_context(|| format!("unable to open source repository '{}'", source_location))?;
    if let Some(key) = matches.get_one::<String>("key") {
        installer.set_repository_property(
            &mut source,
            RepositoryProperty::DecryptionKey,
            PropertyValue::Bytes(key.clone().into_bytes()),
        )?;
    }

    let mut target = installer.open_target_repository(
        target_path,
        RepositoryOptions {
            create: action == Action::Install,
            read_only: false,
        },
    )?;

    installer.execute(action, &mut target, Some(&mut source), Some(&desired))?;

    match action {
        Action::Install => info!("Installed {} feature(s) to '{}'", desired.len(), target_path),
        _ => info!(
            "Configured '{}' to {} feature(s)",
            target_path,
            desired.len()
        ),
    }
    Ok(())
}
