use anyhow::{anyhow, Context, Result};
use clap::ArgMatches;
use log::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kylar::{
    Action, Installer, PropertyValue, RepositoryOptions, RepositoryProperty, ValidationResult,
    API_VERSION_2_0,
};

/// Shared driver for `verify` and `repair`.
pub fn run(action: Action, matches: &ArgMatches) -> Result<()> {
    let target_path = matches.get_one::<String>("TARGET").expect("required");

    let mut installer = Installer::new(API_VERSION_2_0)?;
    let problems = Arc::new(AtomicU64::new(0));
    {
        let problems = problems.clone();
        installer.set_validation_callback(Box::new(move |result, name| match result {
            ValidationResult::Ok => debug!("OK        {}", name),
            ValidationResult::Corrupted => {
                problems.fetch_add(1, Ordering::Relaxed);
                info!("CORRUPTED {}", name);
            }
            ValidationResult::Missing => {
                problems.fetch_add(1, Ordering::Relaxed);
                info!("MISSING   {}", name);
            }
        }));
    }

    let mut target = installer.open_target_repository(
        target_path,
        RepositoryOptions {
            create: false,
            read_only: action == Action::Verify,
        },
    )?;

    match action {
        Action::Repair => {
            let source_location = matches.get_one::<String>("SOURCE").expect("required");
            let mut source = installer
                .open_source_repository(source_location, RepositoryOptions::default())
                .with_context(|| {
                    format!("unable to open source repository '{}'", source_location)
                })?;
            if let Some(key) = matches.get_one::<String>("key") {
                installer.set_repository_property(
                    &mut source,
                    RepositoryProperty::DecryptionKey,
                    PropertyValue::Bytes(key.clone().into_bytes()),
                )?;
            }
            installer.execute(Action::Repair, &mut target, Some(&mut source), None)?;
            info!("Repaired '{}'", target_path);
            Ok(())
        }
        _ => {
            installer.execute(Action::Verify, &mut target, None, None)?;
            let problems = problems.load(Ordering::Relaxed);
            if problems > 0 {
                Err(anyhow!("{} file(s) failed validation", problems))
            } else {
                info!("'{}' verified", target_path);
                Ok(())
            }
        }
    }
}
