use anyhow::{Context, Result};
use clap::ArgMatches;
use log::*;
use std::path::Path;

use kylar::{build_repository, BuildOptions, Compression, RepositoryDescriptor, RepositoryLayout};

use crate::string_utils::size_to_str;

pub fn run(matches: &ArgMatches) -> Result<()> {
    let descriptor_path = matches.get_one::<String>("DESCRIPTOR").expect("required");
    let source = matches.get_one::<String>("SOURCE").expect("required");
    let target = matches.get_one::<String>("TARGET").expect("required");

    let descriptor_text = std::fs::read_to_string(descriptor_path)
        .with_context(|| format!("unable to read '{}'", descriptor_path))?;
    let descriptor: RepositoryDescriptor = serde_json::from_str(&descriptor_text)
        .with_context(|| format!("unable to parse '{}'", descriptor_path))?;

    let layout = match matches.get_one::<String>("layout").expect("defaulted").as_str() {
        "loose" => RepositoryLayout::Loose,
        "deployed" => RepositoryLayout::Deployed,
        _ => RepositoryLayout::Packed,
    };
    let mut options = BuildOptions::new(layout, Path::new(source), Path::new(target));
    options.compression = match matches
        .get_one::<String>("compression")
        .expect("defaulted")
        .as_str()
    {
        "none" => Compression::None,
        "zip" => Compression::Zip(9),
        _ => Compression::Brotli(kylar::DEFAULT_BROTLI_QUALITY),
    };

    let statistics = build_repository(&descriptor, &options)?;

    if layout == RepositoryLayout::Packed {
        info!(
            "Stored {} as {} (ratio {:.2})",
            size_to_str(statistics.stored_uncompressed),
            size_to_str(statistics.stored_compressed),
            statistics.compression_ratio()
        );
    } else {
        info!("Repository built at '{}'", target);
    }
    Ok(())
}
