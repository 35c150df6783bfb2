mod build_cmd;
mod deploy_cmd;
mod info_cmd;
mod string_utils;
mod verify_cmd;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use log::*;

pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

fn init_log(level: log::LevelFilter) -> Result<()> {
    let local_level = level;
    fern::Dispatch::new()
        .format(move |out, message, record| {
            if local_level > log::LevelFilter::Info {
                // Add some extra info to each message in debug
                out.finish(format_args!(
                    "[{}]({})({}) {}",
                    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                    record.target(),
                    record.level(),
                    message
                ))
            } else {
                out.finish(format_args!("{}", message))
            }
        })
        .level(level)
        .chain(std::io::stdout())
        .apply()
        .context("unable to initialize log")?;
    Ok(())
}

pub fn parse_uuid(input: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::try_parse(input).with_context(|| format!("'{}' is not a valid feature id", input))
}

fn feature_arg() -> Arg {
    Arg::new("feature")
        .long("feature")
        .value_name("UUID")
        .action(ArgAction::Append)
        .required(true)
        .help("Feature to select, repeatable")
}

fn key_arg() -> Arg {
    Arg::new("key")
        .long("key")
        .value_name("PASSPHRASE")
        .help("Decryption key for encrypted source repositories")
}

fn cli() -> Command {
    Command::new(PKG_NAME)
        .version(PKG_VERSION)
        .about("Content-addressed software installer.")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .global(true)
                .help("Set verbosity level"),
        )
        .subcommand(
            Command::new("build")
                .about("Build a repository from a descriptor.")
                .arg(
                    Arg::new("DESCRIPTOR")
                        .required(true)
                        .help("Repository descriptor (json)"),
                )
                .arg(
                    Arg::new("SOURCE")
                        .required(true)
                        .help("Directory relative source paths resolve against"),
                )
                .arg(Arg::new("TARGET").required(true).help("Output directory"))
                .arg(
                    Arg::new("layout")
                        .long("layout")
                        .value_parser(["loose", "packed", "deployed"])
                        .default_value("packed")
                        .help("Repository layout to emit"),
                )
                .arg(
                    Arg::new("compression")
                        .long("compression")
                        .value_parser(["brotli", "zip", "none"])
                        .default_value("brotli")
                        .help("Chunk compression for packed repositories"),
                ),
        )
        .subcommand(
            Command::new("install")
                .about("Install features from a source repository into a new target.")
                .arg(
                    Arg::new("SOURCE")
                        .required(true)
                        .help("Source repository (path or url)"),
                )
                .arg(Arg::new("TARGET").required(true).help("Target directory"))
                .arg(feature_arg())
                .arg(key_arg()),
        )
        .subcommand(
            Command::new("configure")
                .about("Change the feature selection of an installed target.")
                .arg(
                    Arg::new("SOURCE")
                        .required(true)
                        .help("Source repository (path or url)"),
                )
                .arg(Arg::new("TARGET").required(true).help("Target directory"))
                .arg(feature_arg())
                .arg(key_arg()),
        )
        .subcommand(
            Command::new("repair")
                .about("Recover missing or corrupted files from a source repository.")
                .arg(
                    Arg::new("SOURCE")
                        .required(true)
                        .help("Source repository (path or url)"),
                )
                .arg(Arg::new("TARGET").required(true).help("Target directory"))
                .arg(key_arg()),
        )
        .subcommand(
            Command::new("verify")
                .about("Check every installed file against the index.")
                .arg(Arg::new("TARGET").required(true).help("Target directory")),
        )
        .subcommand(
            Command::new("info")
                .about("Print repository details.")
                .arg(
                    Arg::new("SOURCE")
                        .required(true)
                        .help("Source repository (path or url)"),
                ),
        )
}

fn main() {
    let matches = cli().get_matches();

    if let Err(e) = init_log(match matches.get_count("verbose") {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }

    let result = match matches.subcommand() {
        Some(("build", matches)) => build_cmd::run(matches),
        Some(("install", matches)) => deploy_cmd::run(kylar::Action::Install, matches),
        Some(("configure", matches)) => deploy_cmd::run(kylar::Action::Configure, matches),
        Some(("repair", matches)) => verify_cmd::run(kylar::Action::Repair, matches),
        Some(("verify", matches)) => verify_cmd::run(kylar::Action::Verify, matches),
        Some(("info", matches)) => info_cmd::run(matches),
        _ => unreachable!("subcommand is required"),
    };

    if let Err(e) = result {
        error!("error: {:#}", e);
        // Engine errors keep their boundary code, everything else is a
        // generic failure
        let code = e
            .downcast_ref::<kylar::Error>()
            .map(|error| kylar::ResultCode::from_error(error) as i32)
            .unwrap_or(kylar::ResultCode::Error as i32);
        std::process::exit(code);
    }
}
