use std::{io, process::exit};

use cni::{CniArgs, CniCommand, CniErrorReply, CniVersionInfo, DEFAULT_CNI_VERSION};
use commands::{add::add, check::check, del::del};
use config::{NetConf, PluginConfig};
use env_logger::Target;
use error::PluginError;
use log::{error, LevelFilter};
use serde::Serialize;

mod cni;
mod commands;
mod config;
mod error;

// stdout belongs to the runtime, logs go to stderr
fn configure_logging() {
    env_logger::builder()
        .format_module_path(false)
        .filter_level(LevelFilter::Warn)
        .parse_default_env()
        .target(Target::Stderr)
        .init()
}

fn main() {
    configure_logging();

    let mut cni_version = DEFAULT_CNI_VERSION.to_owned();

    if let Err(err) = run(&mut cni_version) {
        error!("{err}");

        let reply = CniErrorReply::new(&cni_version, &err);

        if let Err(encode_err) = print_json(&reply) {
            error!("{encode_err}");
        }

        exit(1);
    }
}

fn run(cni_version: &mut String) -> Result<(), PluginError> {
    let args = CniArgs::from_env()?;

    if args.command == CniCommand::Version {
        return print_json(&CniVersionInfo::default());
    }

    let net = NetConf::from_reader(io::stdin().lock())?;
    cni_version.clone_from(&net.cni_version);

    let config = PluginConfig::load(net)?;

    match args.command {
        CniCommand::Add => print_json(&add(&args, &config)?),
        CniCommand::Del => del(&args, &config),
        CniCommand::Check => check(&args, &config),
        CniCommand::Version => Ok(()),
    }
}

fn print_json(value: &impl Serialize) -> Result<(), PluginError> {
    let output = serde_json::to_string(value).map_err(PluginError::Encode)?;

    println!("{output}");

    Ok(())
}
