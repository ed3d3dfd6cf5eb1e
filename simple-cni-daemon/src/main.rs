use std::process::exit;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use config::DaemonConfig;
use controller::main_controller;
use kube::Client;
use log::{info, LevelFilter};
use tokio::signal::unix::{signal, SignalKind};

mod cli;
mod command;
mod config;
mod controller;
mod firewall;
mod routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    configure_logger(cli.verbose_logging);

    let config = DaemonConfig::try_from(&cli).context("Invalid daemon configuration!")?;
    let client = create_client().await;

    info!(
        "Starting on node '{}' (cluster CIDR {})...",
        config.node_name, config.cluster_cidr
    );

    tokio::select! {
        result = main_controller(client, config) => {
            result.context("Route controller failed!")?;
        }
        signal = shutdown_signal() => {
            signal.context("Couldn't listen for shutdown signals!")?;
            info!("Shutting down...");
        }
    }

    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

async fn create_client() -> Client {
    match Client::try_default().await {
        Ok(client) => client,
        Err(error) => {
            log::error!("Couldn't create client! {error:?}");
            exit(6)
        }
    }
}

fn configure_logger(verbose: bool) {
    let level = match verbose {
        true => LevelFilter::Debug,
        false => LevelFilter::Info,
    };

    env_logger::builder()
        .default_format()
        .format_module_path(false)
        .filter_level(level)
        .parse_default_env()
        .init()
}
