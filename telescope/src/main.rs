// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]
#![deny(rustdoc::all)]
#![allow(rustdoc::missing_crate_level_docs)]

mod args;
mod replay;
mod statistics;

use crate::args::{CmdArgs, Parser};
use config::ExternalConfig;
use report::engine::{Engine, WallClock};
use report::rows::TsvSink;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn main() {
    init_logging();
    info!("Starting telescope report engine...");

    /* parse cmd line args */
    let cmd_args = CmdArgs::parse();

    let external = if let Some(path) = cmd_args.config_file() {
        match ExternalConfig::from_yaml_file(path) {
            Ok(external) => external,
            Err(e) => {
                error!("Failed to load configuration: {e}");
                std::process::exit(1);
            }
        }
    } else {
        ExternalConfig::default()
    };
    let config = match external.finalize() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}. Aborting...");
            std::process::exit(1);
        }
    };
    let config = Arc::new(config);

    if let Some(addr) = cmd_args.metrics_address().or(config.metrics_address) {
        info!("Starting metrics server on {addr}");
        if let Err(e) = statistics::start_metrics_server(addr) {
            error!("Failed to start metrics server: {e}");
            std::process::exit(1);
        }
    }

    let sink = TsvSink::new(std::io::stdout());
    let handle = match Engine::start(Arc::clone(&config), Box::new(sink)) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start engine: {e}");
            std::process::exit(1);
        }
    };

    if let Some(trace) = cmd_args.replay_file() {
        info!("Replaying trace {}", trace.display());
        match replay::replay_file(trace, &handle, &config) {
            Ok(_) => handle.shutdown(),
            Err(e) => {
                error!("Replay failed: {e}");
                handle.shutdown();
                std::process::exit(1);
            }
        }
        return;
    }

    /* live mode: the wall clock drives intervals until SIGINT */
    let (stop_tx, stop_rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || stop_tx.send(()).expect("Error sending SIGINT signal"))
        .expect("failed to set SIGINT handler");

    let clock = match WallClock::start(handle.control(), config.interval_seconds) {
        Ok(clock) => clock,
        Err(e) => {
            error!("Failed to start interval clock: {e}");
            handle.shutdown();
            std::process::exit(1);
        }
    };

    info!("Engine running; awaiting observations. Interrupt to stop.");
    let _ = stop_rx.recv();
    info!("Interrupted; draining...");
    clock.stop();
    handle.shutdown();
}
