// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

pub use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "telescope", about = "Network telescope report engine")]
pub struct CmdArgs {
    /// YAML configuration file; defaults apply when omitted.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Replay a text trace instead of waiting for a live feed. The
    /// trace clock drives interval boundaries.
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Prometheus listen address; overrides the configuration file.
    #[arg(long, value_name = "ADDR")]
    metrics_address: Option<SocketAddr>,
}

impl CmdArgs {
    #[must_use]
    pub fn config_file(&self) -> Option<&PathBuf> {
        self.config.as_ref()
    }

    #[must_use]
    pub fn replay_file(&self) -> Option<&PathBuf> {
        self.replay.as_ref()
    }

    #[must_use]
    pub fn metrics_address(&self) -> Option<SocketAddr> {
        self.metrics_address
    }
}
