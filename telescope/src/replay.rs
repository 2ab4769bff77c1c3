// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Text-trace replay driver.
//!
//! Stands in for the live tagger handoff: reads one observation per
//! line, shards it to a processor, and drives interval boundaries from
//! the trace clock. Line format, whitespace separated:
//!
//! ```text
//! ts src_ip dst_ip ip_bytes protocol src_port dst_port [src_asn]
//! ```
//!
//! `#` starts a comment.

use config::ReportConfig;
use report::engine::EngineHandle;
use report::observation::PacketObservation;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::{BufRead, BufReader};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to open trace: {0}")]
    Io(#[from] std::io::Error),
    #[error("engine rejected an observation; a processor is gone")]
    FeedClosed,
}

/// Pick the processor shard for an observation the way the dispatcher
/// does for live traffic: a stable hash over the flow endpoints.
#[allow(clippy::cast_possible_truncation)]
fn shard_for(obs: &PacketObservation, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    (obs.src_ip, obs.dst_ip).hash(&mut hasher);
    hasher.finish() as usize % shards.max(1)
}

fn parse_line(line: &str) -> Option<PacketObservation> {
    let line = line.split('#').next().unwrap_or("").trim();
    if line.is_empty() {
        return None;
    }
    let mut fields = line.split_whitespace();
    let observation = PacketObservation {
        ts: fields.next()?.parse().ok()?,
        src_ip: fields.next()?.parse::<Ipv4Addr>().ok()?,
        dst_ip: fields.next()?.parse::<Ipv4Addr>().ok()?,
        ip_bytes: fields.next()?.parse().ok()?,
        protocol: fields.next()?.parse().ok()?,
        src_port: fields.next()?.parse().ok()?,
        dst_port: fields.next()?.parse().ok()?,
        src_asn: fields.next().and_then(|f| f.parse().ok()).unwrap_or(0),
        ..Default::default()
    };
    Some(observation)
}

/// Wait until every shard queue has drained, so queued observations
/// land in the interval that is about to close.
fn drain(handle: &EngineHandle) {
    for shard in 0..handle.shard_count() {
        if let Some(tx) = handle.observation_sender(shard) {
            while !tx.is_empty() {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
    std::thread::sleep(Duration::from_millis(50));
}

/// Replay a trace file into a running engine. Returns the number of
/// observations fed.
pub fn replay_file(
    path: &Path,
    handle: &EngineHandle,
    config: &ReportConfig,
) -> Result<u64, ReplayError> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let control = handle.control();
    let interval = config.interval_seconds;
    let mut current: Option<u32> = None;
    let mut fed = 0u64;
    let mut skipped = 0u64;

    for line in reader.lines() {
        let line = line?;
        let Some(obs) = parse_line(&line) else {
            if !line.trim().is_empty() && !line.trim_start().starts_with('#') {
                skipped += 1;
            }
            continue;
        };
        let start = obs.ts - obs.ts % interval;
        match current {
            None => current = Some(start),
            Some(open) if start > open => {
                drain(handle);
                control.interval_end(open);
                current = Some(start);
            }
            Some(open) if start < open => {
                warn!("trace time moved backwards at ts {}; keeping interval {open}", obs.ts);
            }
            Some(_) => {}
        }
        let shard = shard_for(&obs, handle.shard_count());
        let Some(tx) = handle.observation_sender(shard) else {
            return Err(ReplayError::FeedClosed);
        };
        if tx.send(obs).is_err() {
            return Err(ReplayError::FeedClosed);
        }
        fed += 1;
    }

    if let Some(open) = current {
        drain(handle);
        control.interval_end(open);
    }
    if skipped > 0 {
        warn!("{skipped} malformed trace line(s) skipped");
    }
    info!("replayed {fed} observations");
    Ok(fed)
}
