// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The merger folds per-tracker tallies into one result set per
//! interval.
//!
//! It never blocks on a tracker: each poll try-locks every result slot
//! and backs off if any is busy or lagging. An interval is merged once
//! all trackers park the same timestamp; it is suppressed (never
//! emitted) if a tracker halted before finalizing it, so under-counted
//! intervals cannot reach consumers.

use crate::rows::{IntervalResult, ResultRow, ResultSink, render_value};
use crate::tracker::maps::hasher_state;
use crate::tracker::{ResultSlot, TallyMap};
use config::ReportConfig;
use std::sync::Arc;
use std::time::Duration;
use tags::TagKey;
use tracing::{debug, info, warn};

/// Counter of intervals merged and emitted.
pub const INTERVALS_MERGED_METRIC: &str = "telescope_intervals_merged";
/// Counter of intervals suppressed because a tracker halted early.
pub const INTERVALS_INCOMPLETE_METRIC: &str = "telescope_intervals_incomplete";

const POLL_SLEEP: Duration = Duration::from_millis(5);

pub struct Merger {
    config: Arc<ReportConfig>,
    slots: Vec<ResultSlot>,
    sink: Box<dyn ResultSink>,
    label: Arc<str>,
    last_emitted: Option<u32>,
}

enum Poll {
    Progress,
    Idle,
    Done,
}

impl Merger {
    #[must_use]
    pub fn new(config: Arc<ReportConfig>, slots: Vec<ResultSlot>, sink: Box<dyn ResultSink>) -> Self {
        Merger {
            label: Arc::from(config.output_row_label.as_str()),
            config,
            slots,
            sink,
            last_emitted: None,
        }
    }

    /// Worker loop; returns once every tracker has halted and nothing
    /// mergeable remains.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn run(mut self) {
        info!("merger started over {} trackers", self.slots.len());
        loop {
            match self.poll() {
                Poll::Progress => {}
                Poll::Idle => std::thread::sleep(POLL_SLEEP),
                Poll::Done => break,
            }
        }
        info!("merger done");
    }

    fn poll(&mut self) -> Poll {
        let mut guards = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            // never stall on a busy tracker; try again next round
            match slot.try_lock() {
                Some(guard) => guards.push(guard),
                None => return Poll::Idle,
            }
        }

        let target = guards
            .iter()
            .filter_map(|guard| guard.timestamp)
            .filter(|&ts| self.last_emitted.is_none_or(|last| ts > last))
            .max();
        let Some(target) = target else {
            if guards.iter().all(|guard| guard.halted) {
                return Poll::Done;
            }
            return Poll::Idle;
        };

        if guards.iter().all(|guard| guard.timestamp == Some(target)) {
            let parts: Vec<(TallyMap, u64)> = guards
                .iter_mut()
                .map(|guard| (std::mem::take(&mut guard.tallies), guard.seq_gaps))
                .collect();
            drop(guards);
            self.emit(target, parts);
            return Poll::Progress;
        }

        if guards
            .iter()
            .any(|guard| guard.halted && guard.timestamp != Some(target))
        {
            // the lagging tracker will never finalize the target
            warn!("interval {target} incomplete: a tracker halted before finalizing it");
            for guard in &mut guards {
                if guard.timestamp == Some(target) {
                    drop(std::mem::take(&mut guard.tallies));
                }
            }
            self.last_emitted = Some(target);
            metrics::counter!(INTERVALS_INCOMPLETE_METRIC).increment(1);
            return Poll::Progress;
        }

        Poll::Idle
    }

    fn emit(&mut self, interval_ts: u32, parts: Vec<(TallyMap, u64)>) {
        let mut merged = TallyMap::with_hasher(hasher_state().clone());
        let mut seq_gaps = 0u64;
        for (tallies, gaps) in parts {
            seq_gaps += gaps;
            for (key, tally) in tallies {
                match merged.entry(key) {
                    hashbrown::hash_map::Entry::Occupied(entry) => {
                        entry.into_mut().absorb(&tally);
                    }
                    hashbrown::hash_map::Entry::Vacant(entry) => {
                        entry.insert(tally);
                    }
                }
            }
        }

        // stable row order regardless of map iteration
        let mut ordered: Vec<(TagKey, _)> = merged.into_iter().collect();
        ordered.sort_unstable_by_key(|(key, _)| key.raw());

        let rows: Vec<ResultRow> = ordered
            .into_iter()
            .map(|(key, tally)| ResultRow {
                interval_ts,
                label: Arc::clone(&self.label),
                class: tally.class,
                value: render_value(key, &self.config),
                src_ip_count: tally.unique_src_ips,
                dst_ip_count: tally.unique_dst_ips,
                src_asn_count: tally.unique_src_asns,
                packet_count: tally.packets,
                byte_count: tally.bytes,
                associated: tally.associated.clone(),
            })
            .collect();

        debug!(
            "interval {interval_ts}: {} rows, {} seq gaps",
            rows.len(),
            seq_gaps
        );
        self.sink.emit(IntervalResult {
            interval_ts,
            rows,
            seq_gaps,
        });
        self.last_emitted = Some(interval_ts);
        metrics::counter!(INTERVALS_MERGED_METRIC).increment(1);
    }
}
