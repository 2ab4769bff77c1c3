// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Tracker workers.
//!
//! A tracker owns the aggregation state for its shard of the IP space.
//! Updates land in the currently-accumulating interval unless their
//! sender has already ended it, in which case they belong to the
//! following one; interval state therefore rotates through two live
//! generations (`curr`, `next`) plus the finalized one parked in the
//! mutex-guarded result slot for the merger.

pub(crate) mod maps;
mod outstanding;

pub use maps::{MetricTally, TallyMap};

use crate::tracker::maps::IntervalMaps;
use crate::tracker::outstanding::OutstandingQueue;
use config::ReportConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use transport::{FrameReader, MsgType, SeqTracker, TrackerInbox, UpdateIter};

/// Counter of intervals finalized across all trackers.
pub const INTERVALS_FINALIZED_METRIC: &str = "telescope_intervals_finalized";
/// Counter of outstanding intervals dropped without completing.
pub const INTERVALS_PRUNED_METRIC: &str = "telescope_intervals_pruned";

const POLL_BACKOFF: Duration = Duration::from_millis(20);

/// The most recently finalized interval of one tracker, as seen by the
/// merger. The critical section around it stays O(1): map moves and a
/// timestamp store.
#[derive(Debug, Default)]
pub struct CompletedInterval {
    /// Interval start; `None` until the tracker finalizes its first one.
    pub timestamp: Option<u32>,
    pub tallies: TallyMap,
    pub seq_gaps: u64,
    /// Set once the tracker has exited; no further results will appear.
    pub halted: bool,
}

pub type ResultSlot = Arc<Mutex<CompletedInterval>>;

pub struct Tracker {
    id: usize,
    config: Arc<ReportConfig>,
    inbox: TrackerInbox,
    seq: SeqTracker,
    curr: IntervalMaps,
    next: IntervalMaps,
    outstanding: OutstandingQueue,
    slot: ResultSlot,
    halted_senders: u64,
    halted_count: usize,
    last_finalized: Option<u32>,
}

enum Flow {
    Continue,
    Exit,
}

impl Tracker {
    #[must_use]
    pub fn new(id: usize, config: Arc<ReportConfig>, inbox: TrackerInbox) -> Self {
        let senders = config.processor_count;
        Tracker {
            id,
            config,
            inbox,
            seq: SeqTracker::new(senders),
            curr: IntervalMaps::new(),
            next: IntervalMaps::new(),
            outstanding: OutstandingQueue::default(),
            slot: Arc::new(Mutex::new(CompletedInterval::default())),
            halted_senders: 0,
            halted_count: 0,
            last_finalized: None,
        }
    }

    /// The slot this tracker parks finalized intervals in.
    #[must_use]
    pub fn slot(&self) -> ResultSlot {
        Arc::clone(&self.slot)
    }

    /// Worker loop. Exits once every processor has halted (or vanished);
    /// anything still outstanding at that point is lost and logged.
    #[tracing::instrument(level = "info", skip(self), fields(tracker = self.id))]
    pub fn run(mut self) {
        info!("tracker {} started", self.id);
        loop {
            match self.inbox.recv_timeout(POLL_BACKOFF) {
                Ok(frame) => {
                    if matches!(self.handle_frame(&frame), Flow::Exit) {
                        break;
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    warn!("tracker {}: all processors vanished", self.id);
                    break;
                }
            }
        }
        for interval_ts in self.outstanding.drain_all() {
            warn!(
                "tracker {}: interval {interval_ts} incomplete at halt, dropped",
                self.id
            );
            metrics::counter!(INTERVALS_PRUNED_METRIC).increment(1);
        }
        self.slot.lock().halted = true;
        info!("tracker {} halted", self.id);
    }

    fn handle_frame(&mut self, frame: &[u8]) -> Flow {
        let (header, updates) = match FrameReader::parse(frame) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("tracker {}: undecodable frame: {e}", self.id);
                return Flow::Continue;
            }
        };
        self.seq.observe(header.sender, header.seqno);
        match header.msg_type {
            MsgType::Update => {
                self.apply_update(header.sender, updates);
                Flow::Continue
            }
            MsgType::IntervalEnd => {
                self.interval_end(header.timestamp, header.sender);
                Flow::Continue
            }
            MsgType::Halt => self.halt_sender(header.sender),
            MsgType::Reset => {
                self.reset();
                Flow::Continue
            }
        }
    }

    fn apply_update(&mut self, sender: u8, updates: UpdateIter<'_>) {
        // a sender that already ended the accumulating interval is
        // producing data for the following one
        let maps = if self.outstanding.sender_has_ended(sender) {
            &mut self.next
        } else {
            &mut self.curr
        };
        for update in updates {
            match update {
                Ok(update) => maps.apply(&update, &self.config),
                Err(e) => {
                    warn!("tracker {}: bad update from sender {sender}: {e}", self.id);
                    break;
                }
            }
        }
    }

    fn interval_end(&mut self, interval_ts: u32, sender: u8) {
        if self.last_finalized.is_some_and(|last| interval_ts <= last) {
            warn!(
                "tracker {}: sender {sender} ended already-finalized interval {interval_ts}",
                self.id
            );
            return;
        }
        let done = self.outstanding.mark(interval_ts, sender);
        debug!(
            "tracker {}: interval {interval_ts} ended by {done}/{} senders",
            self.id, self.config.processor_count
        );
        if done as usize == self.config.processor_count {
            self.finalize(interval_ts);
        }
    }

    fn finalize(&mut self, interval_ts: u32) {
        for stale in self.outstanding.prune_through(interval_ts) {
            warn!(
                "tracker {}: interval {stale} never completed; its late updates were \
                 accounted to later intervals",
                self.id
            );
            metrics::counter!(INTERVALS_PRUNED_METRIC).increment(1);
        }
        let fresh = IntervalMaps::new();
        let finalized = std::mem::replace(&mut self.curr, std::mem::replace(&mut self.next, fresh));
        let seq_gaps = self.seq.take_gaps();
        {
            let mut slot = self.slot.lock();
            if slot.timestamp.is_some_and(|prev| prev >= interval_ts) {
                warn!(
                    "tracker {}: finalizing {interval_ts} behind slot timestamp",
                    self.id
                );
            }
            slot.timestamp = Some(interval_ts);
            slot.tallies = finalized.tallies;
            slot.seq_gaps = seq_gaps;
        }
        self.last_finalized = Some(interval_ts);
        metrics::counter!(INTERVALS_FINALIZED_METRIC).increment(1);
        debug!("tracker {}: finalized interval {interval_ts}", self.id);
    }

    fn halt_sender(&mut self, sender: u8) -> Flow {
        let bit = 1u64 << sender;
        if self.halted_senders & bit == 0 {
            self.halted_senders |= bit;
            self.halted_count += 1;
        }
        if self.halted_count >= self.config.processor_count {
            Flow::Exit
        } else {
            Flow::Continue
        }
    }

    /// Discard all in-flight state; the finalized slot (and with it the
    /// last completed timestamp) survives.
    fn reset(&mut self) {
        info!("tracker {}: reset", self.id);
        self.curr = IntervalMaps::new();
        self.next = IntervalMaps::new();
        self.outstanding.clear();
    }
}
