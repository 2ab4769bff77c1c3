// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Engine assembly: spawns the processor, tracker and merger threads,
//! wires the channels between them, and drives interval boundaries and
//! shutdown.

use crate::merger::Merger;
use crate::observation::PacketObservation;
use crate::processor::{ControlEvent, Processor};
use crate::rows::ResultSink;
use crate::tracker::Tracker;
use config::ReportConfig;
use crossbeam_channel as chan;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, info};
use transport::tracker_channel;

/// Observations queued per processor shard before the feeder blocks.
const OBS_QUEUE_DEPTH: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to spawn {0} thread: {1}")]
    Spawn(&'static str, io::Error),
}

/// Broadcasts control events to every processor. Cheap to clone; the
/// wall clock and the shutdown path each hold one.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    ctrl_txs: Vec<chan::Sender<ControlEvent>>,
}

impl ControlHandle {
    /// Propagate an interval boundary: every processor flushes its
    /// pending batches and marks the interval on every tracker.
    pub fn interval_end(&self, interval_ts: u32) {
        for tx in &self.ctrl_txs {
            if tx.send(ControlEvent::IntervalEnd(interval_ts)).is_err() {
                error!("a processor is gone; interval {interval_ts} marker lost");
            }
        }
    }

    /// Discard all in-flight interval state across the engine.
    pub fn reset(&self) {
        for tx in &self.ctrl_txs {
            let _ = tx.send(ControlEvent::Reset);
        }
    }

    fn halt(&self) {
        for tx in &self.ctrl_txs {
            let _ = tx.send(ControlEvent::Halt);
        }
    }
}

/// A running engine. Dropping the handle without calling
/// [`EngineHandle::shutdown`] detaches the workers.
pub struct EngineHandle {
    observation_txs: Vec<chan::Sender<PacketObservation>>,
    control: ControlHandle,
    processors: Vec<JoinHandle<()>>,
    trackers: Vec<JoinHandle<()>>,
    merger: JoinHandle<()>,
}

impl EngineHandle {
    /// Input feed for one processor shard.
    #[must_use]
    pub fn observation_sender(&self, shard: usize) -> Option<chan::Sender<PacketObservation>> {
        self.observation_txs.get(shard).cloned()
    }

    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.observation_txs.len()
    }

    #[must_use]
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Cooperative shutdown: processors flush and halt, trackers drain
    /// and halt, the merger empties the slots and exits.
    pub fn shutdown(self) {
        info!("engine shutting down");
        drop(self.observation_txs);
        self.control.halt();
        for (name, handles) in [("processor", self.processors), ("tracker", self.trackers)] {
            for handle in handles {
                if handle.join().is_err() {
                    error!("a {name} thread panicked during shutdown");
                }
            }
        }
        if self.merger.join().is_err() {
            error!("the merger thread panicked during shutdown");
        }
        info!("engine stopped");
    }
}

pub struct Engine;

impl Engine {
    /// Spawn all workers for the given configuration.
    pub fn start(
        config: Arc<ReportConfig>,
        sink: Box<dyn ResultSink>,
    ) -> Result<EngineHandle, EngineError> {
        info!(
            "starting engine: {} processors, {} trackers, {}s intervals",
            config.processor_count, config.tracker_count, config.interval_seconds
        );

        let mut tracker_txs = Vec::with_capacity(config.tracker_count);
        let mut trackers = Vec::with_capacity(config.tracker_count);
        let mut slots = Vec::with_capacity(config.tracker_count);
        for id in 0..config.tracker_count {
            let (tx, inbox) = tracker_channel(config.internal_hwm * config.processor_count);
            let tracker = Tracker::new(id, Arc::clone(&config), inbox);
            slots.push(tracker.slot());
            tracker_txs.push(tx);
            let handle = std::thread::Builder::new()
                .name(format!("tracker-{id}"))
                .spawn(move || tracker.run())
                .map_err(|e| EngineError::Spawn("tracker", e))?;
            trackers.push(handle);
        }

        let mut observation_txs = Vec::with_capacity(config.processor_count);
        let mut ctrl_txs = Vec::with_capacity(config.processor_count);
        let mut processors = Vec::with_capacity(config.processor_count);
        for id in 0..config.processor_count {
            let (obs_tx, obs_rx) = chan::bounded(OBS_QUEUE_DEPTH);
            let (ctrl_tx, ctrl_rx) = chan::bounded(16);
            #[allow(clippy::cast_possible_truncation)]
            let processor = Processor::new(id as u8, Arc::clone(&config), tracker_txs.clone());
            let handle = std::thread::Builder::new()
                .name(format!("processor-{id}"))
                .spawn(move || processor.run(obs_rx, ctrl_rx))
                .map_err(|e| EngineError::Spawn("processor", e))?;
            observation_txs.push(obs_tx);
            ctrl_txs.push(ctrl_tx);
            processors.push(handle);
        }
        // processors hold the only tracker senders from here on
        drop(tracker_txs);

        let merger = Merger::new(Arc::clone(&config), slots, sink);
        let merger = std::thread::Builder::new()
            .name("merger".to_string())
            .spawn(move || merger.run())
            .map_err(|e| EngineError::Spawn("merger", e))?;

        Ok(EngineHandle {
            observation_txs,
            control: ControlHandle { ctrl_txs },
            processors,
            trackers,
            merger,
        })
    }
}

/// Drives interval boundaries off the system clock, aligned to the
/// interval length.
pub struct WallClock {
    stop_tx: chan::Sender<()>,
    handle: JoinHandle<()>,
}

impl WallClock {
    pub fn start(control: ControlHandle, interval_seconds: u32) -> Result<Self, EngineError> {
        let (stop_tx, stop_rx) = chan::bounded::<()>(1);
        let interval = u64::from(interval_seconds.max(1));
        let handle = std::thread::Builder::new()
            .name("control-clock".to_string())
            .spawn(move || {
                loop {
                    let now_ms = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_millis();
                    let interval_ms = u128::from(interval) * 1000;
                    let next_boundary_ms = (now_ms / interval_ms + 1) * interval_ms;
                    let wait = Duration::from_millis(
                        u64::try_from(next_boundary_ms - now_ms).unwrap_or(u64::MAX),
                    );
                    match stop_rx.recv_timeout(wait) {
                        Err(chan::RecvTimeoutError::Timeout) => {
                            let ended = next_boundary_ms / 1000 - u128::from(interval);
                            let interval_ts = u32::try_from(ended).unwrap_or(u32::MAX);
                            info!("interval {interval_ts} ended");
                            control.interval_end(interval_ts);
                        }
                        Ok(()) | Err(chan::RecvTimeoutError::Disconnected) => return,
                    }
                }
            })
            .map_err(|e| EngineError::Spawn("control-clock", e))?;
        Ok(WallClock { stop_tx, handle })
    }

    pub fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            error!("the control clock thread panicked");
        }
    }
}
