// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::message::Frame;
use crossbeam_channel as chan;
use std::time::Duration;
use tracing::warn;

/// Counter incremented for every frame detected as lost.
pub const SEQ_GAPS_METRIC: &str = "telescope_seq_gaps";

/// Sending half of a tracker inbox. One clone per processor.
#[derive(Debug, Clone)]
pub struct TrackerSender {
    tx: chan::Sender<Frame>,
}

impl TrackerSender {
    /// Blocking send. A full inbox is the backpressure mechanism: the
    /// caller stalls until the tracker catches up. Returns `false` when
    /// the tracker is gone.
    #[must_use]
    pub fn send(&self, frame: Frame) -> bool {
        self.tx.send(frame).is_ok()
    }
}

/// Receiving half of a tracker inbox.
#[derive(Debug)]
pub struct TrackerInbox {
    rx: chan::Receiver<Frame>,
}

impl TrackerInbox {
    /// Bounded poll; trackers spin on this with a short timeout so halt
    /// and drain checks run even on an idle feed.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Frame, chan::RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Build one tracker's inbox.
///
/// `capacity` is the receive-side high-water mark: the per-processor
/// send-side mark times the processor count.
#[must_use]
pub fn tracker_channel(capacity: usize) -> (TrackerSender, TrackerInbox) {
    let (tx, rx) = chan::bounded(capacity);
    (TrackerSender { tx }, TrackerInbox { rx })
}

/// Per-receiver sequence bookkeeping. Delivery is FIFO per (sender,
/// receiver) pair; a jump in a sender's seqno means the transport lost
/// frames and the gap is counted into the interval result.
#[derive(Debug)]
pub struct SeqTracker {
    expected: Vec<Option<u32>>,
    gaps: u64,
}

impl SeqTracker {
    #[must_use]
    pub fn new(senders: usize) -> Self {
        SeqTracker {
            expected: vec![None; senders],
            gaps: 0,
        }
    }

    /// Record a received seqno; returns the number of frames lost
    /// immediately before it.
    pub fn observe(&mut self, sender: u8, seqno: u32) -> u64 {
        let Some(slot) = self.expected.get_mut(usize::from(sender)) else {
            warn!("frame from unknown sender {sender}");
            return 0;
        };
        let lost = match *slot {
            None => 0,
            Some(expected) if seqno >= expected => u64::from(seqno - expected),
            Some(expected) => {
                // duplicate or reordered; FIFO transports never get here
                warn!("sender {sender} seqno {seqno} below expected {expected}");
                0
            }
        };
        *slot = Some(seqno.wrapping_add(1));
        if lost > 0 {
            warn!("sender {sender}: {lost} frame(s) lost before seqno {seqno}");
            metrics::counter!(SEQ_GAPS_METRIC).increment(lost);
            self.gaps += lost;
        }
        lost
    }

    /// Gaps accumulated since the last call; reported per interval.
    pub fn take_gaps(&mut self) -> u64 {
        std::mem::take(&mut self.gaps)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // valid in tests
mod tests {
    use super::*;

    #[test]
    fn channel_is_fifo_and_bounded() {
        let (tx, rx) = tracker_channel(4);
        for i in 0..4u8 {
            assert!(tx.send(vec![i]));
        }
        assert_eq!(rx.len(), 4);
        for i in 0..4u8 {
            let frame = rx.recv_timeout(Duration::from_millis(10)).unwrap();
            assert_eq!(frame, vec![i]);
        }
        assert!(rx.is_empty());
    }

    #[test]
    fn send_fails_once_receiver_dropped() {
        let (tx, rx) = tracker_channel(1);
        drop(rx);
        assert!(!tx.send(vec![]));
    }

    #[test]
    fn seq_gaps_are_counted_per_sender() {
        let mut seq = SeqTracker::new(2);
        assert_eq!(seq.observe(0, 0), 0);
        assert_eq!(seq.observe(0, 1), 0);
        // sender 1 starts late; first observation never counts as a gap
        assert_eq!(seq.observe(1, 5), 0);
        // two frames lost from sender 0
        assert_eq!(seq.observe(0, 4), 2);
        assert_eq!(seq.observe(1, 6), 0);
        assert_eq!(seq.take_gaps(), 2);
        assert_eq!(seq.take_gaps(), 0);
    }

    #[test]
    fn reordered_seqno_is_not_a_gap() {
        let mut seq = SeqTracker::new(1);
        seq.observe(0, 3);
        assert_eq!(seq.observe(0, 2), 0);
        assert_eq!(seq.take_gaps(), 0);
    }

    #[test]
    fn unknown_sender_is_ignored() {
        let mut seq = SeqTracker::new(1);
        assert_eq!(seq.observe(9, 0), 0);
    }
}
