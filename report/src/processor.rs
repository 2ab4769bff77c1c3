// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Packet-processing workers.
//!
//! A processor consumes tagged observations from its input shard,
//! expands the upstream annotations into a tag list, and appends per-IP
//! updates to a pending batch per tracker. Batches flush when they reach
//! the configured size, on the flush cadence, and on interval
//! boundaries; interval-end and halt markers ride the same per-tracker
//! FIFOs as the update frames.

use crate::observation::{PROTO_ICMP, PROTO_TCP, PROTO_UDP, PacketObservation};
use arrayvec::ArrayVec;
use config::{GeoMode, ReportConfig};
use crossbeam_channel as chan;
use std::sync::Arc;
use std::time::Duration;
use tags::{GeoProvider, MetricClass, TagKey, icmp_value};
use transport::{IpUpdate, MAX_TAGS, MsgType, Role, TagEntry, TrackerSender, encode_control, encode_update};
use tracing::{debug, info, warn};

/// Counter of observations consumed across all processors.
pub const OBSERVATIONS_METRIC: &str = "telescope_observations";
/// Counter of update batches flushed to trackers.
pub const BATCHES_METRIC: &str = "telescope_batches_flushed";

/// Events delivered to a processor from the control thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// The interval that started at the carried timestamp has ended.
    IntervalEnd(u32),
    /// Flush and stop; final event.
    Halt,
    /// Discard in-flight state engine-wide.
    Reset,
}

/// Expands one observation into its tag list under the configured
/// class mask, port maps, geo mode and couplet whitelist.
#[derive(Debug, Clone)]
pub struct TagExpander {
    config: Arc<ReportConfig>,
}

pub type TagKeys = ArrayVec<TagKey, MAX_TAGS>;

impl TagExpander {
    #[must_use]
    pub fn new(config: Arc<ReportConfig>) -> Self {
        TagExpander { config }
    }

    fn push(&self, out: &mut TagKeys, class: MetricClass, value: u32) {
        if !self.config.class_mask.allows(class) {
            return;
        }
        if out.try_push(TagKey::new(class, value)).is_err() {
            debug!("tag list full, dropping {class}:{value}");
        }
    }

    fn push_port(&self, out: &mut TagKeys, class: MetricClass, port: u16) {
        let Some(map) = self.config.ports.for_class(class) else {
            return;
        };
        if map.contains(port) {
            self.push(out, class, u32::from(port));
        }
    }

    /// Build the full tag list for one observation. The implicit
    /// combined tag always comes first.
    pub fn expand(&self, obs: &PacketObservation, out: &mut TagKeys) {
        out.clear();
        self.push(out, MetricClass::Combined, 0);
        self.push(out, MetricClass::IpProtocol, u32::from(obs.protocol));

        match obs.protocol {
            PROTO_TCP => {
                self.push_port(out, MetricClass::TcpSrcPort, obs.src_port);
                self.push_port(out, MetricClass::TcpDstPort, obs.dst_port);
            }
            PROTO_UDP => {
                self.push_port(out, MetricClass::UdpSrcPort, obs.src_port);
                self.push_port(out, MetricClass::UdpDstPort, obs.dst_port);
            }
            PROTO_ICMP => {
                self.push(
                    out,
                    MetricClass::IcmpTypecode,
                    icmp_value(obs.src_port, obs.dst_port),
                );
            }
            _ => {}
        }

        for idx in 0..GeoProvider::COUNT {
            let Some(provider) = GeoProvider::from_index(idx) else {
                continue;
            };
            if !obs.has_provider(provider) {
                continue;
            }
            let geo = obs.geo_for(provider);
            if geo.continent != 0 {
                self.push(out, provider.continent_class(), u32::from(geo.continent));
            }
            if geo.country != 0 {
                self.push(out, provider.country_class(), u32::from(geo.country));
            }
            if self.config.geo_mode == GeoMode::Full && geo.region != 0 {
                self.push(out, provider.region_class(), geo.region);
            }
        }

        if obs.src_asn != 0 {
            self.push(out, MetricClass::PfxAsn, obs.src_asn);
        }

        if let Some(whitelist) = self.config.whitelist.as_ref()
            && obs.src_asn != 0
        {
            for idx in 0..GeoProvider::COUNT {
                let Some(provider) = GeoProvider::from_index(idx) else {
                    continue;
                };
                if !obs.has_provider(provider) {
                    continue;
                }
                let country = obs.geo_for(provider).country;
                if country == 0 {
                    continue;
                }
                if let Some(entry) = whitelist.lookup(country, obs.src_asn) {
                    self.push(out, provider.couplet_class(), entry);
                }
            }
        }

        if obs.filter_bits != 0 {
            for bit in 0..32 {
                if obs.filter_bits & (1 << bit) != 0 {
                    self.push(out, MetricClass::FilterCriteria, bit);
                }
            }
        }
    }
}

/// Shard an address to its owning tracker.
#[must_use]
pub fn tracker_for(ip: u32, trackers: usize) -> usize {
    (ip >> 24) as usize % trackers.max(1)
}

/// One packet-processing worker.
pub struct Processor {
    id: u8,
    config: Arc<ReportConfig>,
    expander: TagExpander,
    senders: Vec<TrackerSender>,
    seqnos: Vec<u32>,
    pending: Vec<Vec<IpUpdate>>,
}

impl Processor {
    #[must_use]
    pub fn new(id: u8, config: Arc<ReportConfig>, senders: Vec<TrackerSender>) -> Self {
        let trackers = senders.len();
        Processor {
            id,
            expander: TagExpander::new(Arc::clone(&config)),
            config,
            senders,
            seqnos: vec![0; trackers],
            pending: (0..trackers).map(|_| Vec::new()).collect(),
        }
    }

    fn next_seqno(&mut self, tracker: usize) -> u32 {
        let seqno = self.seqnos[tracker];
        self.seqnos[tracker] += 1;
        seqno
    }

    fn flush(&mut self, tracker: usize) {
        if self.pending[tracker].is_empty() {
            return;
        }
        let updates = std::mem::take(&mut self.pending[tracker]);
        let frame = encode_update(self.id, self.next_seqno(tracker), &updates);
        if !self.senders[tracker].send(frame) {
            warn!("processor {}: tracker {tracker} is gone", self.id);
        }
        metrics::counter!(BATCHES_METRIC).increment(1);
    }

    fn flush_all(&mut self) {
        for tracker in 0..self.senders.len() {
            self.flush(tracker);
        }
    }

    fn send_control(&mut self, msg_type: MsgType, timestamp: u32) {
        for tracker in 0..self.senders.len() {
            let frame = encode_control(msg_type, self.id, timestamp, self.next_seqno(tracker));
            if !self.senders[tracker].send(frame) {
                warn!("processor {}: tracker {tracker} is gone", self.id);
            }
        }
    }

    /// Process one observation: expand tags once, then append the SRC
    /// update (carrying the packet and its bytes) and the DST update
    /// (zero bytes, zero packets) to their trackers' pending batches.
    pub fn handle(&mut self, obs: &PacketObservation) {
        let mut keys = TagKeys::new();
        self.expander.expand(obs, &mut keys);

        let bytes = u32::from(obs.ip_bytes);
        let src_tags: ArrayVec<TagEntry, MAX_TAGS> = keys
            .iter()
            .map(|&key| TagEntry {
                key,
                bytes: u64::from(bytes),
                packets: 1,
            })
            .collect();
        let dst_tags: ArrayVec<TagEntry, MAX_TAGS> = keys
            .iter()
            .map(|&key| TagEntry {
                key,
                bytes: 0,
                packets: 0,
            })
            .collect();

        let trackers = self.senders.len();
        let src_ip = u32::from(obs.src_ip);
        let dst_ip = u32::from(obs.dst_ip);

        let src_tracker = tracker_for(src_ip, trackers);
        self.pending[src_tracker].push(IpUpdate {
            ip: src_ip,
            src_asn: obs.src_asn,
            role: Role::Src,
            bytes,
            packets: 1,
            tags: src_tags,
        });

        let dst_tracker = tracker_for(dst_ip, trackers);
        self.pending[dst_tracker].push(IpUpdate {
            ip: dst_ip,
            src_asn: obs.src_asn,
            role: Role::Dst,
            bytes: 0,
            packets: 0,
            tags: dst_tags,
        });

        metrics::counter!(OBSERVATIONS_METRIC).increment(1);

        for tracker in [src_tracker, dst_tracker] {
            if self.pending[tracker].len() >= self.config.batch_size {
                self.flush(tracker);
            }
        }
    }

    fn interval_end(&mut self, interval_ts: u32) {
        debug!("processor {}: interval {interval_ts} ended", self.id);
        self.flush_all();
        self.send_control(MsgType::IntervalEnd, interval_ts);
    }

    fn halt(&mut self) {
        info!("processor {}: halting", self.id);
        self.flush_all();
        self.send_control(MsgType::Halt, 0);
    }

    fn reset(&mut self) {
        for pending in &mut self.pending {
            pending.clear();
        }
        self.send_control(MsgType::Reset, 0);
    }

    /// Worker loop: observations, control events and the flush cadence.
    pub fn run(
        mut self,
        obs_rx: chan::Receiver<PacketObservation>,
        ctrl_rx: chan::Receiver<ControlEvent>,
    ) {
        let mut obs_rx = obs_rx;
        let flush_tick = chan::tick(self.config.flush_interval.max(Duration::from_millis(1)));
        loop {
            let mut obs_closed = false;
            chan::select! {
                recv(ctrl_rx) -> event => match event {
                    Ok(ControlEvent::IntervalEnd(ts)) => self.interval_end(ts),
                    Ok(ControlEvent::Reset) => self.reset(),
                    Ok(ControlEvent::Halt) | Err(_) => {
                        self.halt();
                        return;
                    }
                },
                recv(obs_rx) -> obs => match obs {
                    Ok(obs) => self.handle(&obs),
                    Err(_) => obs_closed = true,
                },
                recv(flush_tick) -> _ => self.flush_all(),
            }
            if obs_closed {
                // feed is done; only control can stop us now
                obs_rx = chan::never();
            }
        }
    }
}
