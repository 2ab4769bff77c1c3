// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! End-to-end runs of the full engine: observations in on one side,
//! merged interval results out on the other.

#![allow(clippy::unwrap_used)]

use config::{ExternalConfig, GeoAsnWhitelist, IpCountingMethod, IpCountingSpec, ReportConfig};
use report::engine::{Engine, EngineHandle};
use report::observation::{PROTO_TCP, PROTO_UDP, PacketObservation};
use report::rows::{IntervalResult, ResultRow, SharedVecSink};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tags::{GeoProvider, MetricClass, pack_cc};

fn start(config: ReportConfig) -> (EngineHandle, SharedVecSink) {
    let sink = SharedVecSink::new();
    let handle = Engine::start(Arc::new(config), Box::new(sink.clone())).unwrap();
    (handle, sink)
}

fn obs(src: [u8; 4], dst: [u8; 4], bytes: u16, proto: u8, sport: u16, dport: u16) -> PacketObservation {
    PacketObservation {
        src_ip: Ipv4Addr::from(src),
        dst_ip: Ipv4Addr::from(dst),
        ip_bytes: bytes,
        protocol: proto,
        src_port: sport,
        dst_port: dport,
        ..Default::default()
    }
}

/// Let a shard's queue drain before marking an interval boundary, so
/// every queued observation lands in the intended interval.
fn settle(handle: &EngineHandle) {
    for shard in 0..handle.shard_count() {
        let tx = handle.observation_sender(shard).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !tx.is_empty() {
            assert!(Instant::now() < deadline, "shard {shard} never drained");
            std::thread::sleep(Duration::from_millis(1));
        }
    }
    std::thread::sleep(Duration::from_millis(50));
}

fn wait_for_results(sink: &SharedVecSink, count: usize) -> Vec<IntervalResult> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let results = sink.results();
        if results.len() >= count {
            return results;
        }
        assert!(
            Instant::now() < deadline,
            "only {} of {count} results arrived",
            results.len()
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn row<'a>(result: &'a IntervalResult, class: MetricClass, value: &str) -> &'a ResultRow {
    result
        .rows
        .iter()
        .find(|row| row.class == class && row.value == value)
        .unwrap_or_else(|| panic!("no row for {class}:{value}"))
}

#[test]
fn two_trackers_one_processor() {
    let config = ExternalConfig {
        tracker_count: 2,
        processor_count: 1,
        output_row_label: "scenario".to_string(),
        ..Default::default()
    }
    .finalize()
    .unwrap();
    let (handle, sink) = start(config);

    let feed = handle.observation_sender(0).unwrap();
    feed.send(obs([1, 2, 3, 4], [5, 6, 7, 8], 40, PROTO_TCP, 22, 80)).unwrap();
    feed.send(obs([1, 2, 3, 4], [9, 9, 9, 9], 60, PROTO_TCP, 22, 443)).unwrap();
    feed.send(obs([10, 0, 0, 1], [5, 6, 7, 8], 100, PROTO_UDP, 53, 5353)).unwrap();
    settle(&handle);
    handle.control().interval_end(100);

    let results = wait_for_results(&sink, 1);
    let result = &results[0];
    assert_eq!(result.interval_ts, 100);
    assert_eq!(result.seq_gaps, 0);

    let combined = row(result, MetricClass::Combined, "0");
    assert_eq!(combined.packet_count, 3);
    assert_eq!(combined.byte_count, 200);
    assert_eq!(combined.src_ip_count, 2);
    // 5.6.7.8 is targeted twice but counts once
    assert_eq!(combined.dst_ip_count, 2);
    assert_eq!(combined.label.as_ref(), "scenario");

    let ssh = row(result, MetricClass::TcpSrcPort, "22");
    assert_eq!(ssh.packet_count, 2);
    assert_eq!(ssh.src_ip_count, 1);
    assert_eq!(ssh.dst_ip_count, 2);

    handle.shutdown();
}

#[test]
fn dst_port_filter_drops_unlisted_ports() {
    let config = ExternalConfig {
        tracker_count: 2,
        tcp_dst_port_range: Some(vec!["80".parse().unwrap()]),
        ..Default::default()
    }
    .finalize()
    .unwrap();
    let (handle, sink) = start(config);

    let feed = handle.observation_sender(0).unwrap();
    for dport in [22u16, 80, 80, 443, 80] {
        feed.send(obs([1, 2, 3, 4], [5, 6, 7, 8], 40, PROTO_TCP, 12345, dport)).unwrap();
    }
    settle(&handle);
    handle.control().interval_end(100);

    let results = wait_for_results(&sink, 1);
    let result = &results[0];
    let http = row(result, MetricClass::TcpDstPort, "80");
    assert_eq!(http.packet_count, 3);
    assert!(
        !result
            .rows
            .iter()
            .any(|r| r.class == MetricClass::TcpDstPort && r.value != "80"),
        "unlisted destination ports must not produce rows"
    );
    assert_eq!(row(result, MetricClass::Combined, "0").packet_count, 5);

    handle.shutdown();
}

#[test]
fn sampled_source_counting() {
    let config = ExternalConfig {
        tracker_count: 2,
        src_ip_counting: IpCountingSpec {
            method: IpCountingMethod::Sample,
            prefix_bits: 24,
        },
        ..Default::default()
    }
    .finalize()
    .unwrap();
    let (handle, sink) = start(config);

    let feed = handle.observation_sender(0).unwrap();
    for host in 0..200u8 {
        feed.send(obs([1, 2, 3, host], [5, 6, 7, 8], 40, PROTO_UDP, 53, 53)).unwrap();
    }
    feed.send(obs([9, 9, 9, 1], [5, 6, 7, 8], 40, PROTO_UDP, 53, 53)).unwrap();
    settle(&handle);
    handle.control().interval_end(100);

    let results = wait_for_results(&sink, 1);
    let combined = row(&results[0], MetricClass::Combined, "0");
    assert_eq!(combined.src_ip_count, 2);
    assert_eq!(combined.packet_count, 201);

    handle.shutdown();
}

#[test]
fn halt_mid_interval_emits_nothing() {
    let config = ExternalConfig {
        tracker_count: 2,
        ..Default::default()
    }
    .finalize()
    .unwrap();
    let (handle, sink) = start(config);

    let feed = handle.observation_sender(0).unwrap();
    feed.send(obs([1, 2, 3, 4], [5, 6, 7, 8], 40, PROTO_TCP, 22, 80)).unwrap();
    settle(&handle);
    // no interval boundary before shutdown
    handle.shutdown();

    assert!(sink.results().is_empty());
}

#[test]
fn single_tracker_counts_asns_exactly() {
    let asn = 64500;
    let run = |trackers: u16| {
        let config = ExternalConfig {
            tracker_count: trackers,
            ..Default::default()
        }
        .finalize()
        .unwrap();
        let (handle, sink) = start(config);
        let feed = handle.observation_sender(0).unwrap();
        // top octets 2 and 9 shard to different trackers when there are two
        for src in [[2, 2, 3, 4], [9, 9, 9, 9]] {
            let mut packet = obs(src, [5, 6, 7, 8], 40, PROTO_TCP, 22, 80);
            packet.src_asn = asn;
            feed.send(packet).unwrap();
        }
        settle(&handle);
        handle.control().interval_end(100);
        let results = wait_for_results(&sink, 1);
        let count = row(&results[0], MetricClass::Combined, "0").src_asn_count;
        handle.shutdown();
        count
    };

    // one tracker sees both packets and deduplicates the ASN
    assert_eq!(run(1), 1);
    // partitioned trackers each count it once; the sum over-reports
    assert_eq!(run(2), 2);
}

#[test]
fn untagged_packets_produce_no_geo_rows() {
    let config = ExternalConfig::default().finalize().unwrap();
    let (handle, sink) = start(config);

    let feed = handle.observation_sender(0).unwrap();
    feed.send(obs([1, 2, 3, 4], [5, 6, 7, 8], 40, PROTO_TCP, 22, 80)).unwrap();
    settle(&handle);
    handle.control().interval_end(100);

    let results = wait_for_results(&sink, 1);
    assert!(
        results[0]
            .rows
            .iter()
            .all(|row| !row.class.is_geo() && !row.class.is_couplet())
    );

    handle.shutdown();
}

#[test]
fn whitelisted_couplets_row_with_associated_tags() {
    let mut config = ExternalConfig {
        tracker_count: 2,
        ..Default::default()
    }
    .finalize()
    .unwrap();
    config.whitelist = Some(GeoAsnWhitelist::from_str_contents("US 15169\n").unwrap());
    let (handle, sink) = start(config);

    let feed = handle.observation_sender(0).unwrap();
    let mut packet = obs([1, 2, 3, 4], [5, 6, 7, 8], 40, PROTO_TCP, 22, 80);
    packet.src_asn = 15169;
    packet.set_geo(GeoProvider::Maxmind, report::observation::GeoAnnotation {
        continent: pack_cc(b"NA"),
        country: pack_cc(b"US"),
        region: 0,
    });
    feed.send(packet).unwrap();
    // same ASN, non-whitelisted country
    let mut other = obs([9, 9, 9, 9], [5, 6, 7, 8], 40, PROTO_TCP, 22, 80);
    other.src_asn = 15169;
    other.set_geo(GeoProvider::Maxmind, report::observation::GeoAnnotation {
        continent: pack_cc(b"EU"),
        country: pack_cc(b"FR"),
        region: 0,
    });
    feed.send(other).unwrap();
    settle(&handle);
    handle.control().interval_end(100);

    let results = wait_for_results(&sink, 1);
    let couplet = row(&results[0], MetricClass::MaxmindCountryAsn, "US.15169");
    assert_eq!(couplet.packet_count, 1);
    assert_eq!(couplet.src_ip_count, 1);
    let expected = [
        tags::TagKey::new(MetricClass::MaxmindCountry, u32::from(pack_cc(b"US"))),
        tags::TagKey::new(MetricClass::PfxAsn, 15169),
    ];
    assert_eq!(couplet.associated.as_slice(), &expected);

    handle.shutdown();
}

#[test]
fn successive_intervals_emit_in_order() {
    let config = ExternalConfig {
        tracker_count: 3,
        processor_count: 2,
        ..Default::default()
    }
    .finalize()
    .unwrap();
    let (handle, sink) = start(config);

    let feed0 = handle.observation_sender(0).unwrap();
    let feed1 = handle.observation_sender(1).unwrap();

    feed0.send(obs([1, 2, 3, 4], [5, 6, 7, 8], 40, PROTO_TCP, 22, 80)).unwrap();
    feed1.send(obs([9, 9, 9, 9], [5, 6, 7, 8], 60, PROTO_TCP, 22, 80)).unwrap();
    settle(&handle);
    handle.control().interval_end(100);
    wait_for_results(&sink, 1);

    feed1.send(obs([12, 0, 0, 1], [5, 6, 7, 8], 80, PROTO_UDP, 53, 53)).unwrap();
    settle(&handle);
    handle.control().interval_end(160);
    let results = wait_for_results(&sink, 2);

    assert_eq!(results[0].interval_ts, 100);
    assert_eq!(row(&results[0], MetricClass::Combined, "0").packet_count, 2);
    assert_eq!(row(&results[0], MetricClass::Combined, "0").byte_count, 100);
    assert_eq!(results[1].interval_ts, 160);
    assert_eq!(row(&results[1], MetricClass::Combined, "0").packet_count, 1);

    handle.shutdown();
}

#[test]
fn identical_inputs_replay_identically() {
    let run = || {
        let config = ExternalConfig {
            tracker_count: 4,
            ..Default::default()
        }
        .finalize()
        .unwrap();
        let (handle, sink) = start(config);
        let feed = handle.observation_sender(0).unwrap();
        for i in 0..64u8 {
            feed.send(obs(
                [i % 7, 2, 3, i],
                [5, 6, 7, i],
                u16::from(i) + 40,
                if i % 2 == 0 { PROTO_TCP } else { PROTO_UDP },
                1000 + u16::from(i),
                80,
            ))
            .unwrap();
        }
        settle(&handle);
        handle.control().interval_end(100);
        let results = wait_for_results(&sink, 1);
        handle.shutdown();
        results
    };

    assert_eq!(run(), run());
}
