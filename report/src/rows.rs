// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-interval result rows and the sinks that consume them.

use arrayvec::ArrayVec;
use config::ReportConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use tags::{MetricClass, TagKey};
use tracing::error;

/// Cross-references captured when a tally was first created, so
/// downstream consumers can de-aggregate couplet rows.
pub const MAX_ASSOCIATED: usize = 8;

/// One aggregated metric for one interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRow {
    pub interval_ts: u32,
    pub label: Arc<str>,
    pub class: MetricClass,
    pub value: String,
    pub src_ip_count: u64,
    pub dst_ip_count: u64,
    pub src_asn_count: u64,
    pub packet_count: u64,
    pub byte_count: u64,
    pub associated: ArrayVec<TagKey, MAX_ASSOCIATED>,
}

/// Everything the engine knows about one completed interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalResult {
    pub interval_ts: u32,
    pub rows: Vec<ResultRow>,
    /// Frames detected as lost across all trackers during the interval.
    pub seq_gaps: u64,
}

/// Consumer of merged interval results. Rows live only until `emit`
/// returns.
pub trait ResultSink: Send {
    fn emit(&mut self, result: IntervalResult);
}

/// Render a tag's value for a result row.
///
/// Couplet values are whitelist indices and resolve through the
/// configured whitelist; with `query_tagger_labels` off, every class
/// renders its raw decimal value.
#[must_use]
pub fn render_value(key: TagKey, config: &ReportConfig) -> String {
    if !config.query_tagger_labels {
        return key.value().to_string();
    }
    if key.class().is_some_and(MetricClass::is_couplet)
        && let Some(rendered) = config
            .whitelist
            .as_ref()
            .and_then(|list| list.render(key.value()))
    {
        return rendered;
    }
    key.render_value()
}

/// Collecting sink shared with the caller; used by tests and by anything
/// that wants to poll results in-process.
#[derive(Debug, Clone, Default)]
pub struct SharedVecSink {
    results: Arc<Mutex<Vec<IntervalResult>>>,
}

impl SharedVecSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn results(&self) -> Vec<IntervalResult> {
        self.results.lock().clone()
    }
}

impl ResultSink for SharedVecSink {
    fn emit(&mut self, result: IntervalResult) {
        self.results.lock().push(result);
    }
}

/// Tab-separated writer sink, one row per line.
pub struct TsvSink<W: std::io::Write + Send> {
    out: W,
}

impl<W: std::io::Write + Send> TsvSink<W> {
    #[must_use]
    pub fn new(out: W) -> Self {
        TsvSink { out }
    }
}

impl<W: std::io::Write + Send> ResultSink for TsvSink<W> {
    fn emit(&mut self, result: IntervalResult) {
        for row in &result.rows {
            let line = format!(
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
                row.interval_ts,
                row.label,
                row.class,
                row.value,
                row.src_ip_count,
                row.dst_ip_count,
                row.src_asn_count,
                row.packet_count,
                row.byte_count,
            );
            if let Err(e) = self.out.write_all(line.as_bytes()) {
                error!("result write failed: {e}");
                return;
            }
        }
        if let Err(e) = self.out.flush() {
            error!("result flush failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::ExternalConfig;
    use tags::pack_cc;

    fn test_config(labels: bool) -> ReportConfig {
        #[allow(clippy::unwrap_used)] // valid in tests
        let mut config = ExternalConfig::default().finalize().unwrap();
        config.query_tagger_labels = labels;
        config
    }

    #[test]
    fn labelled_rendering() {
        let config = test_config(true);
        let key = TagKey::new(MetricClass::MaxmindCountry, u32::from(pack_cc(b"NL")));
        assert_eq!(render_value(key, &config), "NL");
    }

    #[test]
    fn raw_rendering_when_labels_disabled() {
        let config = test_config(false);
        let key = TagKey::new(MetricClass::MaxmindCountry, u32::from(pack_cc(b"NL")));
        assert_eq!(render_value(key, &config), u32::from(pack_cc(b"NL")).to_string());
    }

    #[test]
    fn couplet_without_whitelist_falls_back_to_index() {
        let config = test_config(true);
        let key = TagKey::new(MetricClass::NetacqCountryAsn, 3);
        assert_eq!(render_value(key, &config), "3");
    }

    #[test]
    fn shared_sink_collects() {
        let sink = SharedVecSink::new();
        let mut writer = sink.clone();
        writer.emit(IntervalResult {
            interval_ts: 60,
            rows: vec![],
            seq_gaps: 0,
        });
        assert_eq!(sink.results().len(), 1);
    }
}
