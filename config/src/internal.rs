// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Internal, validated configuration. Built once from an
//! [`ExternalConfig`] at startup and immutable afterwards; every worker
//! holds it behind an `Arc`.

use crate::errors::{ConfigError, ConfigResult};
use crate::external::{ExternalConfig, GeoMode, IpCountingMethod, IpCountingSpec, PortRange};
use crate::portmap::PortBitmap;
use crate::whitelist::GeoAsnWhitelist;
use std::net::SocketAddr;
use std::time::Duration;
use tags::{ClassMask, MetricClass};

pub const MAX_TRACKERS: u16 = 32;
pub const MAX_PROCESSORS: u16 = 64;

/// Finalized per-direction unique-IP counting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpCounting {
    pub method: IpCountingMethod,
    pub prefix_bits: u8,
    mask: u32,
}

impl IpCounting {
    fn from_spec(spec: IpCountingSpec) -> ConfigResult<Self> {
        if spec.prefix_bits == 0 || spec.prefix_bits > 32 {
            return Err(ConfigError::BadPrefixBits(spec.prefix_bits));
        }
        Ok(IpCounting {
            method: spec.method,
            prefix_bits: spec.prefix_bits,
            mask: u32::MAX << (32 - spec.prefix_bits),
        })
    }

    /// Network mask selecting the /prefix of an address.
    #[must_use]
    pub const fn mask(&self) -> u32 {
        self.mask
    }
}

/// Allowed-port maps for the four port classes.
#[derive(Debug, Clone, Default)]
pub struct PortMaps {
    pub tcp_src: PortBitmap,
    pub tcp_dst: PortBitmap,
    pub udp_src: PortBitmap,
    pub udp_dst: PortBitmap,
}

impl PortMaps {
    #[must_use]
    pub fn for_class(&self, class: MetricClass) -> Option<&PortBitmap> {
        match class {
            MetricClass::TcpSrcPort => Some(&self.tcp_src),
            MetricClass::TcpDstPort => Some(&self.tcp_dst),
            MetricClass::UdpSrcPort => Some(&self.udp_src),
            MetricClass::UdpDstPort => Some(&self.udp_dst),
            _ => None,
        }
    }
}

fn build_bitmap(ranges: Option<&[PortRange]>) -> PortBitmap {
    match ranges {
        // absent: every port is tagged
        None => PortBitmap::new_full(),
        Some(ranges) => {
            let mut map = PortBitmap::new_empty();
            for range in ranges {
                map.set_range(range.first, range.last);
            }
            map
        }
    }
}

/// The engine's immutable runtime configuration.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub tracker_count: usize,
    pub processor_count: usize,
    pub interval_seconds: u32,
    pub class_mask: ClassMask,
    pub ports: PortMaps,
    pub geo_mode: GeoMode,
    pub src_counting: IpCounting,
    pub dst_counting: IpCounting,
    pub internal_hwm: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub query_tagger_labels: bool,
    pub whitelist: Option<GeoAsnWhitelist>,
    pub output_row_label: String,
    pub metrics_address: Option<SocketAddr>,
}

impl ExternalConfig {
    /// Validate and build the runtime configuration.
    pub fn finalize(self) -> ConfigResult<ReportConfig> {
        if self.tracker_count == 0 || self.tracker_count > MAX_TRACKERS {
            return Err(ConfigError::BadTrackerCount(self.tracker_count));
        }
        if self.processor_count == 0 || self.processor_count > MAX_PROCESSORS {
            return Err(ConfigError::BadProcessorCount(self.processor_count));
        }
        if self.interval_seconds == 0 {
            return Err(ConfigError::BadInterval);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::BadBatchSize);
        }
        if self.internal_hwm == 0 {
            return Err(ConfigError::BadHighWaterMark);
        }

        let whitelist = self
            .geoasn_whitelist_file
            .as_deref()
            .map(GeoAsnWhitelist::from_file)
            .transpose()?;

        Ok(ReportConfig {
            tracker_count: usize::from(self.tracker_count),
            processor_count: usize::from(self.processor_count),
            interval_seconds: self.interval_seconds,
            class_mask: self.allowed_metric_classes,
            ports: PortMaps {
                tcp_src: build_bitmap(self.tcp_src_port_range.as_deref()),
                tcp_dst: build_bitmap(self.tcp_dst_port_range.as_deref()),
                udp_src: build_bitmap(self.udp_src_port_range.as_deref()),
                udp_dst: build_bitmap(self.udp_dst_port_range.as_deref()),
            },
            geo_mode: self.geo_mode,
            src_counting: IpCounting::from_spec(self.src_ip_counting)?,
            dst_counting: IpCounting::from_spec(self.dst_ip_counting)?,
            internal_hwm: self.internal_hwm,
            batch_size: self.batch_size,
            flush_interval: Duration::from_millis(self.flush_millis),
            query_tagger_labels: self.query_tagger_labels,
            whitelist,
            output_row_label: self.output_row_label,
            metrics_address: self.metrics_address,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // valid in tests
mod tests {
    use super::*;

    #[test]
    fn defaults_finalize() {
        let config = ExternalConfig::default().finalize().unwrap();
        assert_eq!(config.tracker_count, 4);
        assert_eq!(config.processor_count, 1);
        assert!(config.ports.tcp_dst.contains(80));
        assert_eq!(config.src_counting.mask(), u32::MAX);
        assert!(config.whitelist.is_none());
    }

    #[test]
    fn bounds_are_enforced() {
        let mut bad = ExternalConfig {
            tracker_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            bad.clone().finalize(),
            Err(ConfigError::BadTrackerCount(0))
        ));
        bad.tracker_count = 33;
        assert!(bad.finalize().is_err());

        let bad = ExternalConfig {
            processor_count: 65,
            ..Default::default()
        };
        assert!(matches!(
            bad.finalize(),
            Err(ConfigError::BadProcessorCount(65))
        ));

        let bad = ExternalConfig {
            interval_seconds: 0,
            ..Default::default()
        };
        assert!(matches!(bad.finalize(), Err(ConfigError::BadInterval)));

        let bad = ExternalConfig {
            src_ip_counting: IpCountingSpec {
                method: IpCountingMethod::Sample,
                prefix_bits: 0,
            },
            ..Default::default()
        };
        assert!(matches!(bad.finalize(), Err(ConfigError::BadPrefixBits(0))));
    }

    #[test]
    fn present_but_empty_ranges_disable_a_class() {
        let config = ExternalConfig {
            tcp_dst_port_range: Some(vec![]),
            ..Default::default()
        }
        .finalize()
        .unwrap();
        assert!(config.ports.tcp_dst.is_empty());
        // other classes untouched
        assert!(config.ports.tcp_src.contains(80));
    }

    #[test]
    fn prefix_masks() {
        let counting = IpCounting::from_spec(IpCountingSpec {
            method: IpCountingMethod::Prefixagg,
            prefix_bits: 24,
        })
        .unwrap();
        assert_eq!(counting.mask(), 0xFFFF_FF00);

        let exact = IpCounting::from_spec(IpCountingSpec::default()).unwrap();
        assert_eq!(exact.mask(), u32::MAX);
    }
}
