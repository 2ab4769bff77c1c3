// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! External configuration model, deserialized from YAML.

use crate::errors::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tags::ClassMask;

/// Geo tag depth: lite keeps continent and country only, full adds the
/// per-provider region classes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeoMode {
    Lite,
    #[default]
    Full,
}

/// How unique IPs are counted for one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IpCountingMethod {
    /// Exact: every address counts.
    #[default]
    All,
    /// Addresses sharing a /prefix collapse into one.
    Prefixagg,
    /// Only the first address observed in each /prefix counts.
    Sample,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IpCountingSpec {
    pub method: IpCountingMethod,
    pub prefix_bits: u8,
}

impl Default for IpCountingSpec {
    fn default() -> Self {
        IpCountingSpec {
            method: IpCountingMethod::All,
            prefix_bits: 32,
        }
    }
}

/// An inclusive port range, written `"80"` or `"80-443"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortRange {
    pub first: u16,
    pub last: u16,
}

impl FromStr for PortRange {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let bad = || ConfigError::BadPortRange(input.to_string());
        let (first, last) = match input.split_once('-') {
            Some((lo, hi)) => (
                lo.trim().parse().map_err(|_| bad())?,
                hi.trim().parse().map_err(|_| bad())?,
            ),
            None => {
                let port: u16 = input.trim().parse().map_err(|_| bad())?;
                (port, port)
            }
        };
        if first > last {
            return Err(bad());
        }
        Ok(PortRange { first, last })
    }
}

impl TryFrom<String> for PortRange {
    type Error = ConfigError;

    fn try_from(input: String) -> Result<Self, Self::Error> {
        input.parse()
    }
}

impl From<PortRange> for String {
    fn from(range: PortRange) -> String {
        if range.first == range.last {
            range.first.to_string()
        } else {
            format!("{}-{}", range.first, range.last)
        }
    }
}

/// The configuration as written by the operator.
///
/// Every field has a default so a minimal file (or none at all) yields a
/// runnable engine. Port range lists distinguish "absent" (all ports
/// tagged) from "present but empty" (no ports tagged).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExternalConfig {
    pub tracker_count: u16,
    pub processor_count: u16,
    pub interval_seconds: u32,
    /// Class bitmask; 0 allows every class.
    pub allowed_metric_classes: ClassMask,
    pub tcp_src_port_range: Option<Vec<PortRange>>,
    pub tcp_dst_port_range: Option<Vec<PortRange>>,
    pub udp_src_port_range: Option<Vec<PortRange>>,
    pub udp_dst_port_range: Option<Vec<PortRange>>,
    pub geo_mode: GeoMode,
    pub src_ip_counting: IpCountingSpec,
    pub dst_ip_counting: IpCountingSpec,
    /// Per-(processor, tracker) send-side inbox high-water mark.
    pub internal_hwm: usize,
    /// IP updates buffered per tracker before a batch is flushed.
    pub batch_size: usize,
    /// Flush cadence for half-filled batches, in milliseconds.
    pub flush_millis: u64,
    pub query_tagger_labels: bool,
    pub geoasn_whitelist_file: Option<PathBuf>,
    /// Label attached to every result row.
    pub output_row_label: String,
    /// Prometheus endpoint address; absent disables the endpoint.
    pub metrics_address: Option<SocketAddr>,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        ExternalConfig {
            tracker_count: 4,
            processor_count: 1,
            interval_seconds: 60,
            allowed_metric_classes: ClassMask::ALL,
            tcp_src_port_range: None,
            tcp_dst_port_range: None,
            udp_src_port_range: None,
            udp_dst_port_range: None,
            geo_mode: GeoMode::default(),
            src_ip_counting: IpCountingSpec::default(),
            dst_ip_counting: IpCountingSpec::default(),
            internal_hwm: 30,
            batch_size: 10_000,
            flush_millis: 500,
            query_tagger_labels: true,
            geoasn_whitelist_file: None,
            output_row_label: "telescope".to_string(),
            metrics_address: None,
        }
    }
}

impl ExternalConfig {
    pub fn from_yaml_file(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yaml_ng::from_str(&text)?)
    }
}
