// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Country-ASN couplet whitelist.
//!
//! The whitelist file enumerates `"CC AS"` pairs, one per line; only the
//! listed pairs may produce couplet tags. Couplet tag values are indices
//! into this table, since a 32-bit tag value cannot carry a packed
//! country code next to a full 32-bit ASN.

use crate::errors::{ConfigError, ConfigResult};
use std::collections::HashMap;
use std::path::Path;
use tags::{pack_cc, unpack_cc};
use tracing::info;

#[derive(Debug, Default, Clone)]
pub struct GeoAsnWhitelist {
    entries: Vec<(u16, u32)>,
    index: HashMap<(u16, u32), u32>,
}

impl GeoAsnWhitelist {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let list = Self::from_str_contents(&text)?;
        info!(
            "loaded {} country-ASN couplet entries from {}",
            list.len(),
            path.display()
        );
        Ok(list)
    }

    /// Parse whitelist text: `CC AS` per line, `#` starts a comment.
    pub fn from_str_contents(text: &str) -> ConfigResult<Self> {
        let mut list = GeoAsnWhitelist::default();
        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let bad = || ConfigError::BadWhitelistEntry {
                line: line_no + 1,
                text: raw.to_string(),
            };
            let (cc, asn) = line.split_once(char::is_whitespace).ok_or_else(bad)?;
            if cc.len() != 2 || !cc.bytes().all(|b| b.is_ascii_alphabetic()) {
                return Err(bad());
            }
            let asn: u32 = asn.trim().parse().map_err(|_| bad())?;
            list.insert(pack_cc(cc.to_ascii_uppercase().as_bytes()), asn);
        }
        Ok(list)
    }

    fn insert(&mut self, cc: u16, asn: u32) {
        self.index.entry((cc, asn)).or_insert_with(|| {
            self.entries.push((cc, asn));
            u32::try_from(self.entries.len() - 1).unwrap_or(u32::MAX)
        });
    }

    /// Index of the `(country, asn)` pair, if whitelisted.
    #[must_use]
    pub fn lookup(&self, cc: u16, asn: u32) -> Option<u32> {
        self.index.get(&(cc, asn)).copied()
    }

    #[must_use]
    pub fn entry(&self, index: u32) -> Option<(u16, u32)> {
        self.entries.get(index as usize).copied()
    }

    /// Human-readable `CC.ASN` form of an entry.
    #[must_use]
    pub fn render(&self, index: u32) -> Option<String> {
        self.entry(index).map(|(cc, asn)| {
            let (a, b) = unpack_cc(cc);
            format!("{a}{b}.{asn}")
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
