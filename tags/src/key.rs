// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::class::MetricClass;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A tag packed into 64 bits: `(class << 32) | value`.
///
/// The value is class-dependent: a port or protocol number, a two-letter
/// geo code packed with [`pack_cc`], an ASN, a whitelist index for the
/// country-ASN couplets, or a filter criterion index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct TagKey(u64);

impl TagKey {
    /// The implicit all-traffic tag.
    pub const COMBINED: TagKey = TagKey((MetricClass::Combined as u64) << 32);

    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn new(class: MetricClass, value: u32) -> Self {
        TagKey(((class as u64) << 32) | value as u64)
    }

    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        TagKey(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// The class byte as carried on the wire. May name no known class if
    /// the key was decoded from a corrupt frame.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn class_raw(self) -> u8 {
        (self.0 >> 32) as u8
    }

    #[must_use]
    pub const fn class(self) -> Option<MetricClass> {
        MetricClass::from_repr(self.class_raw())
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn value(self) -> u32 {
        self.0 as u32
    }

    /// Render the value for human consumption.
    ///
    /// Couplet values are whitelist indices and cannot be rendered here;
    /// callers holding the whitelist resolve those themselves.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn render_value(self) -> String {
        match self.class() {
            Some(class) if class.is_geo() && !class.is_region() => {
                let (a, b) = unpack_cc(self.value() as u16);
                format!("{a}{b}")
            }
            Some(MetricClass::IcmpTypecode) => {
                let value = self.value();
                format!("{}:{}", (value >> 8) & 0xFF, value & 0xFF)
            }
            _ => self.value().to_string(),
        }
    }
}

impl Display for TagKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.class() {
            Some(class) => write!(f, "{class}:{}", self.render_value()),
            None => write!(f, "class-{}:{}", self.class_raw(), self.value()),
        }
    }
}

/// Pack a two-letter code ("US", "EU", ...) into 16 bits. Codes shorter
/// than two bytes pack as "??".
#[must_use]
#[allow(clippy::cast_lossless)]
pub const fn pack_cc(code: &[u8]) -> u16 {
    if code.len() < 2 {
        ((b'?' as u16) << 8) | b'?' as u16
    } else {
        ((code[0] as u16) << 8) | code[1] as u16
    }
}

/// Inverse of [`pack_cc`].
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn unpack_cc(packed: u16) -> (char, char) {
    ((packed >> 8) as u8 as char, (packed & 0xFF) as u8 as char)
}

/// Pack an ICMP type and code into a tag value.
#[must_use]
#[allow(clippy::cast_lossless)]
pub const fn icmp_value(icmp_type: u16, icmp_code: u16) -> u32 {
    (((icmp_type & 0xFF) as u32) << 8) | (icmp_code & 0xFF) as u32
}
