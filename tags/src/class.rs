// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, FromRepr};

/// A geolocation provider whose lookups may annotate an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum GeoProvider {
    Maxmind,
    Netacq,
    Ipinfo,
}

impl GeoProvider {
    pub const COUNT: usize = 3;

    /// Stable index of this provider in per-observation geo arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            GeoProvider::Maxmind => 0,
            GeoProvider::Netacq => 1,
            GeoProvider::Ipinfo => 2,
        }
    }

    #[must_use]
    pub const fn from_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(GeoProvider::Maxmind),
            1 => Some(GeoProvider::Netacq),
            2 => Some(GeoProvider::Ipinfo),
            _ => None,
        }
    }

    #[must_use]
    pub const fn continent_class(self) -> MetricClass {
        match self {
            GeoProvider::Maxmind => MetricClass::MaxmindContinent,
            GeoProvider::Netacq => MetricClass::NetacqContinent,
            GeoProvider::Ipinfo => MetricClass::IpinfoContinent,
        }
    }

    #[must_use]
    pub const fn country_class(self) -> MetricClass {
        match self {
            GeoProvider::Maxmind => MetricClass::MaxmindCountry,
            GeoProvider::Netacq => MetricClass::NetacqCountry,
            GeoProvider::Ipinfo => MetricClass::IpinfoCountry,
        }
    }

    #[must_use]
    pub const fn region_class(self) -> MetricClass {
        match self {
            GeoProvider::Maxmind => MetricClass::MaxmindRegion,
            GeoProvider::Netacq => MetricClass::NetacqRegion,
            GeoProvider::Ipinfo => MetricClass::IpinfoRegion,
        }
    }

    #[must_use]
    pub const fn couplet_class(self) -> MetricClass {
        match self {
            GeoProvider::Maxmind => MetricClass::MaxmindCountryAsn,
            GeoProvider::Netacq => MetricClass::NetacqCountryAsn,
            GeoProvider::Ipinfo => MetricClass::IpinfoCountryAsn,
        }
    }
}

/// The dimensions a tally can be aggregated over.
///
/// Discriminants are wire-stable: they are packed into [`super::TagKey`]s
/// and into the inter-thread message framing, so variants must never be
/// renumbered.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    FromRepr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum MetricClass {
    /// The implicit all-traffic tag prepended to every observation.
    Combined = 0,
    IpProtocol = 1,
    TcpSrcPort = 2,
    TcpDstPort = 3,
    UdpSrcPort = 4,
    UdpDstPort = 5,
    IcmpTypecode = 6,
    MaxmindContinent = 7,
    MaxmindCountry = 8,
    MaxmindRegion = 9,
    NetacqContinent = 10,
    NetacqCountry = 11,
    NetacqRegion = 12,
    IpinfoContinent = 13,
    IpinfoCountry = 14,
    IpinfoRegion = 15,
    PfxAsn = 16,
    MaxmindCountryAsn = 17,
    NetacqCountryAsn = 18,
    IpinfoCountryAsn = 19,
    FilterCriteria = 20,
}

impl MetricClass {
    pub const COUNT: usize = 21;

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// True for the continent/country/region classes of any provider.
    #[must_use]
    pub const fn is_geo(self) -> bool {
        matches!(
            self,
            MetricClass::MaxmindContinent
                | MetricClass::MaxmindCountry
                | MetricClass::MaxmindRegion
                | MetricClass::NetacqContinent
                | MetricClass::NetacqCountry
                | MetricClass::NetacqRegion
                | MetricClass::IpinfoContinent
                | MetricClass::IpinfoCountry
                | MetricClass::IpinfoRegion
        )
    }

    /// True for the region classes, which are suppressed in lite geo mode.
    #[must_use]
    pub const fn is_region(self) -> bool {
        matches!(
            self,
            MetricClass::MaxmindRegion | MetricClass::NetacqRegion | MetricClass::IpinfoRegion
        )
    }

    /// True for the country-ASN couplet classes.
    #[must_use]
    pub const fn is_couplet(self) -> bool {
        matches!(
            self,
            MetricClass::MaxmindCountryAsn
                | MetricClass::NetacqCountryAsn
                | MetricClass::IpinfoCountryAsn
        )
    }

    /// The provider behind a geo or couplet class, if any.
    #[must_use]
    pub const fn provider(self) -> Option<GeoProvider> {
        match self {
            MetricClass::MaxmindContinent
            | MetricClass::MaxmindCountry
            | MetricClass::MaxmindRegion
            | MetricClass::MaxmindCountryAsn => Some(GeoProvider::Maxmind),
            MetricClass::NetacqContinent
            | MetricClass::NetacqCountry
            | MetricClass::NetacqRegion
            | MetricClass::NetacqCountryAsn => Some(GeoProvider::Netacq),
            MetricClass::IpinfoContinent
            | MetricClass::IpinfoCountry
            | MetricClass::IpinfoRegion
            | MetricClass::IpinfoCountryAsn => Some(GeoProvider::Ipinfo),
            _ => None,
        }
    }
}

/// Bitmask of metric classes allowed to produce tallies.
///
/// Bit `n` corresponds to the class with discriminant `n`. The zero mask
/// is special-cased to mean "all classes allowed" so that an absent
/// configuration entry enables everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassMask(pub u32);

impl ClassMask {
    /// The permissive mask.
    pub const ALL: ClassMask = ClassMask(0);

    #[must_use]
    pub fn from_classes(classes: impl IntoIterator<Item = MetricClass>) -> Self {
        let mut mask = 0u32;
        for class in classes {
            mask |= 1 << class.as_u8();
        }
        ClassMask(mask)
    }

    #[must_use]
    pub const fn allows(self, class: MetricClass) -> bool {
        self.0 == 0 || self.0 & (1 << class.as_u8()) != 0
    }

    #[must_use]
    pub const fn is_all(self) -> bool {
        self.0 == 0
    }
}

#[cfg(test)]
#[allow(clippy::cast_possible_truncation)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn discriminants_are_dense_and_stable() {
        for (idx, class) in MetricClass::iter().enumerate() {
            assert_eq!(usize::from(class.as_u8()), idx);
            assert_eq!(MetricClass::from_repr(class.as_u8()), Some(class));
        }
        assert_eq!(MetricClass::iter().count(), MetricClass::COUNT);
        assert_eq!(MetricClass::from_repr(MetricClass::COUNT as u8), None);
    }

    #[test]
    fn class_names_round_trip() {
        for class in MetricClass::iter() {
            let name = class.to_string();
            assert_eq!(name.parse::<MetricClass>(), Ok(class), "name {name}");
        }
        assert_eq!(MetricClass::TcpDstPort.to_string(), "tcp-dst-port");
        assert_eq!(MetricClass::PfxAsn.to_string(), "pfx-asn");
    }

    #[test]
    fn zero_mask_allows_everything() {
        for class in MetricClass::iter() {
            assert!(ClassMask::ALL.allows(class));
        }
    }

    #[test]
    fn mask_restricts_to_listed_classes() {
        let mask = ClassMask::from_classes([MetricClass::Combined, MetricClass::TcpDstPort]);
        assert!(mask.allows(MetricClass::Combined));
        assert!(mask.allows(MetricClass::TcpDstPort));
        assert!(!mask.allows(MetricClass::UdpSrcPort));
        assert!(!mask.allows(MetricClass::PfxAsn));
    }

    #[test]
    fn provider_classes_line_up() {
        for provider in GeoProvider::iter() {
            assert_eq!(provider.continent_class().provider(), Some(provider));
            assert_eq!(provider.country_class().provider(), Some(provider));
            assert_eq!(provider.region_class().provider(), Some(provider));
            assert_eq!(provider.couplet_class().provider(), Some(provider));
            assert!(provider.couplet_class().is_couplet());
            assert!(provider.region_class().is_region());
        }
    }
}
