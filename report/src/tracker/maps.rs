// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-interval aggregation state owned by one tracker.

use crate::rows::MAX_ASSOCIATED;
use arrayvec::ArrayVec;
use ahash::RandomState;
use config::{IpCounting, IpCountingMethod, ReportConfig};
use hashbrown::hash_map::Entry;
use small_map::SmallMap;
use tags::{MetricClass, TagKey};
use tracing::debug;
use transport::{IpUpdate, Role, TagList};

pub(crate) type Map<K, V> = hashbrown::HashMap<K, V, RandomState>;
type Set<T> = hashbrown::HashSet<T, RandomState>;

/// Tallies keyed by tag, as parked for the merger.
pub type TallyMap = hashbrown::HashMap<TagKey, MetricTally, RandomState>;

/// Fixed-seed hasher state. Partitioning and replay determinism depend
/// on every run hashing identically.
pub(crate) fn hasher_state() -> &'static RandomState {
    use std::sync::OnceLock;
    static HASHER_STATE: OnceLock<RandomState> = OnceLock::new();
    HASHER_STATE.get_or_init(|| RandomState::with_seeds(0, 0, 0, 0))
}

const SRC_SEEN: u8 = 1;
const DST_SEEN: u8 = 2;

/// Inline capacity of the per-IP metric set. The long tail of addresses
/// carries only a handful of tags; the map spills to a hash table for
/// the few that exceed it.
const IP_TAGS_INLINE: usize = 16;

/// Per-interval membership record for one counted address.
#[derive(Default)]
pub(crate) struct IpEntry {
    seen: SmallMap<IP_TAGS_INLINE, TagKey, u8>,
}

impl IpEntry {
    /// Mark `(tag, role)` seen; true when this is the first sighting.
    fn mark(&mut self, key: TagKey, role_bit: u8) -> bool {
        if let Some(bits) = self.seen.get_mut(&key) {
            if *bits & role_bit != 0 {
                return false;
            }
            *bits |= role_bit;
            true
        } else {
            self.seen.insert(key, role_bit);
            true
        }
    }
}

/// The running counters for one tag within one interval.
#[derive(Debug)]
pub struct MetricTally {
    pub class: MetricClass,
    pub packets: u64,
    pub bytes: u64,
    pub unique_src_ips: u64,
    pub unique_dst_ips: u64,
    pub unique_src_asns: u64,
    src_asns: Set<u32>,
    pub associated: ArrayVec<TagKey, MAX_ASSOCIATED>,
}

impl MetricTally {
    fn new(class: MetricClass, associated: ArrayVec<TagKey, MAX_ASSOCIATED>) -> Self {
        MetricTally {
            class,
            packets: 0,
            bytes: 0,
            unique_src_ips: 0,
            unique_dst_ips: 0,
            unique_src_asns: 0,
            src_asns: Set::with_hasher(hasher_state().clone()),
            associated,
        }
    }

    fn note_src_asn(&mut self, asn: u32) {
        if self.src_asns.insert(asn) {
            self.unique_src_asns += 1;
        }
    }

    /// Fold another tracker's tally for the same tag into this one.
    ///
    /// Unique-IP counts sum exactly because addresses partition across
    /// trackers; unique-ASN counts may overlap and the sum is an upper
    /// bound.
    pub fn absorb(&mut self, other: &MetricTally) {
        self.packets += other.packets;
        self.bytes += other.bytes;
        self.unique_src_ips += other.unique_src_ips;
        self.unique_dst_ips += other.unique_dst_ips;
        self.unique_src_asns += other.unique_src_asns;
        if self.associated.is_empty() && !other.associated.is_empty() {
            self.associated = other.associated.clone();
        }
    }
}

/// Cross-references recorded the moment a tally is created. Couplet
/// tallies remember the country and origin-ASN tags that induced them.
fn associated_for(update_tags: &TagList, key: TagKey) -> ArrayVec<TagKey, MAX_ASSOCIATED> {
    let mut refs = ArrayVec::new();
    let Some(class) = key.class() else {
        return refs;
    };
    if !class.is_couplet() {
        return refs;
    }
    let country_class = class.provider().map(tags::GeoProvider::country_class);
    for tag in update_tags {
        let tag_class = tag.key.class();
        if (tag_class == country_class || tag_class == Some(MetricClass::PfxAsn))
            && refs.try_push(tag.key).is_err()
        {
            break;
        }
    }
    refs
}

/// Resolve the address an update counts under, if any.
///
/// `All` counts the address itself, `Prefixagg` collapses the address
/// onto its prefix, and `Sample` counts only the first address observed
/// in each prefix.
fn counting_key(ip: u32, counting: IpCounting, reps: &mut Map<u32, u32>) -> Option<u32> {
    match counting.method {
        IpCountingMethod::All => Some(ip),
        IpCountingMethod::Prefixagg => Some(ip & counting.mask()),
        IpCountingMethod::Sample => {
            let prefix = ip & counting.mask();
            match reps.entry(prefix) {
                Entry::Occupied(entry) => (*entry.get() == ip).then_some(ip),
                Entry::Vacant(entry) => {
                    entry.insert(ip);
                    Some(ip)
                }
            }
        }
    }
}

/// One interval's worth of state: tallies per tag, membership per
/// counted address, and the sampling representatives per direction.
/// Dropped as a whole on rotation.
pub(crate) struct IntervalMaps {
    pub(crate) tallies: TallyMap,
    ips: Map<u32, IpEntry>,
    src_reps: Map<u32, u32>,
    dst_reps: Map<u32, u32>,
}

impl IntervalMaps {
    pub(crate) fn new() -> Self {
        IntervalMaps {
            tallies: TallyMap::with_hasher(hasher_state().clone()),
            ips: Map::with_hasher(hasher_state().clone()),
            src_reps: Map::with_hasher(hasher_state().clone()),
            dst_reps: Map::with_hasher(hasher_state().clone()),
        }
    }

    /// Apply one decoded per-IP update.
    pub(crate) fn apply(&mut self, update: &IpUpdate, config: &ReportConfig) {
        let (counting, reps, role_bit) = match update.role {
            Role::Src => (config.src_counting, &mut self.src_reps, SRC_SEEN),
            Role::Dst => (config.dst_counting, &mut self.dst_reps, DST_SEEN),
        };
        let mut entry = counting_key(update.ip, counting, reps)
            .map(|key| self.ips.entry(key).or_default());

        for tag in &update.tags {
            let Some(class) = tag.key.class() else {
                debug!("dropping tag with unknown class {}", tag.key.class_raw());
                continue;
            };
            let tally = self
                .tallies
                .entry(tag.key)
                .or_insert_with(|| MetricTally::new(class, associated_for(&update.tags, tag.key)));
            match update.role {
                Role::Src => {
                    tally.packets += u64::from(tag.packets);
                    tally.bytes += tag.bytes;
                    if let Some(entry) = entry.as_deref_mut()
                        && entry.mark(tag.key, role_bit)
                    {
                        tally.unique_src_ips += 1;
                    }
                    if update.src_asn != 0 {
                        tally.note_src_asn(update.src_asn);
                    }
                }
                Role::Dst => {
                    if let Some(entry) = entry.as_deref_mut()
                        && entry.mark(tag.key, role_bit)
                    {
                        tally.unique_dst_ips += 1;
                    }
                }
            }
        }
    }
}
