// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use arrayvec::ArrayVec;
use tags::TagKey;

/// Most tags a single observation can expand to. The expansion is one
/// combined tag, one protocol tag, up to two port tags, nine geo tags,
/// one origin-ASN tag, three couplets, and the filter criteria; excess
/// filter bits are dropped at this cap.
pub const MAX_TAGS: usize = 32;

/// An encoded message as it travels through a tracker inbox.
pub type Frame = Vec<u8>;

/// Bounded per-IP tag list.
pub type TagList = ArrayVec<TagEntry, MAX_TAGS>;

/// Wire message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    /// A batch of per-IP updates.
    Update = 1,
    /// A processor finished an interval.
    IntervalEnd = 2,
    /// A processor is shutting down; final message on its FIFO.
    Halt = 3,
    /// Discard all in-flight interval state.
    Reset = 4,
}

impl MsgType {
    #[must_use]
    pub const fn from_repr(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(MsgType::Update),
            2 => Some(MsgType::IntervalEnd),
            3 => Some(MsgType::Halt),
            4 => Some(MsgType::Reset),
            _ => None,
        }
    }
}

/// Which end of the flow an update describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Role {
    Src = 1,
    Dst = 2,
}

impl Role {
    #[must_use]
    pub const fn from_repr(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Role::Src),
            2 => Some(Role::Dst),
            _ => None,
        }
    }
}

/// Fixed-size message header.
///
/// `timestamp` is meaningful for [`MsgType::IntervalEnd`] only. `seqno`
/// is monotonic per (processor, tracker) pair and lets the receiver
/// detect lost frames on a lossy transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub msg_type: MsgType,
    pub sender: u8,
    pub timestamp: u32,
    pub body_count: u32,
    pub seqno: u32,
    pub tag_count: u32,
}

/// One tag's contribution within a per-IP update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagEntry {
    pub key: TagKey,
    pub bytes: u64,
    pub packets: u32,
}

/// A per-IP update: header fields followed by the expanded tag list.
///
/// Byte and packet contributions ride the `Src` role only; `Dst`
/// updates carry zeros and exist to feed unique-destination counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpUpdate {
    pub ip: u32,
    pub src_asn: u32,
    pub role: Role,
    pub bytes: u32,
    pub packets: u32,
    pub tags: TagList,
}
