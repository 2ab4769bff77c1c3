// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Processor-to-tracker transport: message framing, the packed
//! single-process wire codec, and bounded per-tracker inboxes with
//! sequence-number loss detection.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::redundant_closure_for_method_calls)]

mod codec;
mod inbox;
mod message;

pub use codec::{DecodeError, FrameReader, UpdateIter, encode_control, encode_update};
pub use inbox::{SEQ_GAPS_METRIC, SeqTracker, TrackerInbox, TrackerSender, tracker_channel};
pub use message::{Frame, IpUpdate, MAX_TAGS, MsgHeader, MsgType, Role, TagEntry, TagList};
