// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The telescope report core: a parallel aggregation engine over
//! pre-tagged packet observations.
//!
//! Observations enter on N processor workers, which expand upstream
//! annotations into per-packet tag lists and shard per-IP updates to M
//! tracker workers by address octet. Each tracker owns the tallies for
//! its shard of the IP space for the current interval; when every
//! processor has signalled the end of an interval, the tracker parks the
//! finalized tallies in a mutex-guarded slot. A single merger polls the
//! slots and folds the per-tracker tallies into one result set per
//! interval.
//!
//! Trackers share nothing with each other; unique-IP counts sum across
//! trackers without de-duplication because each address hashes to
//! exactly one tracker per direction. Unique-ASN counts do not enjoy
//! that partitioning and are approximate across trackers.

#![deny(
    unsafe_code,
    clippy::all,
    clippy::pedantic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod engine;
pub mod merger;
pub mod observation;
pub mod processor;
pub mod rows;
pub mod tracker;

pub use engine::{ControlHandle, Engine, EngineError, EngineHandle, WallClock};
pub use merger::Merger;
pub use observation::{GeoAnnotation, PacketObservation, PROTO_ICMP, PROTO_TCP, PROTO_UDP};
pub use processor::{ControlEvent, Processor, TagExpander};
pub use rows::{IntervalResult, ResultRow, ResultSink, SharedVecSink};
pub use tracker::{CompletedInterval, ResultSlot, Tracker};
