// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Configuration models for the telescope report engine. The external
//! model is the model assumed by the YAML file handed to the process.
//! For an external configuration, the process builds an internal,
//! validated configuration, which is the immutable configuration the
//! engine runs with. Validation failures reject the configuration at
//! startup; the engine never starts on a bad one.

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

pub mod errors;
pub mod external;
pub mod internal;
pub mod portmap;
pub mod whitelist;

pub use errors::{ConfigError, ConfigResult, stringify}; // re-export
pub use external::{ExternalConfig, GeoMode, IpCountingMethod, IpCountingSpec, PortRange}; // re-export
pub use internal::{IpCounting, PortMaps, ReportConfig}; // re-export
pub use portmap::PortBitmap; // re-export
pub use whitelist::GeoAsnWhitelist; // re-export
