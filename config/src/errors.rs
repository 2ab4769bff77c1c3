// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Type for configuration / validation failures
//! Any result returned by the validation or finalization methods in this
//! crate is a `ConfigError`.

use std::path::PathBuf;
use thiserror::Error;

/// The reasons why we may reject a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Tracker count out of range [1, 32]: {0}")]
    BadTrackerCount(u16),
    #[error("Processor count out of range [1, 64]: {0}")]
    BadProcessorCount(u16),
    #[error("Interval length must be at least 1 second")]
    BadInterval,
    #[error("Prefix bits out of range [1, 32]: {0}")]
    BadPrefixBits(u8),
    #[error("Bad port range '{0}'")]
    BadPortRange(String),
    #[error("Batch size must be nonzero")]
    BadBatchSize,
    #[error("Inbox high-water mark must be nonzero")]
    BadHighWaterMark,
    #[error("Failed to read '{path:?}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml_ng::Error),
    #[error("Bad whitelist entry at line {line}: '{text}'")]
    BadWhitelistEntry { line: usize, text: String },
}

/// Result-like type for configurations
pub type ConfigResult<T = ()> = Result<T, ConfigError>;

#[must_use]
pub fn stringify(conf_result: &ConfigResult) -> String {
    match conf_result {
        Ok(()) => "Ok".to_string(),
        Err(e) => format!("FAILED: {e}"),
    }
}
