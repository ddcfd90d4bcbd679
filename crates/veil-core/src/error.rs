//! Error types for Veil core.
//!
//! Query paths never fail; these cover loading configuration, rule sets
//! and suffix lists.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config '{path}': {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("invalid dynamic rule on line {line}: {reason}")]
    InvalidDynamicRule { line: usize, reason: &'static str },

    #[error("invalid public suffix list: {0}")]
    PublicSuffix(String),
}
