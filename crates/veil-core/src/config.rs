//! Engine configuration
//!
//! Loaded from JSON; every field has a default so an empty object is a
//! valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::hntrie::MatcherKind;
use crate::types::RequestType;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Time-to-live of a cached request verdict, in seconds.
    #[serde(default = "default_shelf_life")]
    pub cache_shelf_life_secs: u64,

    /// Use the reversed-needle trie matcher instead of the scalar walk.
    #[serde(default = "default_true")]
    pub accelerated_trie: bool,

    /// Lower bound of a high-generic selector chunk.
    #[serde(default = "default_min_generic_chunk")]
    pub min_generic_chunk: usize,

    /// High generics are split into roughly this many chunks.
    #[serde(default = "default_generic_chunk_divisor")]
    pub generic_chunk_divisor: usize,

    /// Request types whose verdicts are cached per page.
    #[serde(default = "default_collapsible_types")]
    pub collapsible_types: Vec<String>,

    /// Disposed page contexts kept for reuse.
    #[serde(default = "default_page_pool_max")]
    pub page_pool_max: usize,
}

fn default_shelf_life() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_min_generic_chunk() -> usize {
    8
}

fn default_generic_chunk_divisor() -> usize {
    8
}

fn default_collapsible_types() -> Vec<String> {
    vec!["image".into(), "sub_frame".into(), "object".into()]
}

fn default_page_pool_max() -> usize {
    10
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_shelf_life_secs: default_shelf_life(),
            accelerated_trie: default_true(),
            min_generic_chunk: default_min_generic_chunk(),
            generic_chunk_divisor: default_generic_chunk_divisor(),
            collapsible_types: default_collapsible_types(),
            page_pool_max: default_page_pool_max(),
        }
    }
}

impl EngineConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(text: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn matcher_kind(&self) -> MatcherKind {
        if self.accelerated_trie {
            MatcherKind::Accelerated
        } else {
            MatcherKind::Scalar
        }
    }

    /// Union of the configured collapsible request types.
    pub fn collapsible_mask(&self) -> RequestType {
        self.collapsible_types
            .iter()
            .fold(RequestType::empty(), |mask, name| mask | RequestType::from_str(name))
    }

    pub fn shelf_life(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_shelf_life_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_gives_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config.cache_shelf_life_secs, 60);
        assert!(config.accelerated_trie);
        assert_eq!(config.min_generic_chunk, 8);
        assert_eq!(config.page_pool_max, 10);
        assert_eq!(
            config.collapsible_mask(),
            RequestType::IMAGE | RequestType::SUBDOCUMENT | RequestType::OBJECT
        );
    }

    #[test]
    fn test_partial_override() {
        let config = EngineConfig::from_json(r#"{"cache_shelf_life_secs": 5, "accelerated_trie": false}"#).unwrap();
        assert_eq!(config.shelf_life().as_secs(), 5);
        assert_eq!(config.matcher_kind(), MatcherKind::Scalar);
        assert_eq!(config.generic_chunk_divisor, 8);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(EngineConfig::from_json("{not json").is_err());
    }
}
