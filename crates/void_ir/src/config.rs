//! Configuration for the IR system

use crate::batch::OptimizerOptions;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Configuration for [`crate::IrSystem`]
///
/// Every field has a default, so partial JSON documents are accepted:
///
/// ```
/// use void_ir::IrConfig;
///
/// let config = IrConfig::from_json(r#"{ "max_snapshots": 4 }"#).unwrap();
/// assert_eq!(config.max_snapshots, 4);
/// assert!(config.validate_on_submit);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrConfig {
    /// Snapshots retained across all namespaces
    pub max_snapshots: usize,
    /// Capture a rollback snapshot before applying each transaction
    pub snapshot_before_apply: bool,
    /// Validate permissions, schemas and limits on submit
    pub validate_on_submit: bool,
    /// Maximum patches per transaction
    pub max_patches_per_transaction: usize,
    /// Run the batch optimizer on submit
    pub optimize_on_submit: bool,
    /// Rewrites used when `optimize_on_submit` is set
    pub optimizer: OptimizerOptions,
    /// Check submitted transactions against in-flight ones
    pub detect_conflicts: bool,
    /// Refuse a submission that conflicts instead of only warning
    pub reject_conflicting: bool,
    /// Publish committed patches on both buses
    pub publish_committed: bool,
    /// Finished transactions remembered for dependency checks and queries
    pub history_len: usize,
}

impl Default for IrConfig {
    fn default() -> Self {
        Self {
            max_snapshots: 16,
            snapshot_before_apply: true,
            validate_on_submit: true,
            max_patches_per_transaction: 10_000,
            optimize_on_submit: false,
            optimizer: OptimizerOptions::default(),
            detect_conflicts: true,
            reject_conflicting: false,
            publish_committed: true,
            history_len: 1024,
        }
    }
}

impl IrConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document() {
        let config = IrConfig::from_json(
            r#"{ "reject_conflicting": true, "optimizer": { "sort_for_efficiency": false } }"#,
        )
        .unwrap();
        assert!(config.reject_conflicting);
        assert!(!config.optimizer.sort_for_efficiency);
        assert!(config.optimizer.merge_consecutive);
        assert_eq!(config.history_len, IrConfig::default().history_len);
    }

    #[test]
    fn test_json_round_trip() {
        let config = IrConfig {
            max_snapshots: 3,
            optimize_on_submit: true,
            ..Default::default()
        };
        let json = config.to_json().unwrap();
        assert_eq!(IrConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_document() {
        assert!(matches!(
            IrConfig::from_json("{ \"max_snapshots\": \"many\" }"),
            Err(ConfigError::Json(_))
        ));
    }
}
