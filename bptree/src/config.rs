//! Configuration for the `bptree` command-line tool.
//!
//! # Environment Variables
//!
//! - `BPT_INDEX_PATH`: Path of the index file (default: `./data/index.bpt`)
//! - `BPT_ORDER`: Order used when a fresh tree is created (default: `20`)
//! - `BPT_FORCE_EMPTY`: Reinitialize the file on open (default: `false`)
//!
//! # Invariants
//!
//! - `order` is always within `MIN_ORDER..=MAX_ORDER`

use std::path::PathBuf;

use crate::btree::{DEFAULT_INDEX_SLOTS, DEFAULT_ORDER, MAX_ORDER, MIN_ORDER, TreeOptions};

/// Tool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    /// Path of the index file.
    pub index_path: PathBuf,
    /// Order for a freshly created tree.
    pub order: u32,
    /// Whether to discard any existing tree on open.
    pub force_empty: bool,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl TreeConfig {
    /// Default index file path.
    pub const DEFAULT_INDEX_PATH: &'static str = "./data/index.bpt";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `BPT_ORDER` is set but not a number within the supported range
    /// - `BPT_FORCE_EMPTY` is set but not a recognized boolean
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let index_path = lookup("BPT_INDEX_PATH")
            .map_or_else(|| PathBuf::from(Self::DEFAULT_INDEX_PATH), PathBuf::from);
        let order = Self::parse_order(lookup("BPT_ORDER"))?;
        let force_empty = Self::parse_force_empty(lookup("BPT_FORCE_EMPTY"))?;

        Ok(Self {
            index_path,
            order,
            force_empty,
        })
    }

    /// Options for creating a fresh tree.
    #[must_use]
    pub const fn options(&self) -> TreeOptions {
        TreeOptions {
            order: self.order,
            index_slots: DEFAULT_INDEX_SLOTS,
        }
    }

    fn parse_order(value: Option<String>) -> Result<u32, ConfigError> {
        let Some(value) = value else {
            return Ok(DEFAULT_ORDER);
        };

        match value.parse::<u32>() {
            Ok(order) if (MIN_ORDER..=MAX_ORDER).contains(&order) => Ok(order),
            _ => Err(ConfigError::InvalidValue {
                name: "BPT_ORDER".to_string(),
                message: format!("'{value}' is not an order between {MIN_ORDER} and {MAX_ORDER}"),
            }),
        }
    }

    fn parse_force_empty(value: Option<String>) -> Result<bool, ConfigError> {
        let Some(value) = value else {
            return Ok(false);
        };

        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" | "" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                name: "BPT_FORCE_EMPTY".to_string(),
                message: format!("'{value}' is not a boolean"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<TreeConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        TreeConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[]).expect("defaults");
        assert_eq!(config.index_path, PathBuf::from("./data/index.bpt"));
        assert_eq!(config.order, DEFAULT_ORDER);
        assert!(!config.force_empty);
        assert_eq!(config.options(), TreeOptions::default());
    }

    #[test]
    fn test_explicit_values() {
        let config = load(&[
            ("BPT_INDEX_PATH", "/tmp/idx.bpt"),
            ("BPT_ORDER", "64"),
            ("BPT_FORCE_EMPTY", "TRUE"),
        ])
        .expect("config");

        assert_eq!(config.index_path, PathBuf::from("/tmp/idx.bpt"));
        assert_eq!(config.order, 64);
        assert!(config.force_empty);
        assert_eq!(config.options().order, 64);
    }

    #[test]
    fn test_order_out_of_range() {
        let error = load(&[("BPT_ORDER", "2")]).expect_err("order 2 is too small");
        assert!(matches!(error, ConfigError::InvalidValue { ref name, .. } if name == "BPT_ORDER"));

        assert!(load(&[("BPT_ORDER", "lots")]).is_err());
    }

    #[test]
    fn test_invalid_force_empty() {
        let error = load(&[("BPT_FORCE_EMPTY", "maybe")]).expect_err("not a boolean");
        assert_eq!(
            error.to_string(),
            "invalid value for BPT_FORCE_EMPTY: 'maybe' is not a boolean"
        );
    }
}
