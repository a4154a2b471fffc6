//! Access policy
//!
//! The registry asks an [`AccessPolicy`] before granting any claim. Authoring
//! policy is left to the host; this module provides the trait, a permissive
//! default, and a table that can be loaded from a TOML file:
//!
//! ```toml
//! [policy]
//! default = "deny"
//!
//! [[bus]]
//! label = "spi0"
//! exclusive = true
//! chip_selects = ["cs0", "cs1"]
//!
//! [[bus]]
//! label = "spi1"
//! peripheral = true
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::registry::ClaimMode;

/// Decides whether a bus/chip select combination may be claimed
pub trait AccessPolicy: Send + Sync {
    /// Returns true if `mode` may be claimed on `bus` (and `cs` for controllers)
    fn permits(&self, bus: &str, cs: Option<&str>, mode: ClaimMode) -> bool;
}

/// Policy that permits everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn permits(&self, _bus: &str, _cs: Option<&str>, _mode: ClaimMode) -> bool {
        true
    }
}

/// Errors loading a policy file
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Failed to read the file
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path of the policy file
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the schema
    #[error("failed to parse policy: {0}")]
    Parse(#[from] toml::de::Error),

    /// A bus label appears more than once
    #[error("duplicate bus label: {0}")]
    DuplicateBus(String),
}

/// Permissions for one bus
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusRule {
    /// Whole-bus ownership may be granted
    pub exclusive: bool,
    /// Peripheral mode may be granted
    pub peripheral: bool,
    /// Chip select labels controllers may claim
    pub chip_selects: Vec<String>,
}

/// Policy backed by a per-bus rule table
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    default_allow: bool,
    buses: HashMap<String, BusRule>,
}

#[derive(Debug, Deserialize)]
struct TomlPolicyFile {
    policy: Option<TomlPolicyMeta>,
    #[serde(default)]
    bus: Vec<TomlBus>,
}

#[derive(Debug, Deserialize)]
struct TomlPolicyMeta {
    default: Option<TomlDefault>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TomlDefault {
    Allow,
    Deny,
}

#[derive(Debug, Deserialize)]
struct TomlBus {
    label: String,
    #[serde(default)]
    exclusive: bool,
    #[serde(default)]
    peripheral: bool,
    #[serde(default)]
    chip_selects: Vec<String>,
}

impl PolicyTable {
    /// Create an empty table that denies (or allows) unlisted buses
    pub fn new(default_allow: bool) -> Self {
        Self {
            default_allow,
            buses: HashMap::new(),
        }
    }

    /// Add or replace the rule for a bus
    pub fn with_bus(mut self, label: impl Into<String>, rule: BusRule) -> Self {
        self.buses.insert(label.into(), rule);
        self
    }

    /// Look up the rule for a bus
    pub fn rule(&self, bus: &str) -> Option<&BusRule> {
        self.buses.get(bus)
    }

    /// Parse a policy from a TOML string
    pub fn from_toml_str(s: &str) -> Result<Self, PolicyError> {
        let file: TomlPolicyFile = toml::from_str(s)?;
        let default_allow = matches!(
            file.policy.and_then(|p| p.default),
            Some(TomlDefault::Allow)
        );

        let mut table = Self::new(default_allow);
        for bus in file.bus {
            if table.buses.contains_key(&bus.label) {
                return Err(PolicyError::DuplicateBus(bus.label));
            }
            table.buses.insert(
                bus.label,
                BusRule {
                    exclusive: bus.exclusive,
                    peripheral: bus.peripheral,
                    chip_selects: bus.chip_selects,
                },
            );
        }
        Ok(table)
    }

    /// Load a policy from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, PolicyError> {
        let content = fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}

impl AccessPolicy for PolicyTable {
    fn permits(&self, bus: &str, cs: Option<&str>, mode: ClaimMode) -> bool {
        let Some(rule) = self.buses.get(bus) else {
            return self.default_allow;
        };
        match mode {
            ClaimMode::ExclusiveBus => rule.exclusive,
            ClaimMode::Peripheral => rule.peripheral,
            ClaimMode::ExclusiveCs => {
                cs.is_some_and(|cs| rule.chip_selects.iter().any(|allowed| allowed == cs))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"
[policy]
default = "deny"

[[bus]]
label = "spi0"
exclusive = true
chip_selects = ["cs0", "cs1"]

[[bus]]
label = "spi1"
peripheral = true
"#;

    #[test]
    fn test_parse_toml() {
        let table = PolicyTable::from_toml_str(POLICY).unwrap();
        let rule = table.rule("spi0").unwrap();
        assert!(rule.exclusive);
        assert!(!rule.peripheral);
        assert_eq!(rule.chip_selects, ["cs0", "cs1"]);
        assert!(table.rule("spi1").unwrap().peripheral);
        assert!(table.rule("spi2").is_none());
    }

    #[test]
    fn test_permits() {
        let table = PolicyTable::from_toml_str(POLICY).unwrap();
        assert!(table.permits("spi0", None, ClaimMode::ExclusiveBus));
        assert!(table.permits("spi0", Some("cs1"), ClaimMode::ExclusiveCs));
        assert!(!table.permits("spi0", Some("cs7"), ClaimMode::ExclusiveCs));
        assert!(!table.permits("spi0", None, ClaimMode::ExclusiveCs));
        assert!(!table.permits("spi0", None, ClaimMode::Peripheral));
        assert!(table.permits("spi1", None, ClaimMode::Peripheral));
        assert!(!table.permits("spi1", None, ClaimMode::ExclusiveBus));
        // Unlisted buses follow the default
        assert!(!table.permits("spi9", None, ClaimMode::ExclusiveBus));
    }

    #[test]
    fn test_default_allow() {
        let table = PolicyTable::from_toml_str("[policy]\ndefault = \"allow\"\n").unwrap();
        assert!(table.permits("anything", Some("cs0"), ClaimMode::ExclusiveCs));

        let table = PolicyTable::from_toml_str("").unwrap();
        assert!(!table.permits("anything", None, ClaimMode::ExclusiveBus));
    }

    #[test]
    fn test_duplicate_bus() {
        let toml = "[[bus]]\nlabel = \"spi0\"\n[[bus]]\nlabel = \"spi0\"\n";
        assert!(matches!(
            PolicyTable::from_toml_str(toml),
            Err(PolicyError::DuplicateBus(label)) if label == "spi0"
        ));
    }

    #[test]
    fn test_invalid_default() {
        let toml = "[policy]\ndefault = \"maybe\"\n";
        assert!(matches!(
            PolicyTable::from_toml_str(toml),
            Err(PolicyError::Parse(_))
        ));
    }

    #[test]
    fn test_allow_all() {
        assert!(AllowAll.permits("spi0", None, ClaimMode::Peripheral));
    }
}
