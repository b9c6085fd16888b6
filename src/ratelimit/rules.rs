//! Rate limit rules and their configuration format.
//!
//! A rule names an independent limit, its sliding window and how requests
//! are partitioned. Rules are validated when they are built so a bad value
//! fails at startup rather than on the request path.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{RatewardenError, Result};

/// How requests are grouped into partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyStrategy {
    /// By network origin address
    Origin,
    /// By authenticated principal; unauthenticated requests are refused
    Principal,
    /// By principal when authenticated, otherwise by origin
    PrincipalOrOrigin,
}

impl std::str::FromStr for KeyStrategy {
    type Err = RatewardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "origin" => Ok(KeyStrategy::Origin),
            "principal" => Ok(KeyStrategy::Principal),
            "principalOrOrigin" => Ok(KeyStrategy::PrincipalOrOrigin),
            other => Err(RatewardenError::Config(format!(
                "unknown key strategy '{}'",
                other
            ))),
        }
    }
}

/// Serialized form of a rule.
///
/// The lowercase aliases accept documents that went through the `config`
/// crate, which folds keys to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    /// Unique name, used as the key prefix
    pub name: String,
    /// Window length in milliseconds
    #[serde(alias = "windowms")]
    pub window_ms: u64,
    /// Maximum admitted events per window
    pub max: u32,
    /// Partitioning strategy
    #[serde(alias = "keyby")]
    pub key_by: KeyStrategy,
}

/// A validated, immutable rate limit rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    name: String,
    window: Duration,
    max: u32,
    key_by: KeyStrategy,
}

impl Rule {
    /// Build a rule, rejecting an empty name, zero window or zero max.
    pub fn new(name: impl Into<String>, window: Duration, max: u32, key_by: KeyStrategy) -> Result<Self> {
        let name = name.into();

        if name.trim().is_empty() {
            return Err(RatewardenError::Config("rule name must not be empty".into()));
        }
        if window.is_zero() {
            return Err(RatewardenError::Config(format!(
                "rule '{}': window must be positive",
                name
            )));
        }
        if max == 0 {
            return Err(RatewardenError::Config(format!(
                "rule '{}': max must be positive",
                name
            )));
        }

        Ok(Self {
            name,
            window,
            max,
            key_by,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn key_by(&self) -> KeyStrategy {
        self.key_by
    }
}

impl TryFrom<RuleConfig> for Rule {
    type Error = RatewardenError;

    fn try_from(config: RuleConfig) -> Result<Self> {
        Rule::new(
            config.name,
            Duration::from_millis(config.window_ms),
            config.max,
            config.key_by,
        )
    }
}

impl From<&Rule> for RuleConfig {
    fn from(rule: &Rule) -> Self {
        RuleConfig {
            name: rule.name.clone(),
            window_ms: rule.window.as_millis() as u64,
            max: rule.max,
            key_by: rule.key_by,
        }
    }
}

/// A standalone rules document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RulesDocument {
    #[serde(default)]
    rules: Vec<RuleConfig>,
}

/// An ordered collection of validated rules with unique names.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Validate a list of rule configurations.
    pub fn from_configs(configs: Vec<RuleConfig>) -> Result<Self> {
        let mut rules: Vec<Rule> = Vec::with_capacity(configs.len());

        for config in configs {
            let rule = Rule::try_from(config)?;
            if rules.iter().any(|r| r.name == rule.name) {
                return Err(RatewardenError::Config(format!(
                    "duplicate rule name '{}'",
                    rule.name
                )));
            }
            rules.push(rule);
        }

        Ok(Self { rules })
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string with a top-level `rules` list.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let document: RulesDocument = serde_yaml::from_str(yaml)
            .map_err(|e| RatewardenError::Config(format!("Failed to parse rules: {}", e)))?;
        Self::from_configs(document.rules)
    }

    /// Look up a rule by name.
    pub fn get(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
