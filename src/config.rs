//! Operator configuration read from the environment

use std::time::Duration;

use crate::crd::{SourceObjectRef, UpdateStrategy};
use crate::{Error, Result};

/// Default metrics port
pub const DEFAULT_METRICS_PORT: u16 = 8080;

const UPDATE_STRATEGY_VAR: &str = "OBJECT_CLONER_UPDATE_STRATEGY";
const ALLOWED_KINDS_VAR: &str = "OBJECT_CLONER_ALLOWED_OBJECT_KINDS";
const RETRIES_VAR: &str = "OBJECT_CLONER_CONFLICT_RETRIES";
const RETRY_DELAY_VAR: &str = "OBJECT_CLONER_CONFLICT_RETRY_DELAY_SECS";
const METRICS_PORT_VAR: &str = "METRICS_PORT";

/// Bounded retry for writes that fail on optimistic concurrency
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of write attempts
    pub attempts: u32,
    /// Fixed delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_secs(2),
        }
    }
}

/// Settings consumed by the sync engine and status recorder
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncSettings {
    /// Strategy for resources that do not set one
    pub default_update_strategy: UpdateStrategy,
    /// Conflict retry policy
    pub retry: RetryPolicy,
}

/// One entry of the allow-list of watchable source kinds.
/// `None` components match anything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KindSelector {
    pub group: Option<String>,
    pub version: Option<String>,
    pub kind: Option<String>,
}

impl KindSelector {
    /// Parse `group,version,kind`; `*` matches any value, an empty group is the core group
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(Error::ConfigError(format!(
                "kind selector '{}' must have the form group,version,kind",
                raw
            )));
        }
        let component = |value: &str| (value != "*").then(|| value.to_string());
        if parts[1].is_empty() || parts[2].is_empty() {
            return Err(Error::ConfigError(format!(
                "kind selector '{}' needs a version and a kind",
                raw
            )));
        }
        Ok(Self {
            group: component(parts[0]),
            version: component(parts[1]),
            kind: component(parts[2]),
        })
    }

    pub fn matches(&self, source: &SourceObjectRef) -> bool {
        self.group.as_ref().map_or(true, |g| *g == source.group)
            && self.version.as_ref().map_or(true, |v| *v == source.version)
            && self
                .kind
                .as_ref()
                .map_or(true, |k| k.eq_ignore_ascii_case(&source.kind))
    }
}

/// Operator configuration
#[derive(Clone, Debug, Default)]
pub struct OperatorConfig {
    /// Sync engine settings
    pub sync: SyncSettings,
    /// Allow-listed source kinds; empty means every kind
    pub allowed_kinds: Vec<KindSelector>,
    /// Metrics/health server port
    pub metrics_port: u16,
}

impl OperatorConfig {
    /// Read the configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default_update_strategy = match lookup(UPDATE_STRATEGY_VAR) {
            Some(value) if !value.trim().is_empty() => value.trim().parse()?,
            _ => UpdateStrategy::Auto,
        };

        let mut retry = RetryPolicy::default();
        if let Some(value) = lookup(RETRIES_VAR) {
            retry.attempts = parse_number(RETRIES_VAR, &value)?;
            if retry.attempts == 0 {
                return Err(Error::ConfigError(format!("{} must be >= 1", RETRIES_VAR)));
            }
        }
        if let Some(value) = lookup(RETRY_DELAY_VAR) {
            retry.delay = Duration::from_secs(parse_number(RETRY_DELAY_VAR, &value)?);
        }

        let allowed_kinds = match lookup(ALLOWED_KINDS_VAR) {
            Some(value) => value
                .split_whitespace()
                .map(KindSelector::parse)
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let metrics_port = match lookup(METRICS_PORT_VAR) {
            Some(value) => parse_number(METRICS_PORT_VAR, &value)?,
            None => DEFAULT_METRICS_PORT,
        };

        Ok(Self {
            sync: SyncSettings {
                default_update_strategy,
                retry,
            },
            allowed_kinds,
            metrics_port,
        })
    }

    /// Whether source objects of this kind may be watched
    pub fn is_kind_allowed(&self, source: &SourceObjectRef) -> bool {
        self.allowed_kinds.is_empty() || self.allowed_kinds.iter().any(|s| s.matches(source))
    }
}

fn parse_number<T: std::str::FromStr>(var: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::ConfigError(format!("{} has invalid value '{}'", var, value)))
}
