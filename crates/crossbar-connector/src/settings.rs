//! Connector settings supplied by the embedding service.
//!
//! The connector is a library, so there is no env/CLI layering here: the
//! owning service hands over a plain [`Settings`] value, typically
//! deserialized from its own configuration file.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crossbar_bus::NameOwnerFlags;

/// Which bus the connector attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// The per-user session bus.
    Session,
    /// The system-wide bus.
    System,
}

/// Output format for structured telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable formatter.
    Text,
    /// Line-delimited JSON formatter.
    Json,
}

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings document is not valid JSON for this shape.
    #[error("malformed settings document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Connector configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    /// Bus to attach to.
    pub bus: BusKind,
    /// `tracing` filter expression for telemetry.
    pub log_filter: String,
    /// Telemetry output format.
    pub log_format: LogFormat,
    /// Allow another peer to take the service name over.
    pub allow_replacement: bool,
    /// Take the service name over from its current owner if permitted.
    pub replace_existing: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bus: BusKind::Session,
            log_filter: "info".to_owned(),
            log_format: LogFormat::Text,
            allow_replacement: false,
            replace_existing: false,
        }
    }
}

impl Settings {
    /// Loads settings from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Malformed`] when the document does not parse.
    pub fn from_json(input: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Name-ownership flags derived from the replacement settings.
    #[must_use]
    pub fn owner_flags(&self) -> NameOwnerFlags {
        let mut flags = NameOwnerFlags::empty();
        if self.allow_replacement {
            flags |= NameOwnerFlags::ALLOW_REPLACEMENT;
        }
        if self.replace_existing {
            flags |= NameOwnerFlags::REPLACE_EXISTING;
        }
        flags
    }

    /// The configured telemetry filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }
}
