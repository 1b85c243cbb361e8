//! Configuration and environment selection.
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};
use thiserror::Error;

use crate::certificate::DEFAULT_EXPIRY_WARNING_DAYS;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SERVICE_NAMESPACE: &str = "http://tempuri.org/";

/// DGI environment selection for the certification service.
/// This determines which endpoint the transport client uses and the `iAmb` code
/// written into generated documents.
/// - Sandbox: the authority's test environment ("ambiente de pruebas").
/// - Production: the live environment; documents submitted here have fiscal effect.
/// # Examples
/// ```rust
/// use std::str::FromStr;
/// use fel_core::config::EnvironmentType;
///
/// let env = EnvironmentType::from_str("sandbox")?;
/// assert_eq!(env, EnvironmentType::Sandbox);
/// assert_eq!(env.ambient_code(), 2);
/// # Ok::<(), fel_core::config::EnvironmentParseError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvironmentType {
    Sandbox,
    Production,
}

/// Error returned when parsing an [`EnvironmentType`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvironmentParseError {
    #[error("invalid environment type: {input}")]
    Invalid { input: String },
}

impl FromStr for EnvironmentType {
    type Err = EnvironmentParseError;
    fn from_str(env: &str) -> Result<EnvironmentType, EnvironmentParseError> {
        match env.trim().to_ascii_lowercase().as_str() {
            "sandbox" | "test" | "pruebas" => Ok(EnvironmentType::Sandbox),
            "production" | "produccion" => Ok(EnvironmentType::Production),
            _ => Err(EnvironmentParseError::Invalid {
                input: env.to_string(),
            }),
        }
    }
}

impl EnvironmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::Sandbox => "sandbox",
            EnvironmentType::Production => "production",
        }
    }

    pub fn endpoint_url(&self) -> &'static str {
        match self {
            EnvironmentType::Sandbox => "https://dgi-fep-test.mef.gob.pa/ws/obj/v1.00/",
            EnvironmentType::Production => "https://dgi-fep.mef.gob.pa/ws/obj/v1.00/",
        }
    }

    /// Value of the `iAmb` element: 1 for production, 2 for the test environment.
    pub fn ambient_code(&self) -> u8 {
        match self {
            EnvironmentType::Production => 1,
            EnvironmentType::Sandbox => 2,
        }
    }
}

/// Errors produced while reading configuration from the process environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Environment(#[from] EnvironmentParseError),
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Configuration for the transport client and the certification pipeline.
///
/// # Examples
/// ```rust
/// use std::time::Duration;
/// use fel_core::config::{Config, EnvironmentType};
///
/// let config = Config::new(EnvironmentType::Sandbox).with_timeout(Duration::from_secs(10));
/// assert_eq!(config.request_timeout(), Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    env: EnvironmentType,
    base_url: Option<String>,
    request_timeout: Duration,
    service_namespace: String,
    expiry_warning_days: i64,
}

impl Config {
    pub fn new(env: EnvironmentType) -> Self {
        Self {
            env,
            base_url: None,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            service_namespace: DEFAULT_SERVICE_NAMESPACE.to_string(),
            expiry_warning_days: DEFAULT_EXPIRY_WARNING_DAYS,
        }
    }

    /// Build a configuration from `FEL_*` variables, falling back to defaults
    /// for anything unset.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = match lookup("FEL_ENVIRONMENT") {
            Some(value) => EnvironmentType::from_str(&value)?,
            None => EnvironmentType::Sandbox,
        };
        let mut config = Config::new(env);

        if let Some(url) = lookup("FEL_AUTHORITY_BASE_URL") {
            config = config.with_base_url(url);
        }
        if let Some(value) = lookup("FEL_REQUEST_TIMEOUT_SECS") {
            let secs = value
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidValue {
                    name: "FEL_REQUEST_TIMEOUT_SECS",
                    value: value.clone(),
                })?;
            config = config.with_timeout(Duration::from_secs(secs));
        }
        if let Some(value) = lookup("FEL_EXPIRY_WARNING_DAYS") {
            let days = value
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|days| *days >= 0)
                .ok_or(ConfigError::InvalidValue {
                    name: "FEL_EXPIRY_WARNING_DAYS",
                    value: value.clone(),
                })?;
            config = config.with_expiry_warning_days(days);
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.base_url = Some(if url.ends_with('/') {
            url
        } else {
            format!("{url}/")
        });
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_service_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.service_namespace = namespace.into();
        self
    }

    pub fn with_expiry_warning_days(mut self, days: i64) -> Self {
        self.expiry_warning_days = days;
        self
    }

    pub fn env(&self) -> EnvironmentType {
        self.env
    }

    /// Endpoint the transport client posts to: the override when present,
    /// otherwise the environment's published URL.
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.env.endpoint_url())
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn service_namespace(&self) -> &str {
        &self.service_namespace
    }

    pub fn expiry_warning_days(&self) -> i64 {
        self.expiry_warning_days
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(EnvironmentType::Sandbox)
    }
}
