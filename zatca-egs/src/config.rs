//! Configuration and environment selection.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Environment variable selecting the [`EnvironmentType`].
pub const ENV_VAR: &str = "ZATCA_ENV";
/// Environment variable overriding the API base URL.
pub const BASE_URL_VAR: &str = "ZATCA_BASE_URL";
/// Value of the `Accept-Version` header.
pub const DEFAULT_API_VERSION: &str = "V2";

/// Fatoora gateway a device talks to.
///
/// Selects the base URL and the certificate template name written into the
/// CSR. `NonProduction` is the developer-portal sandbox.
///
/// # Examples
/// ```rust
/// use zatca_egs::config::EnvironmentType;
///
/// let env: EnvironmentType = "sandbox".parse()?;
/// assert_eq!(env, EnvironmentType::NonProduction);
/// assert_eq!(env.to_string(), "non_production");
/// # Ok::<(), zatca_egs::config::EnvironmentParseError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvironmentType {
    NonProduction,
    Simulation,
    Production,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvironmentParseError {
    #[error("unknown environment {input:?}; expected non_production, simulation or production")]
    Invalid { input: String },
}

impl FromStr for EnvironmentType {
    type Err = EnvironmentParseError;
    fn from_str(env: &str) -> Result<EnvironmentType, EnvironmentParseError> {
        match env.trim().to_ascii_lowercase().as_str() {
            "non_production" | "sandbox" | "development" => Ok(EnvironmentType::NonProduction),
            "simulation" => Ok(EnvironmentType::Simulation),
            "production" => Ok(EnvironmentType::Production),
            _ => Err(EnvironmentParseError::Invalid {
                input: env.to_string(),
            }),
        }
    }
}

impl fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EnvironmentType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::NonProduction => "non_production",
            EnvironmentType::Simulation => "simulation",
            EnvironmentType::Production => "production",
        }
    }

    /// Gateway base URL, with a trailing slash.
    pub const fn gateway_url(&self) -> &'static str {
        match self {
            EnvironmentType::NonProduction => {
                "https://gw-fatoora.zatca.gov.sa/e-invoicing/developer-portal/"
            }
            EnvironmentType::Simulation => {
                "https://gw-fatoora.zatca.gov.sa/e-invoicing/simulation/"
            }
            EnvironmentType::Production => "https://gw-fatoora.zatca.gov.sa/e-invoicing/core/",
        }
    }

    /// Certificate template name embedded in the CSR.
    pub const fn certificate_template_name(&self) -> &'static str {
        match self {
            EnvironmentType::NonProduction => "TSTZATCA-Code-Signing",
            EnvironmentType::Simulation => "PREZATCA-Code-Signing",
            EnvironmentType::Production => "ZATCA-Code-Signing",
        }
    }
}

/// Gateway settings for a [`ZatcaClient`](crate::api::ZatcaClient).
///
/// # Examples
/// ```rust
/// use zatca_egs::config::{Config, EnvironmentType};
///
/// let config = Config::new(EnvironmentType::Simulation);
/// assert_eq!(
///     config.base_url(),
///     "https://gw-fatoora.zatca.gov.sa/e-invoicing/simulation/"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    env: EnvironmentType,
    api_version: String,
    base_url_override: Option<String>,
}

impl Config {
    pub fn new(env: EnvironmentType) -> Self {
        Self {
            env,
            api_version: DEFAULT_API_VERSION.to_string(),
            base_url_override: None,
        }
    }

    /// Read [`ENV_VAR`] and [`BASE_URL_VAR`] from the process environment.
    ///
    /// A missing [`ENV_VAR`] selects [`EnvironmentType::NonProduction`].
    pub fn from_env() -> Result<Self, EnvironmentParseError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, EnvironmentParseError> {
        let env = match lookup(ENV_VAR) {
            Some(value) => value.parse()?,
            None => EnvironmentType::NonProduction,
        };
        let mut config = Config::new(env);
        if let Some(url) = lookup(BASE_URL_VAR).filter(|url| !url.trim().is_empty()) {
            config = config.with_base_url(url);
        }
        Ok(config)
    }

    /// Point the client at another host, e.g. a local mock of the gateway.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut url = base_url.into();
        if !url.ends_with('/') {
            url.push('/');
        }
        self.base_url_override = Some(url);
        self
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn env(&self) -> EnvironmentType {
        self.env
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Base URL with a trailing slash.
    pub fn base_url(&self) -> &str {
        self.base_url_override
            .as_deref()
            .unwrap_or_else(|| self.env.gateway_url())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(EnvironmentType::NonProduction)
    }
}
