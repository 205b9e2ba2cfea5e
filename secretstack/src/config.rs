//! Configuration management

use serde::Deserialize;
use std::path::Path;

use secretstack_core::{AccountRegionKey, DEFAULT_ACCOUNT_ID, DEFAULT_REGION};

/// Main configuration structure
#[derive(Debug, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub secretsmanager: SecretsManagerConfig,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Send `Access-Control-*` response headers
    #[serde(default = "default_true")]
    pub cors: bool,

    /// Reject requests whose `Origin` or `Referer` is not allowed
    #[serde(default = "default_true")]
    pub cors_checks: bool,

    /// Origins allowed on top of the localhost defaults; `*` allows all
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,

    #[serde(default)]
    pub cors_allowed_headers: Vec<String>,

    #[serde(default)]
    pub cors_expose_headers: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            cors: default_true(),
            cors_checks: default_true(),
            cors_allowed_origins: Vec::new(),
            cors_allowed_headers: Vec::new(),
            cors_expose_headers: Vec::new(),
        }
    }
}

/// Scope applied to requests that carry no usable credential scope
#[derive(Debug, Deserialize, PartialEq)]
pub struct SecretsManagerConfig {
    #[serde(default = "default_region")]
    pub default_region: String,

    #[serde(default = "default_account_id")]
    pub account_id: String,
}

impl Default for SecretsManagerConfig {
    fn default() -> Self {
        Self {
            default_region: default_region(),
            account_id: default_account_id(),
        }
    }
}

impl SecretsManagerConfig {
    pub fn default_scope(&self) -> AccountRegionKey {
        AccountRegionKey::new(&self.account_id, &self.default_region)
    }
}

fn default_port() -> u16 {
    4566
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_account_id() -> String {
    DEFAULT_ACCOUNT_ID.to_string()
}

/// Values given on the command line. `None` leaves the loaded value alone.
#[derive(Debug, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub default_region: Option<String>,
    pub account_id: Option<String>,
    pub cors_allowed_origins: Vec<String>,
    pub no_cors: bool,
    pub no_cors_checks: bool,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// Without an explicit path, `secretstack.{toml,yaml,json}` in the working
    /// directory is read when present. Environment variables use the
    /// `SECRETSTACK__SECTION__KEY` form; the CORS lists take comma separated
    /// values.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("secretstack").required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("SECRETSTACK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_allowed_origins")
                    .with_list_parse_key("server.cors_allowed_headers")
                    .with_list_parse_key("server.cors_expose_headers"),
            )
            .build()?;

        Ok(config.try_deserialize::<Config>()?)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(host) = overrides.host {
            self.server.host = host;
        }
        if let Some(region) = overrides.default_region {
            self.secretsmanager.default_region = region;
        }
        if let Some(account_id) = overrides.account_id {
            self.secretsmanager.account_id = account_id;
        }
        for origin in overrides.cors_allowed_origins {
            if !self.server.cors_allowed_origins.contains(&origin) {
                self.server.cors_allowed_origins.push(origin);
            }
        }
        if overrides.no_cors {
            self.server.cors = false;
        }
        if overrides.no_cors_checks {
            self.server.cors_checks = false;
        }
    }
}
