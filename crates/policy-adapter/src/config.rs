// Adapter configuration sourced from environment variables, with an optional
// YAML override file.
use crate::codec::RecordFormat;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1:8500";
pub const DEFAULT_PREFIX: &str = "/micro/config/";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

#[derive(Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Store address, `host` or `host:port` (port defaults to 8500).
    pub address: String,
    /// Recorded for compatibility; the policy key is never prefixed.
    pub prefix: String,
    pub strip_prefix: bool,
    pub token: Option<String>,
    pub format: RecordFormat,
    pub strict_decode: bool,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for AdapterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterConfig")
            .field("address", &self.address)
            .field("prefix", &self.prefix)
            .field("strip_prefix", &self.strip_prefix)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("format", &self.format)
            .field("strict_decode", &self.strict_decode)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            strip_prefix: false,
            token: None,
            format: RecordFormat::Untagged,
            strict_decode: false,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
struct AdapterConfigOverride {
    address: Option<String>,
    prefix: Option<String>,
    strip_prefix: Option<bool>,
    token: Option<String>,
    format: Option<RecordFormat>,
    strict_decode: Option<bool>,
    request_timeout_ms: Option<u64>,
}

impl AdapterConfigOverride {
    fn apply(self, config: &mut AdapterConfig) {
        if let Some(value) = self.address {
            config.address = value;
        }
        if let Some(value) = self.prefix {
            config.prefix = value;
        }
        if let Some(value) = self.strip_prefix {
            config.strip_prefix = value;
        }
        if let Some(value) = self.token {
            config.token = Some(value);
        }
        if let Some(value) = self.format {
            config.format = value;
        }
        if let Some(value) = self.strict_decode {
            config.strict_decode = value;
        }
        if let Some(value) = self.request_timeout_ms {
            config.request_timeout = Duration::from_millis(value);
        }
    }
}

impl AdapterConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("POLICY_KV_ADDR") {
            config.address = value;
        }
        if let Ok(value) = std::env::var("POLICY_KV_PREFIX") {
            config.prefix = value;
        }
        if let Ok(value) = std::env::var("POLICY_KV_STRIP_PREFIX") {
            config.strip_prefix = parse_bool(&value).context("parse POLICY_KV_STRIP_PREFIX")?;
        }
        if let Ok(value) = std::env::var("POLICY_KV_TOKEN")
            && !value.is_empty()
        {
            config.token = Some(value);
        }
        if let Ok(value) = std::env::var("POLICY_KV_FORMAT") {
            config.format = value
                .parse::<RecordFormat>()
                .map_err(anyhow::Error::msg)
                .context("parse POLICY_KV_FORMAT")?;
        }
        if let Ok(value) = std::env::var("POLICY_KV_STRICT_DECODE") {
            config.strict_decode =
                parse_bool(&value).context("parse POLICY_KV_STRICT_DECODE")?;
        }
        if let Ok(value) = std::env::var("POLICY_KV_TIMEOUT_MS") {
            let millis: u64 = value.parse().context("parse POLICY_KV_TIMEOUT_MS")?;
            config.request_timeout = Duration::from_millis(millis);
        }
        Ok(config)
    }

    /// Environment first, then the YAML file at `config_path` (or
    /// `POLICY_KV_CONFIG`) overrides individual fields.
    pub fn from_env_or_yaml(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::from_env()?;
        let override_path = config_path
            .map(|value| value.to_string())
            .or_else(|| std::env::var("POLICY_KV_CONFIG").ok());
        if let Some(path) = override_path {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read adapter config: {path}"))?;
            let override_cfg: AdapterConfigOverride =
                serde_yaml::from_str(&contents).context("parse adapter config yaml")?;
            override_cfg.apply(&mut config);
        }
        Ok(config)
    }

    /// The prefix to strip from keys, empty unless `strip_prefix` is set.
    pub fn stripped_prefix(&self) -> &str {
        if self.strip_prefix { self.prefix.as_str() } else { "" }
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow::anyhow!("invalid boolean {other:?}")),
    }
}
