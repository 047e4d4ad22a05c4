use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use plancheck_core::PolicyProfile;
use plancheck_relay::DEFAULT_BASE_URL;
use serde::Deserialize;
use url::Url;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_SECRETS_PATH: &str = "secrets.toml";
const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 6;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: String,
    pub upstream_base_url: String,
    pub connect_timeout: Duration,
    pub profile: PolicyProfile,
    /// Raw token from the secrets store, validated when the app is built.
    pub credential: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    upstream: UpstreamSection,
    profile: Option<PolicyProfile>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    bind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UpstreamSection {
    base_url: Option<String>,
    connect_timeout_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SecretsFile {
    #[serde(rename = "REPLICATE_API_TOKEN")]
    replicate_api_token: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            upstream_base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECONDS),
            profile: PolicyProfile::default(),
            credential: None,
        }
    }
}

impl AppConfig {
    /// Optional TOML file from `PLANCHECK_CONFIG`, then environment
    /// overrides. `REPLICATE_API_TOKEN` wins over the secrets file.
    pub fn from_env() -> Result<Self> {
        let mut config = match env::var("PLANCHECK_CONFIG") {
            Ok(path) => Self::from_toml_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };

        if let Ok(bind) = env::var("PLANCHECK_BIND") {
            config.bind = bind;
        }
        if let Ok(raw) = env::var("PLANCHECK_UPSTREAM_URL") {
            config.upstream_base_url = checked_url(&raw)
                .with_context(|| format!("PLANCHECK_UPSTREAM_URL is not a valid url: {raw}"))?;
        }

        let secrets_path = env::var("PLANCHECK_SECRETS")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                let default_path = PathBuf::from(DEFAULT_SECRETS_PATH);
                default_path.exists().then_some(default_path)
            });
        if let Some(path) = secrets_path {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed reading secrets from {}", path.display()))?;
            config.credential = parse_secrets(&raw)
                .with_context(|| format!("invalid secrets file {}", path.display()))?;
        }

        if let Some(token) = env::var("REPLICATE_API_TOKEN")
            .ok()
            .filter(|value| !value.trim().is_empty())
        {
            config.credential = Some(token);
        }

        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading config from {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: FileConfig = toml::from_str(raw)?;
        let mut config = Self::default();

        if let Some(bind) = file.server.bind {
            config.bind = bind;
        }
        if let Some(base_url) = file.upstream.base_url {
            config.upstream_base_url = checked_url(&base_url)
                .with_context(|| format!("upstream.base_url is not a valid url: {base_url}"))?;
        }
        if let Some(seconds) = file.upstream.connect_timeout_seconds {
            config.connect_timeout = Duration::from_secs(seconds);
        }
        if let Some(profile) = file.profile {
            config.profile = profile;
        }

        Ok(config)
    }
}

pub fn parse_secrets(raw: &str) -> Result<Option<String>> {
    let secrets: SecretsFile = toml::from_str(raw)?;
    Ok(secrets
        .replicate_api_token
        .filter(|value| !value.trim().is_empty()))
}

fn checked_url(raw: &str) -> Result<String> {
    let url = Url::parse(raw.trim())?;
    Ok(url.to_string())
}
