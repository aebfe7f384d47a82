use crate::s3::{Credentials, EndpointConfig};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// S3 profile: credentials plus endpoint settings
#[derive(Clone, Deserialize)]
pub struct Profile {
    /// AWS access key ID
    pub access_key: String,

    /// AWS secret access key
    pub secret_key: String,

    /// AWS region (default: us-east-1)
    #[serde(default = "default_region")]
    pub region: String,

    /// Service host (default: s3.amazonaws.com)
    #[serde(default = "default_host")]
    pub host: String,

    /// Use https (default: true)
    #[serde(default = "default_true")]
    pub secure: bool,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Retry failed exchanges on the 1,2,4,8,16,32s schedule
    #[serde(default = "default_true")]
    pub retry: bool,

    /// Always use path-style addressing
    #[serde(default)]
    pub path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_host() -> String {
    crate::s3::addressing::DEFAULT_HOST.to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    300
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("host", &self.host)
            .field("secure", &self.secure)
            .field("request_timeout", &self.request_timeout)
            .field("retry", &self.retry)
            .field("path_style", &self.path_style)
            .finish()
    }
}

impl Profile {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: default_region(),
            host: default_host(),
            secure: true,
            request_timeout: default_request_timeout(),
            retry: true,
            path_style: false,
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.access_key.clone(),
            self.secret_key.clone(),
            Some(self.region.clone()),
        )
    }

    pub fn endpoint(&self) -> EndpointConfig {
        EndpointConfig::new(self.host.clone())
            .with_secure(self.secure)
            .with_timeout(Duration::from_secs(self.request_timeout))
            .with_retry(self.retry)
            .with_path_style(self.path_style)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Named profiles for different S3 configurations
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,

    /// Profile used when none is named
    #[serde(default)]
    pub default_profile: Option<String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a profile by name, or the default profile if not specified
    pub fn get_profile(&self, name: Option<&str>) -> Option<&Profile> {
        if let Some(name) = name {
            self.profiles.get(name)
        } else if let Some(default) = &self.default_profile {
            self.profiles.get(default)
        } else {
            self.profiles.values().next()
        }
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    Ok(config)
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
}

/// Load configuration from environment variables
///
/// - AWS_ACCESS_KEY_ID / S3_KEY
/// - AWS_SECRET_ACCESS_KEY / S3_SECRET
/// - AWS_REGION (optional, defaults to us-east-1)
/// - S3_HOST (optional, defaults to s3.amazonaws.com)
/// - S3_SECURE, S3_RETRY, S3_PATH_STYLE (optional booleans)
/// - S3_TIMEOUT (optional, seconds)
pub fn load_from_env() -> Result<Config> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let access_key = std::env::var("AWS_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("S3_KEY"))
        .context("Neither AWS_ACCESS_KEY_ID nor S3_KEY environment variable is set")?;

    let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("S3_SECRET"))
        .context("Neither AWS_SECRET_ACCESS_KEY nor S3_SECRET environment variable is set")?;

    let mut profile = Profile::new(access_key, secret_key);

    if let Ok(region) = std::env::var("AWS_REGION") {
        if !region.is_empty() {
            profile.region = region;
        }
    }
    if let Ok(host) = std::env::var("S3_HOST") {
        if !host.is_empty() {
            profile.host = host;
        }
    }
    if let Some(secure) = env_flag("S3_SECURE") {
        profile.secure = secure;
    }
    if let Some(retry) = env_flag("S3_RETRY") {
        profile.retry = retry;
    }
    if let Some(path_style) = env_flag("S3_PATH_STYLE") {
        profile.path_style = path_style;
    }
    if let Ok(timeout) = std::env::var("S3_TIMEOUT") {
        profile.request_timeout = timeout
            .trim()
            .parse()
            .context(format!("Invalid S3_TIMEOUT value: {:?}", timeout))?;
    }

    let mut config = Config::new();
    config.profiles.insert("default".to_string(), profile);
    config.default_profile = Some("default".to_string());

    Ok(config)
}

/// Load configuration from a YAML file when given, else from the environment.
pub fn load_config(config_path: Option<&str>, profile_name: Option<&str>) -> Result<Config> {
    if let Some(path) = config_path {
        let mut config = load_from_yaml(path)?;

        // If a specific profile is requested, make it the default
        if let Some(name) = profile_name {
            if !config.profiles.contains_key(name) {
                anyhow::bail!("Profile '{}' not found in config file", name);
            }
            config.default_profile = Some(name.to_string());
        }

        Ok(config)
    } else {
        load_from_env()
    }
}
