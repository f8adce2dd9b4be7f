use crate::domain::models::Credentials;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::remote_client::{RemoteConfig, DEFAULT_BASE_URL};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

const APP_JSON: &str = "app.json";
pub const USER_ENV_FILE: &str = "user.env";

const USERNAME_KEYS: [&str; 2] = ["WORKLOG_REMOTE_USER", "SCOROUSER"];
const PASSWORD_KEYS: [&str; 2] = ["WORKLOG_REMOTE_PASSWORD", "SCOROPASSWORD"];
const DEFAULT_TICK_SECONDS: u64 = 3600;
const MIN_TICK_SECONDS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub schema: u8,
    #[serde(default)]
    pub remote: RemoteSettings,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub invalidation: InvalidationSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteSettings {
    pub base_url: String,
    pub company_account_id: String,
    pub lang: String,
    pub device_name: String,
    pub device_id: String,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        let defaults = RemoteConfig::default();
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            company_account_id: defaults.company_account_id,
            lang: defaults.lang,
            device_name: defaults.device_name,
            device_id: defaults.device_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvalidationSettings {
    pub tick_seconds: u64,
}

impl Default for InvalidationSettings {
    fn default() -> Self {
        Self {
            tick_seconds: DEFAULT_TICK_SECONDS,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema: 1,
            remote: RemoteSettings::default(),
            timezone: None,
            invalidation: InvalidationSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn remote_config(&self) -> Result<RemoteConfig, InfraError> {
        let remote = &self.remote;
        let config = RemoteConfig {
            company_account_id: non_empty_or(&remote.company_account_id, "company account id")?,
            lang: non_empty_or(&remote.lang, "lang")?,
            device_name: non_empty_or(&remote.device_name, "device name")?,
            device_id: non_empty_or(&remote.device_id, "device id")?,
            ..RemoteConfig::default()
        };
        config.with_base_url(&remote.base_url)
    }

    /// Configured IANA timezone; `None` means the host's local offset is used.
    pub fn timezone(&self) -> Result<Option<Tz>, InfraError> {
        self.timezone
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| {
                value.parse::<Tz>().map_err(|error| {
                    InfraError::InvalidConfig(format!("unknown timezone '{value}': {error}"))
                })
            })
            .transpose()
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(self.invalidation.tick_seconds.max(MIN_TICK_SECONDS))
    }
}

fn non_empty_or(value: &str, field: &str) -> Result<String, InfraError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(InfraError::InvalidConfig(format!(
            "remote {field} must not be empty"
        )));
    }
    Ok(trimmed.to_string())
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&AppConfig::default())?;
        fs::write(&path, format!("{formatted}\n"))?;
        debug!(path = %path.display(), "wrote default config");
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    let path = config_dir.join(APP_JSON);
    let value = read_config(&path)?;
    serde_json::from_value(value).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid {}: {error}", path.display()))
    })
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

/// Credentials from the environment. Both the username and the password must be present.
pub fn load_credentials_from_lookup<F>(lookup: F) -> Option<Credentials>
where
    F: Fn(&str) -> Option<String>,
{
    let username = optional_lookup_value(&lookup, &USERNAME_KEYS)?;
    let password = optional_lookup_value(&lookup, &PASSWORD_KEYS)?;
    Some(Credentials::new(username, password))
}

/// Reads `KEY=value` pairs from an optional dotenv file. A missing file yields no pairs.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>, InfraError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let iter = dotenvy::from_path_iter(path).map_err(|error| {
        InfraError::InvalidConfig(format!("cannot read {}: {error}", path.display()))
    })?;
    let mut values = HashMap::new();
    for item in iter {
        match item {
            Ok((key, value)) => {
                values.insert(key, value);
            }
            Err(error) => {
                warn!(path = %path.display(), error = %error, "skipping malformed env line");
            }
        }
    }
    Ok(values)
}

/// Process environment first, then the workspace `user.env` file.
pub fn environment_lookup(
    env_file: &Path,
) -> Result<impl Fn(&str) -> Option<String> + Send + Sync + use<>, InfraError> {
    let file_values = read_env_file(env_file)?;
    Ok(move |key: &str| {
        std::env::var(key)
            .ok()
            .or_else(|| file_values.get(key).cloned())
    })
}
