use crate::error::{ConfigError, Result as AppResult};
use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(deserialize_with = "deserialize_string_or_list")]
    pub cors_origins: Vec<String>,
    /// When set, pool refreshes require `Authorization: ApiKey <key>`.
    #[serde(default)]
    pub admin_api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum PoolSourceType {
    File,
    Http,
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub source_type: PoolSourceType,
    pub file_path: Option<String>,
    pub http_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LockStoreKind {
    File,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockStoreConfig {
    pub kind: LockStoreKind,
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    /// Base URL of the document generation backend, e.g. `http://localhost:5000`.
    pub base_url: Option<String>,
    pub timeout_seconds: u64,
    pub default_template: String,
    pub default_word_template: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    pub idle_timeout_minutes: u64,
    pub channel_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub lock_store: LockStoreConfig,
    pub generation: GenerationConfig,
    pub sessions: SessionsConfig,
}

pub fn load_settings() -> AppResult<AppSettings> {
    let builder = Config::builder()
        .set_default("server.port", 8080)?
        .set_default("server.cors_origins", Vec::<String>::new())?
        .set_default("pool.source_type", "file")?
        .set_default("pool.file_path", "pool.json")?
        .set_default("lock_store.kind", "file")?
        .set_default("lock_store.directory", "locks")?
        .set_default("generation.timeout_seconds", 60)?
        .set_default("generation.default_template", "default")?
        .set_default("generation.default_word_template", "default")?
        .set_default("sessions.idle_timeout_minutes", 60)?
        .set_default("sessions.channel_buffer", 32)?
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("EXAMROLL")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_origins")
                .try_parsing(true),
        );

    let settings = builder
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let app_settings: AppSettings = settings
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    validate(&app_settings)?;
    Ok(app_settings)
}

fn validate(settings: &AppSettings) -> Result<(), ConfigError> {
    match settings.pool.source_type {
        PoolSourceType::File if settings.pool.file_path.is_none() => {
            return Err(ConfigError::Missing("pool.file_path".to_string()));
        }
        PoolSourceType::Http if settings.pool.http_url.is_none() => {
            return Err(ConfigError::Missing("pool.http_url".to_string()));
        }
        _ => {}
    }

    if settings.sessions.channel_buffer == 0 {
        return Err(ConfigError::InvalidValue(
            "sessions.channel_buffer must be greater than zero".to_string(),
        ));
    }

    if let Some(key) = settings.server.admin_api_key.as_deref()
        && key.trim().is_empty()
    {
        return Err(ConfigError::InvalidValue(
            "server.admin_api_key must not be blank when set".to_string(),
        ));
    }

    Ok(())
}

fn deserialize_string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    let value = Value::deserialize(deserializer)?;

    match value {
        Value::String(s) => Ok(s
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()),
        Value::Array(arr) => arr
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.trim().to_string()),
                _ => Err(D::Error::custom("Array must contain only strings")),
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        _ => Err(D::Error::custom("Expected string or array of strings")),
    }
}
