use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Load(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Pool source configuration error: {0}")]
    Config(String),
    #[error("Failed to read pool file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to fetch pool from '{url}': {source}")]
    HttpFetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to parse pool data: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum LockStoreError {
    #[error("Lock store I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode lock state: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation backend request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Generation backend returned {status}: {message}")]
    Backend { status: u16, message: String },
    #[error("Generation backend is not configured")]
    NotConfigured,
    #[error("Invalid generation backend URL '{0}'")]
    InvalidUrl(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Question pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("Lock store error: {0}")]
    LockStore(#[from] LockStoreError),
    #[error("Generation client error: {0}")]
    Generation(#[from] GenerationError),
    #[error("Web server/handler error: {0}")]
    Web(#[from] crate::web::WebError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Configuration parsing error: {0}")]
    ConfigParsing(#[from] config::ConfigError),
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
