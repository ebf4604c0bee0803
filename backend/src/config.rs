use rocket::figment::providers::{Env, Format, Toml};
use rocket::figment::Figment;
use serde::Deserialize;

use crate::identity::TokenError;

const MIN_SECRET_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Mysql,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<rocket::figment::Error>),
    #[error("store_backend = \"mysql\" requires database_url (DATABASE_URL)")]
    MissingDatabaseUrl,
    #[error("token_secret (TOKEN_SECRET) must be at least 16 bytes")]
    WeakTokenSecret,
    #[error(transparent)]
    Token(#[from] TokenError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_store_backend", alias = "STORE_BACKEND")]
    pub store_backend: StoreBackend,
    #[serde(default, alias = "DATABASE_URL")]
    pub database_url: Option<String>,
    #[serde(default, alias = "TOKEN_SECRET")]
    pub token_secret: String,
    /// Session used by requests that do not name one.
    #[serde(default = "default_session_id", alias = "DEFAULT_SESSION_ID")]
    pub default_session_id: String,
    /// Comma separated candidate names for the seeded default session.
    #[serde(default, alias = "CANDIDATES")]
    pub candidates: Option<String>,
    #[serde(default = "default_seed_voting_hours", alias = "SEED_VOTING_HOURS")]
    pub seed_voting_hours: i64,
    #[serde(default = "default_max_connections", alias = "MAX_CONNECTIONS")]
    pub max_connections: usize,
    #[serde(default = "default_log_filter", alias = "LOG_FILTER")]
    pub log_filter: String,
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Memory
}

fn default_session_id() -> String {
    "general-election-2024".to_string()
}

fn default_seed_voting_hours() -> i64 {
    168
}

fn default_max_connections() -> usize {
    64
}

fn default_log_filter() -> String {
    "voting_backend=info,rocket=warn".to_string()
}

impl AppConfig {
    /// A memory-backed configuration with the given secret.
    pub fn memory(token_secret: impl Into<String>) -> Self {
        Self {
            store_backend: StoreBackend::Memory,
            database_url: None,
            token_secret: token_secret.into(),
            default_session_id: default_session_id(),
            candidates: None,
            seed_voting_hours: default_seed_voting_hours(),
            max_connections: default_max_connections(),
            log_filter: default_log_filter(),
        }
    }

    pub fn figment() -> Figment {
        Figment::new()
            .merge(Toml::file("Config.toml"))
            .merge(Toml::file("../Config.toml"))
            .merge(Env::raw().only(&[
                "STORE_BACKEND",
                "DATABASE_URL",
                "TOKEN_SECRET",
                "DEFAULT_SESSION_ID",
                "CANDIDATES",
                "SEED_VOTING_HOURS",
                "MAX_CONNECTIONS",
                "LOG_FILTER",
            ]))
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_backend == StoreBackend::Mysql
            && self.database_url.as_deref().map_or(true, |url| url.trim().is_empty())
        {
            return Err(ConfigError::MissingDatabaseUrl);
        }
        if self.token_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::WeakTokenSecret);
        }
        Ok(())
    }

    /// Candidate names from `candidates`, trimmed, empties dropped.
    pub fn seed_candidates(&self) -> Vec<String> {
        self.candidates
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect()
    }
}
