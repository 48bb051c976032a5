//! Pipeline configuration.
//!
//! Values come from, in increasing precedence: built-in defaults, an optional
//! TOML file, an optional env file, the process environment, and finally CLI
//! flags (applied by the binary). Environment lookups go through a closure so
//! callers and tests can supply their own source.

use crate::endpoint::QueryParams;
use crate::fetch::DEFAULT_BASE_URL;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Database variables that must all be present.
pub const DB_VARS: [&str; 5] = ["DB_HOST", "DB_USER", "DB_PASSWORD", "DB_NAME", "DB_PORT"];

pub const ENV_DATA_DIR: &str = "BTC_APP_BASE_DIR";
pub const ENV_ARCHIVE_DIR: &str = "BTC_APP_ARCHIVE_DIR";
pub const ENV_MODEL_DIR: &str = "BTC_APP_MODEL_DIR";
pub const ENV_FILE: &str = "BTC_APP_ENV_FILE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingVars(Vec<String>),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },

    #[error("read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("load env file {path}: {message}")]
    EnvFile { path: PathBuf, message: String },
}

/// How the two tables are joined into the training frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Full,
}

impl std::str::FromStr for JoinKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inner" => Ok(Self::Inner),
            "left" => Ok(Self::Left),
            "full" | "outer" => Ok(Self::Full),
            other => Err(ConfigError::Invalid {
                name: "join".into(),
                reason: format!("'{other}' is not one of inner, left, full"),
            }),
        }
    }
}

/// What the candidate models are trained to output.
///
/// `Regression` fits mean-squared-error regressors on the 0/1 label and
/// thresholds their output at 0.5. `Classification` fits probabilistic
/// classifiers scored by log-loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Objective {
    #[default]
    Regression,
    Classification,
}

impl std::str::FromStr for Objective {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "regression" => Ok(Self::Regression),
            "classification" => Ok(Self::Classification),
            other => Err(ConfigError::Invalid {
                name: "objective".into(),
                reason: format!("'{other}' is not one of regression, classification"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub symbol: String,
    pub interval: String,
    pub limit: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let params = QueryParams::default();
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            symbol: params.symbol,
            interval: params.interval,
            limit: params.limit,
        }
    }
}

impl ApiConfig {
    pub fn query_params(&self) -> QueryParams {
        QueryParams {
            symbol: self.symbol.clone(),
            interval: self.interval.clone(),
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub kline_table: String,
    pub daily_table: String,
    pub join: JoinKind,
    pub objective: Objective,
    pub seed: u64,
    pub test_fraction: f64,
    pub folds: usize,
    pub forest_trees: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            kline_table: "klines".to_string(),
            daily_table: "daily".to_string(),
            join: JoinKind::Inner,
            objective: Objective::Regression,
            seed: 42,
            test_fraction: 0.2,
            folds: 3,
            forest_trees: 100,
        }
    }
}

/// Everything except database credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Raw JSON snapshots and staged CSV files.
    pub data_dir: PathBuf,
    /// Holds the `interim/` and `failed/` archive areas.
    pub archive_dir: PathBuf,
    /// Persisted models, scaler and predictions.
    pub model_dir: PathBuf,
    /// Directory holding the SQLite database file.
    pub db_dir: PathBuf,
    pub api: ApiConfig,
    pub training: TrainingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/1_raw"),
            archive_dir: PathBuf::from("data"),
            model_dir: PathBuf::from("models_ml"),
            db_dir: PathBuf::from("data/db"),
            api: ApiConfig::default(),
            training: TrainingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML string. Missing keys take their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Override directories from environment variables when set.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_ARCHIVE_DIR) {
            self.archive_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_MODEL_DIR) {
            self.model_dir = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.training;
        if !(t.test_fraction > 0.0 && t.test_fraction < 1.0) {
            return Err(ConfigError::Invalid {
                name: "training.test_fraction".into(),
                reason: format!("{} is outside (0, 1)", t.test_fraction),
            });
        }
        if t.folds < 2 {
            return Err(ConfigError::Invalid {
                name: "training.folds".into(),
                reason: "at least 2 folds are needed".into(),
            });
        }
        if t.forest_trees == 0 {
            return Err(ConfigError::Invalid {
                name: "training.forest_trees".into(),
                reason: "a forest needs at least one tree".into(),
            });
        }
        if self.api.limit == 0 {
            return Err(ConfigError::Invalid {
                name: "api.limit".into(),
                reason: "page size must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn interim_dir(&self) -> PathBuf {
        self.archive_dir.join("interim")
    }

    pub fn failed_dir(&self) -> PathBuf {
        self.archive_dir.join("failed")
    }
}

/// Database connection settings.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub name: String,
    pub port: u16,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &"***")
            .field("name", &self.name)
            .field("port", &self.port)
            .finish()
    }
}

impl DatabaseConfig {
    /// Read the `DB_*` variables. Every missing variable is reported, not
    /// just the first one.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut values: HashMap<&str, String> = HashMap::new();
        let mut missing = Vec::new();
        for var in DB_VARS {
            match lookup(var).filter(|v| !v.trim().is_empty()) {
                Some(v) => {
                    values.insert(var, v);
                }
                None => missing.push(var.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(ConfigError::MissingVars(missing));
        }

        let mut take = |k: &str| values.remove(k).unwrap_or_default();
        let port_raw = take("DB_PORT");
        let port = port_raw.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
            name: "DB_PORT".into(),
            reason: format!("'{port_raw}': {e}"),
        })?;

        Ok(Self {
            host: take("DB_HOST"),
            user: take("DB_USER"),
            password: take("DB_PASSWORD"),
            name: take("DB_NAME"),
            port,
        })
    }

    /// Read from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Connection banner with the password left out.
    pub fn display_target(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.name)
    }

    /// Database file inside `db_dir`.
    pub fn sqlite_path(&self, db_dir: &Path) -> PathBuf {
        db_dir.join(format!("{}.db", self.name))
    }
}

/// Load `KEY=VALUE` pairs from an env file into the process environment.
/// Variables that are already set win over the file.
pub fn load_env_file(path: &Path) -> Result<(), ConfigError> {
    dotenvy::from_path(path).map_err(|e| ConfigError::EnvFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    tracing::debug!(path = %path.display(), "env file loaded");
    Ok(())
}
