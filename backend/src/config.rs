//! Runtime configuration.
//!
//! Values come from the environment (a `.env` file is honoured) and can be
//! overridden per value from the command line.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::loader::{DEFAULT_DATA_DIR, DEFAULT_MATRIX_CSV};
use crate::registry::{DEFAULT_HISTORY_LIMIT, DEFAULT_RULES_DIR};

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 4000;

/// Default upload size cap (6 MB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 6 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// `PORT`
    pub port: u16,
    /// `RULES_DIR`: registry root holding `versions/` and `meta.json`
    pub rules_dir: PathBuf,
    /// `MATRIX_CSV`: bootstrap CSV when no version is active
    pub matrix_csv: PathBuf,
    /// `DATA_DIR`: scanned for any `*.csv` as a last resort
    pub data_dir: PathBuf,
    /// `CORS_ORIGIN`: `*` allows any origin
    pub cors_origin: String,
    /// `MAX_UPLOAD_BYTES`
    pub max_upload_bytes: usize,
    /// `HISTORY_LIMIT`: upload records kept in `meta.json`
    pub history_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            rules_dir: PathBuf::from(DEFAULT_RULES_DIR),
            matrix_csv: PathBuf::from(DEFAULT_MATRIX_CSV),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            cors_origin: "*".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Try loading .env file
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read configuration through `lookup`; unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Ok(Self {
            port: parse_var("PORT", lookup("PORT"))?.unwrap_or(defaults.port),
            rules_dir: lookup("RULES_DIR").map(PathBuf::from).unwrap_or(defaults.rules_dir),
            matrix_csv: lookup("MATRIX_CSV").map(PathBuf::from).unwrap_or(defaults.matrix_csv),
            data_dir: lookup("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            cors_origin: lookup("CORS_ORIGIN").unwrap_or(defaults.cors_origin),
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", lookup("MAX_UPLOAD_BYTES"))?
                .unwrap_or(defaults.max_upload_bytes),
            history_limit: parse_var("HISTORY_LIMIT", lookup("HISTORY_LIMIT"))?
                .unwrap_or(defaults.history_limit),
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { name, value: v })
        })
        .transpose()
}
