use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use log::{info, warn};

use crate::error::ConfigError;

const DEFAULT_POOL_MAX_SIZE: u32 = 16;
/// Largest accepted image, counted in decoded bytes.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    Local,
    Remote,
}

impl FromStr for DetectorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(DetectorKind::Local),
            "remote" | "roboflow" => Ok(DetectorKind::Remote),
            other => Err(format!("unknown side dish detector {other:?}")),
        }
    }
}

/// Hosted detection service settings.
#[derive(Debug, Clone)]
pub struct RemoteDetectorConfig {
    pub base_url: String,
    pub api_key: String,
    pub model_id: String,
    pub version: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub pool_max_size: u32,
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub main_model_path: PathBuf,
    pub side_dish_model_path: PathBuf,
    pub detector: DetectorKind,
    pub remote: Option<RemoteDetectorConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup, `from_env` uses the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let mut detector: DetectorKind = parse_or(&lookup, "SIDE_DISH_DETECTOR", DetectorKind::Remote)?;
        let remote = match lookup("ROBOFLOW_API_KEY").filter(|key| !key.trim().is_empty()) {
            Some(api_key) => Some(RemoteDetectorConfig {
                base_url: lookup("ROBOFLOW_URL")
                    .unwrap_or_else(|| "https://detect.roboflow.com".to_string()),
                api_key,
                model_id: lookup("ROBOFLOW_MODEL_ID").unwrap_or_else(|| "ingredient-2kc8g".to_string()),
                version: lookup("ROBOFLOW_MODEL_VERSION").unwrap_or_else(|| "2".to_string()),
                timeout: Duration::from_secs(parse_or(&lookup, "ROBOFLOW_TIMEOUT_SECS", 10u64)?),
            }),
            None => None,
        };
        if detector == DetectorKind::Remote && remote.is_none() {
            warn!("SIDE_DISH_DETECTOR=remote but ROBOFLOW_API_KEY is not set, using the local model");
            detector = DetectorKind::Local;
        }

        Ok(Config {
            database_url,
            pool_max_size: parse_or(&lookup, "DB_POOL_MAX_SIZE", DEFAULT_POOL_MAX_SIZE)?,
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 5001)?,
            upload_dir: lookup("UPLOAD_DIR").unwrap_or_else(|| "uploads".to_string()).into(),
            max_upload_bytes: parse_or(&lookup, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            main_model_path: lookup("MAIN_MODEL_PATH")
                .unwrap_or_else(|| "food_classification_model.onnx".to_string())
                .into(),
            side_dish_model_path: lookup("SIDE_DISH_MODEL_PATH")
                .unwrap_or_else(|| "nasi_lemak_side_dishes_model.onnx".to_string())
                .into(),
            detector,
            remote,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
{
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|_| {
            warn!("Invalid {key} value: {value}");
            ConfigError::Invalid { key, value }
        }),
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}

impl Display for DetectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectorKind::Local => write!(f, "local"),
            DetectorKind::Remote => write!(f, "remote"),
        }
    }
}
