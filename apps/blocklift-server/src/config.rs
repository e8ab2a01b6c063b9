//! Configuration management for Blocklift Server

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::upload::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_RETRIES, MAX_FILE_SIZE};

/// Startup configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub resume: ResumeConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Also append plain-text logs to this file
    pub log_file: Option<PathBuf>,
}

/// Where staged blocks and committed objects live
#[derive(Debug, Clone)]
pub enum StorageConfig {
    S3(S3Config),
    Local(LocalStorageConfig),
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
    /// Key prefix for staged (uncommitted) blocks
    pub staging_prefix: String,
}

#[derive(Debug, Clone)]
pub struct LocalStorageConfig {
    pub root: PathBuf,
}

/// Where resume records are persisted
#[derive(Debug, Clone)]
pub enum ResumeConfig {
    File { dir: PathBuf },
    Sqlite { url: String },
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub chunk_size: usize,
    pub max_retries: u32,
    pub backoff_unit: Duration,
    pub max_file_size: u64,
    /// Request body ceiling for the batch endpoint; `None` disables the limit
    pub max_request_bytes: Option<usize>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_unit: Duration::from_secs(1),
            max_file_size: MAX_FILE_SIZE,
            max_request_bytes: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                log_file: None,
            },
            storage: StorageConfig::Local(LocalStorageConfig {
                root: PathBuf::from("./objects"),
            }),
            resume: ResumeConfig::File {
                dir: PathBuf::from("./upload_state"),
            },
            upload: UploadConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = UploadConfig::default();

        let storage = match get("STORAGE_BACKEND").as_deref().unwrap_or("s3") {
            "s3" => StorageConfig::S3(S3Config {
                endpoint: get("S3_ENDPOINT"),
                bucket: get("S3_BUCKET").ok_or(ConfigError::Missing("S3_BUCKET"))?,
                access_key: get("S3_ACCESS_KEY").ok_or(ConfigError::Missing("S3_ACCESS_KEY"))?,
                secret_key: get("S3_SECRET_KEY").ok_or(ConfigError::Missing("S3_SECRET_KEY"))?,
                region: get("S3_REGION"),
                staging_prefix: get("S3_STAGING_PREFIX").unwrap_or_else(|| ".blocks".to_string()),
            }),
            "local" => StorageConfig::Local(LocalStorageConfig {
                root: PathBuf::from(
                    get("LOCAL_STORAGE_PATH").ok_or(ConfigError::Missing("LOCAL_STORAGE_PATH"))?,
                ),
            }),
            other => {
                return Err(ConfigError::Invalid {
                    key: "STORAGE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let resume = match get("RESUME_BACKEND").as_deref().unwrap_or("file") {
            "file" => ResumeConfig::File {
                dir: PathBuf::from(
                    get("RESUME_STATE_DIR").unwrap_or_else(|| "./upload_state".to_string()),
                ),
            },
            "sqlite" => ResumeConfig::Sqlite {
                url: get("DATABASE_URL").unwrap_or_else(|| "sqlite:./blocklift.db".to_string()),
            },
            other => {
                return Err(ConfigError::Invalid {
                    key: "RESUME_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let upload = UploadConfig {
            chunk_size: parse_or(&get, "UPLOAD_CHUNK_SIZE", defaults.chunk_size)?,
            max_retries: parse_or(&get, "UPLOAD_MAX_RETRIES", defaults.max_retries)?,
            backoff_unit: Duration::from_millis(parse_or(&get, "UPLOAD_BACKOFF_MS", 1000u64)?),
            max_file_size: parse_or(&get, "UPLOAD_MAX_FILE_SIZE", defaults.max_file_size)?,
            max_request_bytes: match get("UPLOAD_MAX_REQUEST_BYTES") {
                Some(_) => Some(parse_or(&get, "UPLOAD_MAX_REQUEST_BYTES", 0usize)?),
                None => defaults.max_request_bytes,
            },
        };

        if upload.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                key: "UPLOAD_CHUNK_SIZE",
                value: "0".to_string(),
            });
        }

        Ok(Config {
            server: ServerConfig {
                host: get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(&get, "SERVER_PORT", 3000u16)?,
                log_file: get("LOG_FILE").map(PathBuf::from),
            },
            storage,
            resume,
            upload,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}
