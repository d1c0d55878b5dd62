use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub transform: TransformConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub api_base_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl StorageConfig {
    pub fn temp_dir(&self) -> PathBuf {
        self.path.join(".temp")
    }

    pub fn bucket_dir(&self, bucket_name: &str) -> PathBuf {
        self.path.join(bucket_name)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransformConfig {
    /// Hard ceiling applied on top of any bucket-config value for quality.
    pub max_quality: u8,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT").unwrap_or_else(|_| "9000".to_string()).parse()?,
                api_base_url: env::var("API_BASE_URL")
                    .unwrap_or_else(|_| "http://localhost:9000".to_string()),
            },
            storage: StorageConfig {
                path: PathBuf::from(env::var("STORAGE_PATH").unwrap_or_else(|_| "/data".to_string())),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://./vaultbox.db".to_string()),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            },
            transform: TransformConfig {
                max_quality: env::var("IMAGE_TRANSFORM_MAX_QUALITY")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()?,
            },
        })
    }
}
