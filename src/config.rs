//! Environment-driven configuration for the pool and the HTTP surface.

use crate::error::AppError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_BEGIN_DEADLINE_SECS: u64 = 30;

/// Database settings. `DATABASE_URL` wins when set; otherwise the URL is
/// assembled from the discrete `GANTRY_DB_*` variables.
#[derive(Clone, Debug)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub begin_deadline: Duration,
}

impl DbConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                let host = env_or("GANTRY_DB_HOST", "localhost");
                let port = env_or("GANTRY_DB_PORT", "5432");
                let name = env_or("GANTRY_DB_NAME", "gantry");
                let user = env_or("GANTRY_DB_USER", "postgres");
                let password = env_or("GANTRY_DB_PASSWORD", "");
                format!("postgres://{user}:{password}@{host}:{port}/{name}")
            }
        };
        Ok(DbConfig {
            url,
            max_connections: env_parsed("GANTRY_DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            acquire_timeout: Duration::from_secs(env_parsed(
                "GANTRY_DB_ACQUIRE_TIMEOUT_SECS",
                DEFAULT_ACQUIRE_TIMEOUT_SECS,
            )?),
            begin_deadline: Duration::from_secs(env_parsed(
                "GANTRY_TX_BEGIN_DEADLINE_SECS",
                DEFAULT_BEGIN_DEADLINE_SECS,
            )?),
        })
    }

    pub async fn connect(&self) -> Result<PgPool, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(&self.url)
            .await?;
        Ok(pool)
    }
}

/// HTTP surface settings.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub mount_prefix: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Ok(ServerConfig {
            port: env_parsed("GANTRY_PORT", 3000u16)?,
            mount_prefix: env_or("GANTRY_MOUNT_PREFIX", ""),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::Internal(format!("invalid value for {key}: {raw}"))),
        Err(_) => Ok(default),
    }
}
