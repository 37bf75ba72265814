use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app_env: String,
    pub log_level: String,
    pub redirect_server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub telemetry: TelemetryConfig,
    pub geoip: GeoIpConfig,
    pub trusted_proxy_mode: TrustedProxyMode,
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub redis_url: String,
    pub ttl_secs: u64,
    pub max_entries: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub per_second: f64,
    pub burst: u32,
    /// Key count above which the periodic cleanup clears the map
    pub max_keys: usize,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub access_queue_capacity: usize,
    pub audit_queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoIpConfig {
    pub account_id: Option<String>,
    pub license_key: Option<String>,
    pub edition_ids: String,
    pub db_path: PathBuf,
    pub refresh_interval_secs: u64,
    /// Path or name of the geoipupdate executable
    pub update_binary: String,
}

/// Which forwarding headers are trusted for the client address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Socket peer address only
    None,
    /// RFC 7239 Forwarded, then X-Forwarded-For
    Standard,
    /// CF-Connecting-IP
    Cloudflare,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let backend = match var("DATABASE_BACKEND", "sqlite").to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            "sqlite" => DatabaseBackend::Sqlite,
            other => {
                tracing::warn!(
                    "Unknown DATABASE_BACKEND '{other}', falling back to 'sqlite'. Supported values: sqlite, postgres"
                );
                DatabaseBackend::Sqlite
            }
        };

        let cache_backend = match var("CACHE_BACKEND", "memory").to_lowercase().as_str() {
            "redis" => CacheBackend::Redis,
            "memory" => CacheBackend::Memory,
            other => {
                tracing::warn!(
                    "Unknown CACHE_BACKEND '{other}', falling back to 'memory'. Supported values: memory, redis"
                );
                CacheBackend::Memory
            }
        };

        let trusted_proxy_mode = match var("TRUSTED_PROXY_MODE", "cloudflare")
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::None
            }
        };

        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Config {
            app_env: var("APP_ENV", "local"),
            log_level: var("LOG_LEVEL", "info"),
            redirect_server: ServerConfig {
                host: var("REDIRECT_HOST", "127.0.0.1"),
                port: parse(&lookup, "REDIRECT_PORT", 8080)?,
            },
            database: DatabaseConfig {
                backend,
                url: var("DATABASE_URL", "sqlite://./redrx.db?mode=rwc"),
                max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?,
            },
            cache: CacheConfig {
                backend: cache_backend,
                redis_url: var("REDIS_URL", "redis://127.0.0.1:6379"),
                ttl_secs: parse(&lookup, "CACHE_TTL_SECS", 600)?,
                max_entries: parse(&lookup, "CACHE_MAX_ENTRIES", 10_000)?,
            },
            rate_limit: RateLimitConfig {
                per_second: parse(&lookup, "RATE_LIMIT_PER_SECOND", 5.0)?,
                burst: parse(&lookup, "RATE_LIMIT_BURST", 10)?,
                max_keys: parse(&lookup, "RATE_LIMIT_MAX_KEYS", 10_000)?,
                cleanup_interval_secs: parse(&lookup, "RATE_LIMIT_CLEANUP_SECS", 600)?,
            },
            telemetry: TelemetryConfig {
                access_queue_capacity: parse(&lookup, "ACCESS_QUEUE_CAPACITY", 1000)?,
                audit_queue_capacity: parse(&lookup, "AUDIT_QUEUE_CAPACITY", 100)?,
            },
            geoip: GeoIpConfig {
                account_id: non_empty("MAXMIND_ACCOUNT_ID"),
                license_key: non_empty("MAXMIND_LICENSE_KEY"),
                edition_ids: var("MAXMIND_EDITION_IDS", "GeoLite2-Country"),
                db_path: PathBuf::from(var("GEOIP_DB_PATH", "./geoip/GeoLite2-Country.mmdb")),
                refresh_interval_secs: parse(&lookup, "GEOIP_REFRESH_SECS", 86_400)?,
                update_binary: var("GEOIPUPDATE_BIN", "geoipupdate"),
            },
            trusted_proxy_mode,
            shutdown_grace_ms: parse(&lookup, "SHUTDOWN_GRACE_MS", 500)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    fn validate(&self) -> anyhow::Result<()> {
        let rate = self.rate_limit.per_second;
        anyhow::ensure!(
            rate.is_finite() && rate > 0.0,
            "RATE_LIMIT_PER_SECOND must be greater than 0 (got {rate})"
        );
        anyhow::ensure!(self.rate_limit.burst >= 1, "RATE_LIMIT_BURST must be at least 1");
        anyhow::ensure!(
            self.rate_limit.cleanup_interval_secs >= 1,
            "RATE_LIMIT_CLEANUP_SECS must be at least 1"
        );
        anyhow::ensure!(
            self.telemetry.access_queue_capacity >= 1,
            "ACCESS_QUEUE_CAPACITY must be at least 1"
        );
        anyhow::ensure!(
            self.telemetry.audit_queue_capacity >= 1,
            "AUDIT_QUEUE_CAPACITY must be at least 1"
        );
        anyhow::ensure!(self.cache.ttl_secs >= 1, "CACHE_TTL_SECS must be at least 1");
        anyhow::ensure!(
            self.geoip.refresh_interval_secs >= 1,
            "GEOIP_REFRESH_SECS must be at least 1"
        );
        anyhow::ensure!(
            self.database.max_connections >= 1,
            "DATABASE_MAX_CONNECTIONS must be at least 1"
        );
        Ok(())
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: '{raw}'")),
        None => Ok(default),
    }
}
