use std::{str::FromStr, time::Duration};

use anyhow::{bail, Context, Result};
use chrono::FixedOffset;

// ---------------------------------------------------------------------------
// StorageBackend
// ---------------------------------------------------------------------------

/// Which `Repository` implementation backs the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(anyhow::anyhow!("unknown storage backend: {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StorageConfig {
    Postgres { database_url: String, pool_max: u32 },
    Memory,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub server_host: String,
    pub server_port: u16,
    /// Shared secret for `POST /api/ingest`. Empty disables ingestion.
    pub ingest_token: String,
    /// Redis URL for the daily stats cache, `None` when unset or disabled.
    pub stats_cache_url: Option<String>,
    /// Upper bound for every stats cache round trip.
    pub stats_cache_timeout: Duration,
    pub stats_cache_ttl: Duration,
    /// Offset used to decide which calendar day "today" is.
    pub stats_utc_offset: FixedOffset,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let backend: StorageBackend = optional("STORAGE_BACKEND", "postgres").parse()?;
        let storage = match backend {
            StorageBackend::Postgres => StorageConfig::Postgres {
                database_url: required("DATABASE_URL")?,
                pool_max: optional("DB_POOL_MAX", "10")
                    .parse()
                    .context("DB_POOL_MAX must be a positive integer")?,
            },
            StorageBackend::Memory => StorageConfig::Memory,
        };

        let cache_enabled = parse_flag(&optional("STATS_CACHE_ENABLED", "1"))
            .context("STATS_CACHE_ENABLED must be a boolean flag")?;
        let stats_cache_url = std::env::var("REDIS_URL")
            .ok()
            .map(|url| url.trim().to_owned())
            .filter(|url| cache_enabled && !url.is_empty());

        Ok(Self {
            storage,
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            ingest_token: optional("INGEST_TOKEN", "").trim().to_owned(),
            stats_cache_url,
            stats_cache_timeout: parse_cache_timeout(&optional("STATS_CACHE_TIMEOUT_MS", "250"))?,
            stats_cache_ttl: Duration::from_secs(
                optional("STATS_CACHE_TTL_SECS", "3600")
                    .parse()
                    .context("STATS_CACHE_TTL_SECS must be a positive integer")?,
            ),
            stats_utc_offset: optional("STATS_UTC_OFFSET", "+00:00")
                .trim()
                .parse()
                .context("STATS_UTC_OFFSET must look like +HH:MM or -HH:MM")?,
        })
    }
}

/// Accepts the usual spellings of an on/off switch.
fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean flag, got {other:?}"),
    }
}

/// The cache timeout has to stay below one second, otherwise a degraded
/// cache would dominate request latency.
fn parse_cache_timeout(raw: &str) -> Result<Duration> {
    let ms: u64 = raw
        .trim()
        .parse()
        .context("STATS_CACHE_TIMEOUT_MS must be an integer")?;
    if !(1..1000).contains(&ms) {
        bail!("STATS_CACHE_TIMEOUT_MS must be between 1 and 999, got {ms}");
    }
    Ok(Duration::from_millis(ms))
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
