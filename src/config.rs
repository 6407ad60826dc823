//! Environment-driven application configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::models::{ExecutionMode, StrategyType};

/// Application configuration loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite file holding run history.
    pub database_path: String,
    /// Directory for the catalog snapshot and export file.
    pub cache_dir: String,
    /// Max upstream requests per rate-limit window.
    pub rate_limit_requests: usize,
    /// Rate-limit window in seconds.
    pub rate_limit_window: f64,
    /// Per-request upstream timeout in seconds.
    pub request_timeout_secs: u64,
    /// Hard ceiling on a full analysis run in seconds.
    pub analysis_timeout_secs: u64,
    /// Bounded worker pool size for the per-set fan-out.
    pub analysis_workers: usize,
    /// Background poll interval in seconds; 0 disables the loop.
    pub poll_interval_secs: u64,
    /// Allowed CORS origins for the dashboard.
    pub cors_origins: Vec<String>,
    /// Upstream API bases (v1 carries statistics, v2 items and orders).
    pub market_v1_url: String,
    pub market_v2_url: String,
    /// Strategy applied when a request does not name one.
    pub default_strategy: StrategyType,
    /// Execution mode applied when a request does not name one.
    pub default_execution_mode: ExecutionMode,
    /// HTTP listen port.
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "cache/market_runs.sqlite".to_string(),
            cache_dir: "cache".to_string(),
            rate_limit_requests: 3,
            rate_limit_window: 1.0,
            request_timeout_secs: 10,
            analysis_timeout_secs: 600,
            analysis_workers: 8,
            poll_interval_secs: 0,
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
            market_v1_url: "https://api.warframe.market/v1".to_string(),
            market_v2_url: "https://api.warframe.market/v2".to_string(),
            default_strategy: StrategyType::Balanced,
            default_execution_mode: ExecutionMode::Instant,
            port: 8080,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let database_path = std::env::var("DATABASE_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.database_path);
        if !database_path.ends_with(".sqlite") && database_path != ":memory:" {
            anyhow::bail!("DATABASE_PATH must end with .sqlite: {database_path}");
        }

        let cache_dir = std::env::var("CACHE_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.cache_dir);

        let rate_limit_requests = parse_env("RATE_LIMIT_REQUESTS", defaults.rate_limit_requests)?;
        if rate_limit_requests == 0 {
            anyhow::bail!("RATE_LIMIT_REQUESTS must be positive");
        }

        let rate_limit_window: f64 = parse_env("RATE_LIMIT_WINDOW", defaults.rate_limit_window)?;
        if rate_limit_window <= 0.0 {
            anyhow::bail!("RATE_LIMIT_WINDOW must be positive");
        }

        let request_timeout_secs = parse_env("REQUEST_TIMEOUT", defaults.request_timeout_secs)?;
        let analysis_timeout_secs = parse_env("ANALYSIS_TIMEOUT", defaults.analysis_timeout_secs)?;
        let analysis_workers = parse_env("ANALYSIS_WORKERS", defaults.analysis_workers)?;
        let poll_interval_secs =
            parse_env("ANALYSIS_POLL_INTERVAL_SECONDS", defaults.poll_interval_secs)?;

        let cors_origins = std::env::var("CORS_ORIGINS")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or(defaults.cors_origins);

        let market_v1_url = std::env::var("MARKET_API_V1_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or(defaults.market_v1_url);
        let market_v2_url = std::env::var("MARKET_API_V2_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or(defaults.market_v2_url);

        let default_strategy = match std::env::var("DEFAULT_STRATEGY") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse::<StrategyType>()
                .map_err(|e| anyhow::anyhow!("Invalid DEFAULT_STRATEGY: {e}"))?,
            _ => defaults.default_strategy,
        };

        let port = parse_env("PORT", defaults.port)?;

        Ok(Self {
            database_path,
            cache_dir,
            rate_limit_requests,
            rate_limit_window,
            request_timeout_secs,
            analysis_timeout_secs,
            analysis_workers,
            poll_interval_secs,
            cors_origins,
            market_v1_url,
            market_v2_url,
            default_strategy,
            default_execution_mode: ExecutionMode::Instant,
            port,
        })
    }

    /// Ensure the cache directory exists and the database parent is writable.
    pub fn prepare_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.cache_dir)
            .with_context(|| format!("Failed to create cache dir {}", self.cache_dir))?;
        if self.database_path != ":memory:" {
            if let Some(parent) = Path::new(&self.database_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database dir {}", parent.display())
                    })?;
                }
            }
        }
        Ok(())
    }

    pub fn export_file_path(&self) -> PathBuf {
        Path::new(&self.cache_dir).join("market_data_export.json")
    }

    pub fn catalog_file_path(&self) -> PathBuf {
        Path::new(&self.cache_dir).join("catalog.json")
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid {key}={raw}: {e}")),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.rate_limit_requests, 3);
        assert!((cfg.rate_limit_window - 1.0).abs() < f64::EPSILON);
        assert_eq!(cfg.analysis_timeout_secs, 600);
        assert_eq!(cfg.analysis_workers, 8);
        assert!(cfg.database_path.ends_with(".sqlite"));
    }

    #[test]
    fn export_path_lives_in_cache_dir() {
        let cfg = Config::default();
        assert_eq!(
            cfg.export_file_path(),
            Path::new("cache").join("market_data_export.json")
        );
    }
}
