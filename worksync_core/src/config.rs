use crate::{Error, Result};
use chrono::NaiveTime;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PAGE_SIZE: usize = 200;
pub const MAX_PAGE_SIZE: usize = 20_000;
pub const DEFAULT_RUNNING_FRESHNESS: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// SQLite database file holding connection, sync state and mirrored items.
    pub database_path: PathBuf,
    /// Local wall-clock time of the daily pass.
    pub daily_at: NaiveTime,
    pub page_size: usize,
    /// A `Running` state younger than this is treated as a live pass and skipped.
    pub running_freshness: Duration,
    pub scheduler_enabled: bool,
    pub http_addr: String,
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// JSON lines when true, human-readable otherwise.
    pub json: bool,
    /// Used when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            json: true,
            default_filter: "info".to_string(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/worksync.db"),
            daily_at: NaiveTime::from_hms_opt(2, 0, 0).unwrap_or(NaiveTime::MIN),
            page_size: DEFAULT_PAGE_SIZE,
            running_freshness: DEFAULT_RUNNING_FRESHNESS,
            scheduler_enabled: true,
            http_addr: "127.0.0.1:8080".to_string(),
            log: LogConfig::default(),
        }
    }
}

impl SyncConfig {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(v) = lookup("WORKSYNC_DATABASE_PATH").filter(|v| !v.trim().is_empty()) {
            cfg.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("WORKSYNC_DAILY_AT") {
            cfg.daily_at = parse_daily_at(&v)?;
        }
        if let Some(v) = lookup("WORKSYNC_PAGE_SIZE") {
            cfg.page_size = v.trim().parse::<usize>().map_err(|_| {
                Error::InvalidInput(format!("WORKSYNC_PAGE_SIZE is not a number: '{v}'"))
            })?;
        }
        if let Some(v) = lookup("WORKSYNC_RUNNING_FRESHNESS_MINUTES") {
            let minutes = v.trim().parse::<u64>().map_err(|_| {
                Error::InvalidInput(format!(
                    "WORKSYNC_RUNNING_FRESHNESS_MINUTES is not a number: '{v}'"
                ))
            })?;
            cfg.running_freshness = Duration::from_secs(minutes.saturating_mul(60));
        }
        if let Some(v) = lookup("WORKSYNC_SCHEDULER_ENABLED") {
            cfg.scheduler_enabled = parse_bool(&v);
        }
        if let Some(v) = lookup("WORKSYNC_HTTP_ADDR").filter(|v| !v.trim().is_empty()) {
            cfg.http_addr = v.trim().to_string();
        }
        if let Some(v) = lookup("WORKSYNC_LOG_JSON") {
            cfg.log.json = parse_bool(&v);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    #[tracing::instrument(level = "debug")]
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::InvalidInput("database_path is empty".to_string()));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::InvalidInput(format!(
                "page_size must be within 1..={MAX_PAGE_SIZE}"
            )));
        }
        if self.running_freshness.is_zero() {
            return Err(Error::InvalidInput(
                "running_freshness must be > 0".to_string(),
            ));
        }
        if self.http_addr.trim().is_empty() {
            return Err(Error::InvalidInput("http_addr is empty".to_string()));
        }
        Ok(())
    }
}

/// Parse `HH:MM` (or `HH:MM:SS`).
pub fn parse_daily_at(raw: &str) -> Result<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| Error::InvalidInput(format!("invalid daily time '{raw}', expected HH:MM")))
}

fn parse_bool(raw: &str) -> bool {
    let v = raw.trim();
    v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.page_size, 200);
        assert_eq!(cfg.daily_at, NaiveTime::from_hms_opt(2, 0, 0).unwrap());
        assert_eq!(cfg.running_freshness, Duration::from_secs(7200));
        assert!(cfg.scheduler_enabled);
        assert!(cfg.log.json);
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = SyncConfig::from_lookup(lookup(&[
            ("WORKSYNC_DAILY_AT", "23:15"),
            ("WORKSYNC_PAGE_SIZE", "50"),
            ("WORKSYNC_RUNNING_FRESHNESS_MINUTES", "30"),
            ("WORKSYNC_SCHEDULER_ENABLED", "false"),
            ("WORKSYNC_LOG_JSON", "0"),
        ]))
        .unwrap();
        assert_eq!(cfg.daily_at, NaiveTime::from_hms_opt(23, 15, 0).unwrap());
        assert_eq!(cfg.page_size, 50);
        assert_eq!(cfg.running_freshness, Duration::from_secs(1800));
        assert!(!cfg.scheduler_enabled);
        assert!(!cfg.log.json);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(SyncConfig::from_lookup(lookup(&[("WORKSYNC_PAGE_SIZE", "0")])).is_err());
        assert!(SyncConfig::from_lookup(lookup(&[("WORKSYNC_DAILY_AT", "25:00")])).is_err());
        assert!(
            SyncConfig::from_lookup(lookup(&[("WORKSYNC_RUNNING_FRESHNESS_MINUTES", "0")]))
                .is_err()
        );
    }
}
