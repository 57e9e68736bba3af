//! Session layer settings, read once at startup.

use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::errors::{Result, SessionError};

/// Hard ceiling on any history window.
pub const HISTORY_CEILING: usize = 50;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// SQLite file; `None` keeps history in memory.
    pub db_path: Option<PathBuf>,
    /// Messages fed back into the prompt (clamped to [`HISTORY_CEILING`]).
    pub history_limit: usize,
    /// How long a cache entry lives at all.
    pub cache_ttl: Duration,
    /// How old an entry may be and still be served.
    pub cache_max_age: Duration,
    pub writeback_queue: usize,
    pub writeback_workers: usize,
    /// Documents pulled into the prompt per question.
    pub context_top_k: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            history_limit: 10,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            cache_max_age: Duration::from_secs(5 * 60),
            writeback_queue: 256,
            writeback_workers: 2,
            context_top_k: 5,
        }
    }
}

impl SessionConfig {
    /// Reads `HISTORY_DB_PATH`, `CHAT_HISTORY_LIMIT`, `CHAT_CACHE_TTL_SECS`,
    /// `CHAT_CACHE_MAX_AGE_SECS`, `WRITEBACK_QUEUE`, `WRITEBACK_WORKERS` and
    /// `CHAT_CONTEXT_TOP_K`.
    ///
    /// # Errors
    /// [`SessionError::Config`] on unparsable numbers or zero sizes.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.db_path = env_str("HISTORY_DB_PATH").map(PathBuf::from);
        if let Some(n) = env_num::<usize>("CHAT_HISTORY_LIMIT")? {
            cfg.history_limit = n;
        }
        if let Some(s) = env_num::<u64>("CHAT_CACHE_TTL_SECS")? {
            cfg.cache_ttl = Duration::from_secs(s);
        }
        if let Some(s) = env_num::<u64>("CHAT_CACHE_MAX_AGE_SECS")? {
            cfg.cache_max_age = Duration::from_secs(s);
        }
        if let Some(n) = env_num::<usize>("WRITEBACK_QUEUE")? {
            cfg.writeback_queue = n;
        }
        if let Some(n) = env_num::<usize>("WRITEBACK_WORKERS")? {
            cfg.writeback_workers = n;
        }
        if let Some(n) = env_num::<usize>("CHAT_CONTEXT_TOP_K")? {
            cfg.context_top_k = n;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.history_limit == 0 {
            return Err(SessionError::Config("history_limit must be > 0".into()));
        }
        if self.writeback_queue == 0 || self.writeback_workers == 0 {
            return Err(SessionError::Config(
                "write-back queue and workers must be > 0".into(),
            ));
        }
        if self.cache_ttl.is_zero() {
            return Err(SessionError::Config("cache ttl must be > 0".into()));
        }
        Ok(())
    }

    /// History window actually used, never above the ceiling.
    pub fn window(&self) -> usize {
        self.history_limit.clamp(1, HISTORY_CEILING)
    }
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_num<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env_str(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| SessionError::Config(format!("{name} is not a valid number: {raw}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_clamped_to_ceiling() {
        let mut cfg = SessionConfig::default();
        assert_eq!(cfg.window(), 10);
        cfg.history_limit = 500;
        assert_eq!(cfg.window(), HISTORY_CEILING);
    }

    #[test]
    fn zero_workers_rejected() {
        let cfg = SessionConfig {
            writeback_workers: 0,
            ..SessionConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
