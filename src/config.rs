//! Runtime settings
//!
//! Read once from the environment (after `.env` has been loaded by the
//! binaries). Every value has a default so tests can use `Settings::default()`.

use crate::error::PipelineError;
use crate::Result;
use chrono::Duration;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub const MAX_HISTORY_ENTRIES: usize = 10;
pub const CONVERSATION_TIMEOUT_HOURS: i64 = 24;
pub const SESSION_RETENTION_DAYS: i64 = 30;
pub const MAINTENANCE_INTERVAL_SECS: u64 = 300;
pub const GENERATION_WORKERS: usize = 4;
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone)]
pub struct Settings {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub storage_dir: PathBuf,
    pub backup_dir: Option<PathBuf>,
    pub dataset_path: PathBuf,
    /// Conversation pairs kept per session
    pub max_history: usize,
    pub conversation_timeout_hours: i64,
    pub session_retention_days: i64,
    pub maintenance_interval_secs: u64,
    pub generation_workers: usize,
    pub port: u16,
    /// Adds the generated expression and raw result to query responses
    pub development: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            gemini_model: DEFAULT_MODEL.to_string(),
            storage_dir: PathBuf::from("data/conversations"),
            backup_dir: None,
            dataset_path: PathBuf::from("data/employee_data.csv"),
            max_history: MAX_HISTORY_ENTRIES,
            conversation_timeout_hours: CONVERSATION_TIMEOUT_HOURS,
            session_retention_days: SESSION_RETENTION_DAYS,
            maintenance_interval_secs: MAINTENANCE_INTERVAL_SECS,
            generation_workers: GENERATION_WORKERS,
            port: 8080,
            development: false,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let max_history: usize = parse_var("MAX_HISTORY_ENTRIES", defaults.max_history)?;
        if max_history == 0 {
            return Err(PipelineError::Config(
                "MAX_HISTORY_ENTRIES must be at least 1".to_string(),
            ));
        }

        let generation_workers: usize =
            parse_var("GENERATION_WORKERS", defaults.generation_workers)?;
        if generation_workers == 0 {
            return Err(PipelineError::Config(
                "GENERATION_WORKERS must be at least 1".to_string(),
            ));
        }

        let port = match env::var("PORT").or_else(|_| env::var("API_PORT")) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|_| PipelineError::Config(format!("invalid port: {}", raw)))?,
            Err(_) => defaults.port,
        };

        let settings = Self {
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: env::var("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            storage_dir: env::var("STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            backup_dir: env::var("BACKUP_DIR").ok().map(PathBuf::from),
            dataset_path: env::var("DATASET_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.dataset_path),
            max_history,
            conversation_timeout_hours: parse_var(
                "CONVERSATION_TIMEOUT_HOURS",
                defaults.conversation_timeout_hours,
            )?,
            session_retention_days: parse_var(
                "SESSION_RETENTION_DAYS",
                defaults.session_retention_days,
            )?,
            maintenance_interval_secs: parse_var(
                "MAINTENANCE_INTERVAL_SECS",
                defaults.maintenance_interval_secs,
            )?,
            generation_workers,
            port,
            development: env::var("ENV")
                .map(|v| v.eq_ignore_ascii_case("development"))
                .unwrap_or(false),
        };
        settings.check_durations()?;
        Ok(settings)
    }

    fn check_durations(&self) -> Result<()> {
        if Duration::try_hours(self.conversation_timeout_hours).is_none() {
            return Err(PipelineError::Config(format!(
                "CONVERSATION_TIMEOUT_HOURS out of range: {}",
                self.conversation_timeout_hours
            )));
        }
        if Duration::try_days(self.session_retention_days).is_none() {
            return Err(PipelineError::Config(format!(
                "SESSION_RETENTION_DAYS out of range: {}",
                self.session_retention_days
            )));
        }
        if self.maintenance_cadence() == Duration::MAX {
            return Err(PipelineError::Config(format!(
                "MAINTENANCE_INTERVAL_SECS out of range: {}",
                self.maintenance_interval_secs
            )));
        }
        Ok(())
    }

    /// Durations saturate instead of overflowing; `from_env` rejects such values
    pub fn idle_timeout(&self) -> Duration {
        Duration::try_hours(self.conversation_timeout_hours).unwrap_or(Duration::MAX)
    }

    pub fn retention(&self) -> Duration {
        Duration::try_days(self.session_retention_days).unwrap_or(Duration::MAX)
    }

    pub fn maintenance_cadence(&self) -> Duration {
        i64::try_from(self.maintenance_interval_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }

    /// Backup root: explicit `BACKUP_DIR`, else `backups/` next to the storage dir
    pub fn backup_root(&self) -> PathBuf {
        if let Some(dir) = &self.backup_dir {
            return dir.clone();
        }
        self.storage_dir
            .parent()
            .map(|p| p.join("backups"))
            .unwrap_or_else(|| PathBuf::from("backups"))
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| PipelineError::Config(format!("invalid value for {}: {}", name, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.max_history, 10);
        assert_eq!(settings.conversation_timeout_hours, 24);
        assert!(!settings.development);
    }

    #[test]
    fn test_backup_root_next_to_storage() {
        let settings = Settings {
            storage_dir: PathBuf::from("/srv/data/conversations"),
            ..Settings::default()
        };
        assert_eq!(settings.backup_root(), PathBuf::from("/srv/data/backups"));
    }

    #[test]
    fn test_huge_durations_saturate() {
        let settings = Settings {
            conversation_timeout_hours: i64::MAX,
            session_retention_days: i64::MAX,
            maintenance_interval_secs: u64::MAX,
            ..Settings::default()
        };
        assert_eq!(settings.idle_timeout(), Duration::MAX);
        assert_eq!(settings.retention(), Duration::MAX);
        assert!(matches!(settings.check_durations(), Err(PipelineError::Config(_))));
        assert!(Settings::default().check_durations().is_ok());
    }

    #[test]
    fn test_parse_var_falls_back_to_default() {
        let value: usize = parse_var("TQO_SURELY_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }
}
