//! Configuration management for flightduty.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::timer::FallbackRule;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "flightduty";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "trips.db";

/// Prefix for environment overrides. Nested keys are separated by `__`,
/// e.g. `FLIGHTDUTY_DUTY__TICK_INTERVAL_SECS=10`.
const ENV_PREFIX: &str = "FLIGHTDUTY_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `FLIGHTDUTY_`)
/// 2. TOML config file at `~/.config/flightduty/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Duty timer configuration.
    pub duty: DutyConfig,
    /// Compliance limits.
    pub compliance: ComplianceConfig,
    /// Companion link configuration.
    pub companion: CompanionConfig,
    /// Display preferences.
    pub display: DisplayConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/flightduty/trips.db`
    pub database_path: Option<PathBuf>,
}

/// Duty timer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DutyConfig {
    /// Seconds between duty timer ticks.
    pub tick_interval_secs: u64,
    /// Report time assumed before the first leg when no timer ran.
    pub report_minutes: u32,
    /// Release time assumed after the last leg when no timer ran.
    pub release_minutes: u32,
}

/// Compliance limits, in whole hours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceConfig {
    /// Whether the per-duty-period flight time check is reported.
    /// Off by default; cargo dispatch screens it separately.
    pub per_fdp_enabled: bool,
    /// Flight time ceiling for a single duty period.
    pub fdp_flight_limit_hours: u32,
    /// Duty ceiling over the trailing 7 days.
    pub duty_7d_limit_hours: u32,
    /// Flight time ceiling over the trailing 30 days.
    pub flight_30d_limit_hours: u32,
    /// Flight time ceiling over the trailing 365 days.
    pub flight_annual_limit_hours: u32,
}

/// Companion link configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    /// Number of recently applied companion messages remembered for
    /// retransmission detection.
    pub dedup_window: usize,
}

/// Display preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Show timestamps in UTC rather than local time.
    pub utc: bool,
}

impl Default for DutyConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            report_minutes: 60,
            release_minutes: 15,
        }
    }
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            per_fdp_enabled: false,
            fdp_flight_limit_hours: 9,
            duty_7d_limit_hours: 60,
            flight_30d_limit_hours: 100,
            flight_annual_limit_hours: 1000,
        }
    }
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self { dedup_window: 64 }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { utc: true }
    }
}

impl DutyConfig {
    /// The fallback duty rule built from the report and release times.
    #[must_use]
    pub fn fallback_rule(&self) -> FallbackRule {
        FallbackRule {
            report_minutes: i64::from(self.report_minutes),
            release_minutes: i64::from(self.release_minutes),
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `FLIGHTDUTY_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.duty.tick_interval_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "tick_interval_secs must be greater than 0".to_string(),
            });
        }

        if self.companion.dedup_window == 0 {
            return Err(Error::ConfigValidation {
                message: "dedup_window must be greater than 0".to_string(),
            });
        }

        let limits = [
            ("fdp_flight_limit_hours", self.compliance.fdp_flight_limit_hours),
            ("duty_7d_limit_hours", self.compliance.duty_7d_limit_hours),
            ("flight_30d_limit_hours", self.compliance.flight_30d_limit_hours),
            (
                "flight_annual_limit_hours",
                self.compliance.flight_annual_limit_hours,
            ),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(Error::ConfigValidation {
                    message: format!("{name} must be greater than 0"),
                });
            }
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the tick interval as a Duration.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.duty.tick_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.duty.tick_interval_secs, 30);
        assert!(!config.compliance.per_fdp_enabled);
        assert_eq!(config.companion.dedup_window, 64);
        assert!(config.display.utc);
    }

    #[test]
    fn test_default_compliance_config() {
        let compliance = ComplianceConfig::default();

        assert_eq!(compliance.fdp_flight_limit_hours, 9);
        assert_eq!(compliance.duty_7d_limit_hours, 60);
        assert_eq!(compliance.flight_30d_limit_hours, 100);
        assert_eq!(compliance.flight_annual_limit_hours, 1000);
    }

    #[test]
    fn test_fallback_rule_from_duty_config() {
        let duty = DutyConfig {
            report_minutes: 45,
            release_minutes: 30,
            ..DutyConfig::default()
        };
        let rule = duty.fallback_rule();
        assert_eq!(rule.report_minutes, 45);
        assert_eq!(rule.release_minutes, 30);
        assert_eq!(DutyConfig::default().fallback_rule(), FallbackRule::default());
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_tick_interval() {
        let mut config = Config::default();
        config.duty.tick_interval_secs = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("tick_interval_secs"));
    }

    #[test]
    fn test_validate_zero_dedup_window() {
        let mut config = Config::default();
        config.companion.dedup_window = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("dedup_window"));
    }

    #[test]
    fn test_validate_zero_limit() {
        let mut config = Config::default();
        config.compliance.flight_30d_limit_hours = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("flight_30d_limit_hours"));
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        let path = config.database_path();

        assert!(path.to_string_lossy().contains("trips.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_tick_interval() {
        let config = Config::default();
        assert_eq!(config.tick_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("flightduty"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), Config::default());
    }

    #[test]
    fn test_load_toml_overrides() {
        let path = std::env::temp_dir().join(format!(
            "flightduty_config_{}.toml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            "[duty]\ntick_interval_secs = 5\n\n[compliance]\nper_fdp_enabled = true\n",
        )
        .unwrap();

        let config = Config::load_from(Some(path.clone())).unwrap();
        assert_eq!(config.duty.tick_interval_secs, 5);
        assert_eq!(config.duty.report_minutes, 60);
        assert!(config.compliance.per_fdp_enabled);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let path = std::env::temp_dir().join(format!(
            "flightduty_bad_config_{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[companion]\ndedup_window = 0\n").unwrap();

        let err = Config::load_from(Some(path.clone())).unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_compliance_config_deserialize() {
        let json = r#"{"per_fdp_enabled": true, "duty_7d_limit_hours": 50}"#;
        let compliance: ComplianceConfig = serde_json::from_str(json).unwrap();
        assert!(compliance.per_fdp_enabled);
        assert_eq!(compliance.duty_7d_limit_hours, 50);
        assert_eq!(compliance.flight_30d_limit_hours, 100);
    }
}
