//! Configuration loading and typed config structures for Realmclock.
//!
//! The canonical configuration lives in `realmclock-config.yaml` at the
//! project root. This module defines strongly-typed structs that mirror
//! the YAML structure and a loader that reads and validates the file.
//! Values are validated again by the types they construct; the checks
//! here only catch what would otherwise surface as a confusing error
//! deep inside world assembly.

use std::path::Path;

use realmclock_types::DEFAULT_HOURS_PER_DAY;
use serde::Deserialize;

/// Environment variable that overrides the configuration file path.
pub const CONFIG_PATH_ENV: &str = "REALMCLOCK_CONFIG";

/// Configuration file used when [`CONFIG_PATH_ENV`] is not set.
pub const DEFAULT_CONFIG_PATH: &str = "realmclock-config.yaml";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The YAML parsed but describes an unusable simulation.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of the problem.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level simulation configuration.
///
/// Mirrors the structure of `realmclock-config.yaml`. Every section is
/// optional and falls back to its defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// World clock settings, periods, and realms.
    #[serde(default)]
    pub world: WorldConfig,

    /// Autosave settings.
    #[serde(default)]
    pub autosave: AutosaveConfig,

    /// Engine run settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if it fails validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if it fails validation.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Return the configuration path: [`CONFIG_PATH_ENV`] if set, else
    /// [`DEFAULT_CONFIG_PATH`].
    pub fn resolve_path() -> std::path::PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map_or_else(|| DEFAULT_CONFIG_PATH.into(), std::path::PathBuf::from)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let world = &self.world;
        if world.hours_per_day == 0 {
            return Err(invalid("world.hours_per_day must be greater than zero"));
        }
        if !world.game_day_to_real_hour_ratio.is_finite()
            || world.game_day_to_real_hour_ratio <= 0.0
        {
            return Err(invalid(format!(
                "world.game_day_to_real_hour_ratio must be positive, got {}",
                world.game_day_to_real_hour_ratio
            )));
        }
        if world.periods.is_empty() {
            return Err(invalid("world.periods must name at least one period"));
        }
        for period in &world.periods {
            if period.hour >= world.hours_per_day || period.minute >= 60 {
                return Err(invalid(format!(
                    "period {} starts at {}:{:02}, outside a {}-hour day",
                    period.name, period.hour, period.minute, world.hours_per_day
                )));
            }
        }
        for realm in &world.realms {
            if realm.name.trim().is_empty() {
                return Err(invalid("realm names can not be blank"));
            }
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.into(),
    }
}

/// World-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorldConfig {
    /// Human-readable world name.
    #[serde(default = "default_world_name")]
    pub name: String,

    /// Hours in one in-game day.
    #[serde(default = "default_hours_per_day")]
    pub hours_per_day: u32,

    /// Real-world hours that one in-game day lasts.
    #[serde(default = "default_game_day_to_real_hour_ratio")]
    pub game_day_to_real_hour_ratio: f64,

    /// Named periods of the day.
    #[serde(default = "default_periods")]
    pub periods: Vec<PeriodConfig>,

    /// Realms attached to the world at startup.
    #[serde(default)]
    pub realms: Vec<RealmConfig>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: default_world_name(),
            hours_per_day: default_hours_per_day(),
            game_day_to_real_hour_ratio: default_game_day_to_real_hour_ratio(),
            periods: default_periods(),
            realms: Vec::new(),
        }
    }
}

/// A period of the day.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PeriodConfig {
    /// Period name.
    pub name: String,
    /// Start hour.
    pub hour: u32,
    /// Start minute.
    #[serde(default)]
    pub minute: u32,
}

/// A realm and its forward offset from world time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RealmConfig {
    /// Realm name.
    pub name: String,
    /// Hours ahead of world time.
    #[serde(default)]
    pub offset_hour: i32,
    /// Minutes ahead of world time.
    #[serde(default)]
    pub offset_minute: i32,
}

/// Autosave configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AutosaveConfig {
    /// Minutes between world snapshots (0 disables).
    #[serde(default)]
    pub frequency_minutes: u32,
}

/// Engine run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Real seconds to run before shutting down (0 runs until Ctrl-C).
    #[serde(default)]
    pub max_real_time_seconds: u64,

    /// Select the starting period from the host wall clock rather than the
    /// earliest period.
    #[serde(default = "default_true")]
    pub start_from_wall_clock: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_real_time_seconds: 0,
            start_from_wall_clock: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_world_name() -> String {
    "Mud World".to_owned()
}

const fn default_hours_per_day() -> u32 {
    DEFAULT_HOURS_PER_DAY
}

const fn default_game_day_to_real_hour_ratio() -> f64 {
    0.75
}

fn default_periods() -> Vec<PeriodConfig> {
    [("Morning", 5, 0), ("Afternoon", 12, 0), ("Evening", 18, 0), ("Night", 21, 0)]
        .into_iter()
        .map(|(name, hour, minute)| PeriodConfig {
            name: name.to_owned(),
            hour,
            minute,
        })
        .collect()
}

const fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
world:
  name: "Test World"
  hours_per_day: 24
  game_day_to_real_hour_ratio: 1.5
  periods:
    - { name: Morning, hour: 5, minute: 30 }
    - { name: Evening, hour: 18 }
  realms:
    - { name: Heartlands }
    - { name: Eastmarch, offset_hour: 3, offset_minute: 15 }
autosave:
  frequency_minutes: 10
engine:
  max_real_time_seconds: 30
  start_from_wall_clock: false
logging:
  level: debug
"#;

    #[test]
    fn parse_full_config() {
        let config = SimulationConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.world.name, "Test World");
        assert!((config.world.game_day_to_real_hour_ratio - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.world.periods.len(), 2);
        assert_eq!(config.world.periods[1].minute, 0);
        assert_eq!(config.world.realms[0].offset_hour, 0);
        assert_eq!(config.world.realms[1].offset_minute, 15);
        assert_eq!(config.autosave.frequency_minutes, 10);
        assert_eq!(config.engine.max_real_time_seconds, 30);
        assert!(!config.engine.start_from_wall_clock);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = SimulationConfig::parse("{}").unwrap();
        assert_eq!(config, SimulationConfig::default());
        assert_eq!(config.world.hours_per_day, 24);
        assert_eq!(config.world.periods.len(), 4);
        assert!(config.engine.start_from_wall_clock);
        assert_eq!(config.autosave.frequency_minutes, 0);
    }

    #[test]
    fn zero_hours_per_day_is_invalid() {
        let err = SimulationConfig::parse("world: { hours_per_day: 0 }").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn non_positive_ratio_is_invalid() {
        let err =
            SimulationConfig::parse("world: { game_day_to_real_hour_ratio: -2.0 }").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn period_outside_day_is_invalid() {
        let yaml = "world: { hours_per_day: 12, periods: [ { name: Late, hour: 20 } ] }";
        let err = SimulationConfig::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("Late"));
    }

    #[test]
    fn empty_period_list_is_invalid() {
        let err = SimulationConfig::parse("world: { periods: [] }").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn malformed_yaml_is_reported() {
        let err = SimulationConfig::parse("world: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let path = Path::new("/nonexistent/realmclock-config.yaml");
        let err = SimulationConfig::from_file(path).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
