//! Fly-scan configuration using Figment
//!
//! Configuration is layered, lowest precedence first:
//! 1. Built-in defaults ([`FlyscanConfig::default`])
//! 2. A TOML file (default `config/flyscan.toml`, optional)
//! 3. Environment variables prefixed with `FLYSCAN_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! FLYSCAN_APPLICATION__LOG_LEVEL=debug
//! FLYSCAN_SCAN__OUTPUT_TRIGGERS=row_gate
//! FLYSCAN_SIMULATION__I10=3713707
//! ```

use std::collections::HashSet;
use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pmac::consts::TRAJECTORY_PROGRAM_NUM;
use crate::pmac::modes::MotionTrigger;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/flyscan.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
    #[error("Configuration serialization error: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FlyscanConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Trajectory scan settings
    #[serde(default)]
    pub scan: ScanConfig,
    /// Simulated controller used by the binary and the tests
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Trajectory scan configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Which segments fire detector triggers
    #[serde(default)]
    pub output_triggers: MotionTrigger,
    /// Shortest turnaround between rows, in seconds
    #[serde(default = "default_min_turnaround")]
    pub min_turnaround: f64,
    /// Shortest interval between turnaround breakpoints, in seconds
    #[serde(default = "default_min_interval")]
    pub min_interval: f64,
    /// Bound on every controller channel operation, in milliseconds
    #[serde(default = "default_io_timeout")]
    pub io_timeout_ms: u64,
    /// Progress polling interval while executing, in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

/// Simulated controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Servo clock divider; 2621440 gives the nominal 3.2 kHz
    #[serde(default = "default_i10")]
    pub i10: f64,
    /// Reported trajectory program version
    #[serde(default = "default_program_version")]
    pub program_version: f64,
    /// Segments completed per progress readback
    #[serde(default = "default_points_per_poll")]
    pub points_per_poll: usize,
    /// Motors attached to the controller
    #[serde(default)]
    pub motors: Vec<SimulatedMotor>,
}

/// One simulated motor record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedMotor {
    /// Scan axis driven by the motor
    pub name: String,
    /// Coordinate system port (e.g. "CS1")
    pub cs_port: String,
    /// Axis letter inside the coordinate system; empty when unassigned
    #[serde(default)]
    pub cs_axis: String,
    /// Velocity limit in units per second
    pub max_velocity: f64,
    /// Time to reach max_velocity from rest, in seconds
    pub acceleration_time: f64,
    /// Units per encoder count
    #[serde(default = "default_resolution")]
    pub resolution: f64,
    /// User offset
    #[serde(default)]
    pub offset: f64,
    /// Initial position
    #[serde(default)]
    pub position: f64,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_min_turnaround() -> f64 {
    0.0
}

fn default_min_interval() -> f64 {
    0.002
}

fn default_io_timeout() -> u64 {
    5000
}

fn default_poll_interval() -> u64 {
    100
}

fn default_i10() -> f64 {
    2_621_440.0
}

fn default_program_version() -> f64 {
    TRAJECTORY_PROGRAM_NUM
}

fn default_points_per_poll() -> usize {
    2000
}

fn default_resolution() -> f64 {
    0.001
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "rust_flyscan".to_string(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            output_triggers: MotionTrigger::default(),
            min_turnaround: default_min_turnaround(),
            min_interval: default_min_interval(),
            io_timeout_ms: default_io_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let motor = |name: &str, axis: &str| SimulatedMotor {
            name: name.to_string(),
            cs_port: "CS1".to_string(),
            cs_axis: axis.to_string(),
            max_velocity: 10.0,
            acceleration_time: 0.1,
            resolution: default_resolution(),
            offset: 0.0,
            position: 0.0,
        };
        Self {
            i10: default_i10(),
            program_version: default_program_version(),
            points_per_poll: default_points_per_poll(),
            motors: vec![motor("x", "X"), motor("y", "Y")],
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl FlyscanConfig {
    /// Load configuration from `config/flyscan.toml` and environment variables
    ///
    /// A missing file is not an error; defaults and the environment still
    /// apply. After loading, configuration is validated.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file is malformed or validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("FLYSCAN_").split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level and log format are known
    /// - Scan timing values are finite and non-negative, I/O bounds non-zero
    /// - Simulated controller values are positive and motor names unique
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        for (key, value) in [
            ("scan.min_turnaround", self.scan.min_turnaround),
            ("scan.min_interval", self.scan.min_interval),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid {key} {value}. Must be a non-negative number of seconds"
                )));
            }
        }
        if self.scan.io_timeout_ms == 0 || self.scan.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "scan.io_timeout_ms and scan.poll_interval_ms must be non-zero".to_string(),
            ));
        }

        if !(self.simulation.i10.is_finite() && self.simulation.i10 > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid simulation.i10 {}",
                self.simulation.i10
            )));
        }
        if self.simulation.points_per_poll == 0 {
            return Err(ConfigError::ValidationError(
                "simulation.points_per_poll must be non-zero".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for motor in &self.simulation.motors {
            if !names.insert(&motor.name) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate motor name: '{}'",
                    motor.name
                )));
            }
            if !(motor.max_velocity > 0.0 && motor.acceleration_time > 0.0) {
                return Err(ConfigError::ValidationError(format!(
                    "Motor '{}' needs positive max_velocity and acceleration_time",
                    motor.name
                )));
            }
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = FlyscanConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.scan.output_triggers, MotionTrigger::EveryPoint);
        assert_eq!(config.simulation.motors.len(), 2);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = write_config(
            r#"
[scan]
output_triggers = "row_gate"
min_turnaround = 0.1

[[simulation.motors]]
name = "t"
cs_port = "CS2"
cs_axis = "A"
max_velocity = 5.0
acceleration_time = 0.5
"#,
        );
        let config = FlyscanConfig::load_from(file.path()).unwrap();
        assert_eq!(config.scan.output_triggers, MotionTrigger::RowGate);
        assert_eq!(config.scan.min_turnaround, 0.1);
        assert_eq!(config.scan.min_interval, 0.002);
        assert_eq!(config.simulation.motors.len(), 1);
        assert_eq!(config.simulation.motors[0].resolution, 0.001);
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let file = write_config("[application]\nname = \"x\"\nlog_level = \"loud\"\n");
        let err = FlyscanConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_duplicate_motor_rejected() {
        let mut config = FlyscanConfig::default();
        config.simulation.motors.push(config.simulation.motors[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = FlyscanConfig::default();
        let file = write_config(&config.to_toml().unwrap());
        assert_eq!(FlyscanConfig::load_from(file.path()).unwrap(), config);
    }
}
