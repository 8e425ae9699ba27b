//! Configuration System
//!
//! Configuration management for the fly-scan library and binary using Figment.
//!
//! # Configuration Sources
//!
//! Configuration is loaded from (in order of precedence):
//! 1. Environment variables prefixed with `FLYSCAN_`
//! 2. TOML configuration file (default: `config/flyscan.toml`)
//! 3. Built-in defaults
//!
//! # Example
//!
//! ```no_run
//! use rust_flyscan::config::FlyscanConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FlyscanConfig::load_from("custom/path.toml")?;
//!     println!("App name: {}", config.application.name);
//!     println!("Triggers: {:?}", config.scan.output_triggers);
//!     Ok(())
//! }
//! ```

pub mod settings;

pub use settings::{
    ApplicationConfig, ConfigError, FlyscanConfig, ScanConfig, SimulatedMotor, SimulationConfig,
    DEFAULT_CONFIG_PATH,
};
