// crates/revolve-config/src/lib.rs
// ============================================================================
// Module: Revolve Config
// Description: Typed configuration model, loading, and bounds validation.
// Purpose: Give every other crate one validated source of tunable
// thresholds instead of scattered literal defaults.
// Dependencies: serde, thiserror, toml
// ============================================================================

#![forbid(unsafe_code)]

pub mod config;

pub use config::CONFIG_ENV_VAR;
pub use config::ConfigError;
pub use config::ExplorationConfig;
pub use config::GateConfig;
pub use config::LearningConfig;
pub use config::LoggingConfig;
pub use config::MAX_CONFIG_FILE_SIZE;
pub use config::RegressionConfig;
pub use config::RevolveConfig;
pub use config::RolloutConfig;
pub use config::RouterConfig;
pub use config::StoreConfig;
pub use config::WorkingMemoryConfig;
