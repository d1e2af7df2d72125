// crates/revolve-config/src/config.rs
// ============================================================================
// Module: Revolve Configuration
// Description: Typed TOML configuration model, loading, and bounds
// validation for every component's tunable thresholds.
// Purpose: Give the controller, rollout, and CLI crates one validated
// source of truth instead of scattered literal defaults.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file (explicit path, `REVOLVE_CONFIG`
//! environment override, or the `revolve.toml` default) and falls back to
//! built-in defaults section-by-section via `#[serde(default)]`. Loading
//! fails closed: a malformed file, an oversized file, or an out-of-bounds
//! value is a [`ConfigError`], never a silently clamped value.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "revolve.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "REVOLVE_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum total path length accepted for the config file or `store.root_dir`.
pub const MAX_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("config io error: {0}")]
    Io(String),
    /// The config file is not valid TOML.
    #[error("config parse error: {0}")]
    Parse(String),
    /// A loaded value falls outside its valid bounds.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Learning
// ============================================================================

/// Thresholds governing when the Learning Controller decides to train.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Minimum total runs observed before trigger A (failure-rate) can fire.
    pub min_runs: u64,
    /// Failure rate above which trigger A fires, given `min_runs`.
    pub max_failure_rate: f64,
    /// Runs since last training after which trigger B (cadence) fires.
    pub min_runs_between_training: u64,
    /// Maximum number of recent run examples assembled for one training
    /// pass.
    pub max_train_examples: u64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self { min_runs: 500, max_failure_rate: 0.15, min_runs_between_training: 1000, max_train_examples: 5000 }
    }
}

impl LearningConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        validate_unit_interval("learning.max_failure_rate", self.max_failure_rate)?;
        if self.min_runs == 0 {
            return Err(ConfigError::Invalid("learning.min_runs must be non-zero".to_string()));
        }
        if self.min_runs_between_training == 0 {
            return Err(ConfigError::Invalid("learning.min_runs_between_training must be non-zero".to_string()));
        }
        if self.max_train_examples == 0 {
            return Err(ConfigError::Invalid("learning.max_train_examples must be non-zero".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Exploration
// ============================================================================

/// Caps the Failure Budget enforces on the Exploration Engine.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ExplorationConfig {
    /// Maximum additional candidate failures the budget permits.
    pub max_failures: u32,
    /// Maximum additional candidate cost, in US dollars, the budget
    /// permits.
    pub max_cost_usd: f64,
    /// Maximum additional candidate latency, in milliseconds, the budget
    /// permits.
    pub max_latency_ms: u64,
    /// Maximum number of candidates generated and shadow-evaluated
    /// concurrently.
    pub max_parallel_candidates: u32,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self { max_failures: 10, max_cost_usd: 5.0, max_latency_ms: 20_000, max_parallel_candidates: 2 }
    }
}

impl ExplorationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_cost_usd < 0.0 {
            return Err(ConfigError::Invalid("exploration.max_cost_usd must be non-negative".to_string()));
        }
        if self.max_parallel_candidates == 0 {
            return Err(ConfigError::Invalid("exploration.max_parallel_candidates must be non-zero".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Rollout
// ============================================================================

/// Traffic fractions the Rollout Manager's canary and partial stages use.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// Traffic fraction sent to the candidate during the canary stage.
    pub canary_pct: f64,
    /// Traffic fraction sent to the candidate during the partial stage.
    pub partial_pct: f64,
    /// Number of recent runs considered in each KPI check.
    pub kpi_window: u32,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self { canary_pct: 0.05, partial_pct: 0.25, kpi_window: 200 }
    }
}

impl RolloutConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        validate_unit_interval("rollout.canary_pct", self.canary_pct)?;
        validate_unit_interval("rollout.partial_pct", self.partial_pct)?;
        if self.canary_pct >= self.partial_pct {
            return Err(ConfigError::Invalid("rollout.canary_pct must be less than rollout.partial_pct".to_string()));
        }
        if self.kpi_window == 0 {
            return Err(ConfigError::Invalid("rollout.kpi_window must be non-zero".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Gate
// ============================================================================

/// Thresholds the A/B Gate evaluates a shadow report against.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Minimum required success-rate uplift of candidate over active.
    pub min_success_uplift: f64,
    /// Maximum acceptable fractional cost increase.
    pub max_cost_increase: f64,
    /// Maximum acceptable fractional p95 latency increase.
    pub max_latency_increase_p95: f64,
    /// Minimum acceptable candidate evidence pass rate.
    pub min_evidence_pass_rate: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { min_success_uplift: 0.0, max_cost_increase: 0.05, max_latency_increase_p95: 0.10, min_evidence_pass_rate: 0.90 }
    }
}

impl GateConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        validate_unit_interval("gate.max_cost_increase", self.max_cost_increase)?;
        validate_unit_interval("gate.max_latency_increase_p95", self.max_latency_increase_p95)?;
        validate_unit_interval("gate.min_evidence_pass_rate", self.min_evidence_pass_rate)?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Policy Router overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Forces `pick_policy` to always return this policy id, bypassing
    /// traffic splitting. Read from the `active_policy_override`
    /// environment variable, not from the TOML file.
    #[serde(skip)]
    pub active_policy_override: Option<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { active_policy_override: env::var("ROUTER_ACTIVE_POLICY_OVERRIDE").ok() }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Artifact store location and retention.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory the filesystem artifact store writes under.
    pub root_dir: String,
    /// Maximum number of `RunSignal` entries retained in the rolling file.
    pub max_run_signals: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { root_dir: "./artifacts".to_string(), max_run_signals: 10_000 }
    }
}

impl StoreConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        validate_path_string("store.root_dir", &self.root_dir)?;
        if self.max_run_signals == 0 {
            return Err(ConfigError::Invalid("store.max_run_signals must be non-zero".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Working memory
// ============================================================================

/// Pattern decay and retention for Working Memory.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WorkingMemoryConfig {
    /// Multiplicative decay applied to each pattern's weight per tick.
    pub decay_factor: f64,
    /// Weight below which a decayed pattern is evicted.
    pub decay_threshold: f64,
    /// Maximum number of tracked patterns before the lowest-weight entries
    /// are evicted.
    pub max_patterns: u64,
}

impl Default for WorkingMemoryConfig {
    fn default() -> Self {
        Self { decay_factor: 0.95, decay_threshold: 0.01, max_patterns: 50_000 }
    }
}

impl WorkingMemoryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        validate_unit_interval("working_memory.decay_factor", self.decay_factor)?;
        validate_unit_interval("working_memory.decay_threshold", self.decay_threshold)?;
        if self.max_patterns == 0 {
            return Err(ConfigError::Invalid("working_memory.max_patterns must be non-zero".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Regression
// ============================================================================

/// Golden replay regression thresholds.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    /// Maximum number of replay items executed per candidate.
    pub suite_cap: u64,
    /// Fractional success-rate drop that fails regression.
    pub success_drop_threshold: f64,
    /// Fractional cost increase that fails regression.
    pub cost_increase_threshold: f64,
    /// Whether previously unseen failure modes are tolerated.
    pub allow_new_failure_modes: bool,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self { suite_cap: 100, success_drop_threshold: 0.10, cost_increase_threshold: 0.10, allow_new_failure_modes: false }
    }
}

impl RegressionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        validate_unit_interval("regression.success_drop_threshold", self.success_drop_threshold)?;
        if self.suite_cap == 0 {
            return Err(ConfigError::Invalid("regression.suite_cap must be non-zero".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Logging
// ============================================================================

/// Structured logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// The `tracing` filter directive applied at startup (e.g. `"info"`).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

// ============================================================================
// SECTION: RevolveConfig
// ============================================================================

/// The complete, validated configuration for one deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RevolveConfig {
    /// Training-trigger thresholds.
    pub learning: LearningConfig,
    /// Candidate-generation budget.
    pub exploration: ExplorationConfig,
    /// Rollout traffic fractions.
    pub rollout: RolloutConfig,
    /// A/B gate thresholds.
    pub gate: GateConfig,
    /// Policy Router overrides.
    pub router: RouterConfig,
    /// Artifact store location and retention.
    pub store: StoreConfig,
    /// Working memory decay and retention.
    pub working_memory: WorkingMemoryConfig,
    /// Golden replay regression thresholds.
    pub regression: RegressionConfig,
    /// Structured logging configuration.
    pub logging: LoggingConfig,
}

impl Default for RevolveConfig {
    fn default() -> Self {
        Self {
            learning: LearningConfig::default(),
            exploration: ExplorationConfig::default(),
            rollout: RolloutConfig::default(),
            gate: GateConfig::default(),
            router: RouterConfig::default(),
            store: StoreConfig::default(),
            working_memory: WorkingMemoryConfig::default(),
            regression: RegressionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RevolveConfig {
    /// Loads configuration using the default resolution rules: an explicit
    /// `path`, else the `REVOLVE_CONFIG` environment variable, else
    /// `revolve.toml` in the current directory. A missing file at the
    /// resolved default path is not an error: defaults apply.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a file exists at the resolved path but
    /// cannot be read, exceeds [`MAX_CONFIG_FILE_SIZE`], is not valid UTF-8
    /// or TOML, or fails bounds validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        if path.is_none() && !resolved.exists() {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }

        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes).map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self = toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section's bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if any section is out of bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.learning.validate()?;
        self.exploration.validate()?;
        self.rollout.validate()?;
        self.gate.validate()?;
        self.store.validate()?;
        self.working_memory.validate()?;
        self.regression.validate()?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from an explicit argument, the environment
/// override, or the default filename.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates that `value` lies in the closed interval `[0, 1]`.
fn validate_unit_interval(field: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Invalid(format!("{field} must be in [0, 1], got {value}")));
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "test-only helpers may panic on unexpected input"
)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config_validates() {
        let config = RevolveConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_with_no_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("does-not-exist.toml");
        let config = RevolveConfig::load(Some(&missing));
        assert!(matches!(config, Err(ConfigError::Io(_))));
    }

    #[test]
    fn load_parses_partial_overrides_and_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("revolve.toml");
        let mut file = fs::File::create(&path).expect("create");
        writeln!(file, "[learning]\nmin_runs = 10\n").expect("write");

        let config = RevolveConfig::load(Some(&path)).expect("load");
        assert_eq!(config.learning.min_runs, 10);
        assert!((config.learning.max_failure_rate - 0.15).abs() < f64::EPSILON);
    }

    #[test]
    fn validate_rejects_out_of_bounds_percentage() {
        let mut config = RevolveConfig::default();
        config.gate.max_cost_increase = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_canary_pct_not_below_partial_pct() {
        let mut config = RevolveConfig::default();
        config.rollout.canary_pct = 0.5;
        config.rollout.partial_pct = 0.25;
        assert!(config.validate().is_err());
    }
}
