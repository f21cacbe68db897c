use crate::error::ConfigError;
use rust_decimal::Decimal;
use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use logging::init_tracing;
pub use settings::{
    Config, DailyLossBasis, DatabaseConfig, EngineSettings, LogFormat, LoggingConfig,
    RiskManagement, Simulation, StrategyConfig,
};

/// Environment variables with this prefix override file values, using `__` as the
/// nesting separator: `HELM__RISK_MANAGEMENT__MAX_POSITION_PCT=0.05`.
pub const ENV_PREFIX: &str = "HELM";

/// Loads the application configuration from a TOML file plus environment overrides.
///
/// The file is deserialized into the strongly-typed `Config` struct and then
/// validated; an invalid configuration never reaches the engine.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from(path.as_ref()))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let config = builder.try_deserialize::<Config>()?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Checks cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let risk = &self.risk_management;
        if risk.max_position_pct <= Decimal::ZERO || risk.max_position_pct > Decimal::ONE {
            return Err(ConfigError::ValidationError(
                "max_position_pct must be in (0, 1]".to_string(),
            ));
        }
        if risk.max_daily_loss_pct <= Decimal::ZERO || risk.max_daily_loss_pct >= Decimal::ONE {
            return Err(ConfigError::ValidationError(
                "max_daily_loss_pct must be in (0, 1)".to_string(),
            ));
        }
        if !(-12..=14).contains(&risk.session_utc_offset_hours) {
            return Err(ConfigError::ValidationError(
                "session_utc_offset_hours must be between -12 and 14".to_string(),
            ));
        }
        if self.engine.broker_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "broker_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.engine.report_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "report_buffer must be greater than 0".to_string(),
            ));
        }
        for strategy in &self.strategies {
            if !self.engine.symbols.contains(&strategy.symbol) {
                return Err(ConfigError::ValidationError(format!(
                    "strategy '{}' trades '{}', which is not in engine.symbols",
                    strategy.name, strategy.symbol
                )));
            }
            if strategy.order_qty <= Decimal::ZERO {
                return Err(ConfigError::ValidationError(format!(
                    "strategy '{}' must have a positive order_qty",
                    strategy.name
                )));
            }
        }
        Ok(())
    }
}
