use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::PathBuf;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub risk_management: RiskManagement,
    pub engine: EngineSettings,
    #[serde(default)]
    pub simulation: Simulation,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Strategy instances, resolved in this order at engine startup.
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
}

/// Pre-trade risk thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskManagement {
    /// Maximum fraction of equity allowed in a single symbol (e.g., 0.10 for 10%).
    pub max_position_pct: Decimal,
    /// Loss, as a fraction of day-start equity, at which all new orders are refused.
    pub max_daily_loss_pct: Decimal,
    /// Which P&L figure the daily loss breaker compares against its threshold.
    #[serde(default)]
    pub daily_loss_basis: DailyLossBasis,
    /// Offset from UTC, in hours, used to decide which session date "today" is.
    /// -5 approximates US Eastern standard time.
    #[serde(default)]
    pub session_utc_offset_hours: i32,
}

/// How "current-day P&L" is measured for the loss breaker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DailyLossBasis {
    /// `equity - day_start_equity`: realized plus unrealized.
    #[default]
    Equity,
    /// Only the realized P&L the venue reports for the session.
    Realized,
}

/// Orchestrator settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// The tradable universe. Orders for any other symbol fail validation.
    pub symbols: Vec<String>,
    /// Upper bound on any single broker call.
    #[serde(default = "default_broker_timeout_ms")]
    pub broker_timeout_ms: u64,
    /// Capacity of each strategy's market-data channel and of the signal channel.
    #[serde(default = "default_report_buffer")]
    pub report_buffer: usize,
}

fn default_broker_timeout_ms() -> u64 {
    5_000
}

fn default_report_buffer() -> usize {
    1_024
}

/// Parameters for the paper-trading venue.
#[derive(Debug, Clone, Deserialize)]
pub struct Simulation {
    pub initial_cash: Decimal,
    /// Fill market orders at the last known price as soon as they are accepted.
    #[serde(default = "default_true")]
    pub fill_on_submit: bool,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            initial_cash: dec!(100000),
            fill_on_submit: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// When set, logs are also written to a daily-rolling file in this directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            directory: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string. Without one the engine keeps state in memory.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

/// One configured strategy instance.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// Registry name of the strategy implementation (e.g., "ma_crossover").
    pub name: String,
    /// Unique instance id recorded on signals and orders. Defaults to `name:symbol`.
    #[serde(default)]
    pub id: Option<String>,
    pub symbol: String,
    /// Base order size; scaled by the absolute signal strength.
    pub order_qty: Decimal,
    /// Implementation-specific parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl StrategyConfig {
    pub fn instance_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.name, self.symbol))
    }
}
