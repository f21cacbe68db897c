use crate::error::StrategyError;
use crate::{Strategy, StrategyContext};
use core_types::{Bar, Signal, SignalType, Trade};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::VecDeque;

/// Parameters for the moving-average crossover strategy.
#[derive(Debug, Clone, Deserialize)]
pub struct MACrossoverParams {
    #[serde(default = "default_short_period")]
    pub short_period: usize,
    #[serde(default = "default_long_period")]
    pub long_period: usize,
}

fn default_short_period() -> usize {
    10
}

fn default_long_period() -> usize {
    30
}

impl Default for MACrossoverParams {
    fn default() -> Self {
        Self {
            short_period: default_short_period(),
            long_period: default_long_period(),
        }
    }
}

/// The simple moving-average crossover strategy.
///
/// Keeps the last `long_period` closes. Once the window is full it compares the
/// sign of `short SMA - long SMA` against the previous bar's: a move from `<= 0`
/// to `> 0` is a buy (strength 1.0), a move from `>= 0` to `< 0` is a sell
/// (strength -1.0). Trade prints never produce signals.
pub struct MACrossover {
    instance_id: String,
    symbol: String,
    short_period: usize,
    long_period: usize,
    closes: VecDeque<Decimal>,
    // The previous bar's `short - long` difference, once the window was full.
    prev_diff: Option<Decimal>,
}

impl MACrossover {
    pub const NAME: &'static str = "ma_crossover";

    /// Creates a new `MACrossover` instance with the given parameters.
    ///
    /// It performs validation to ensure the periods are logical.
    pub fn new(
        params: MACrossoverParams,
        instance_id: String,
        symbol: String,
    ) -> Result<Self, StrategyError> {
        if params.short_period == 0 {
            return Err(StrategyError::InvalidParameters(
                "Short MA period must be greater than zero".to_string(),
            ));
        }
        if params.short_period >= params.long_period {
            return Err(StrategyError::InvalidParameters(
                "Short MA period must be less than Long MA period".to_string(),
            ));
        }

        Ok(Self {
            instance_id,
            symbol,
            short_period: params.short_period,
            long_period: params.long_period,
            closes: VecDeque::new(),
            prev_diff: None,
        })
    }

    /// Builds an instance from registry context; missing parameters take defaults.
    pub fn from_context(ctx: &StrategyContext) -> Result<Self, StrategyError> {
        let params = if ctx.params.is_null() {
            MACrossoverParams::default()
        } else {
            serde_json::from_value(ctx.params.clone())
                .map_err(|e| StrategyError::InvalidParameters(e.to_string()))?
        };
        Self::new(params, ctx.instance_id.clone(), ctx.symbol.clone())
    }

    fn sma(&self, period: usize) -> Decimal {
        let sum: Decimal = self.closes.iter().rev().take(period).sum();
        sum / Decimal::from(period as u64)
    }

    fn crossover_signal(&self, bar: &Bar, diff: Decimal, short_sma: Decimal, long_sma: Decimal) -> Option<Signal> {
        let prev = self.prev_diff?;

        let (signal_type, strength) = if prev <= Decimal::ZERO && diff > Decimal::ZERO {
            (SignalType::Buy, dec!(1.0))
        } else if prev >= Decimal::ZERO && diff < Decimal::ZERO {
            (SignalType::Sell, dec!(-1.0))
        } else {
            return None;
        };

        Some(
            Signal::new(&self.instance_id, &self.symbol, signal_type, strength, bar.timestamp)
                .with_metadata("short_sma", short_sma.round_dp(8).to_string())
                .with_metadata("long_sma", long_sma.round_dp(8).to_string())
                .with_metadata("close", bar.close.to_string()),
        )
    }
}

impl Strategy for MACrossover {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn init(&mut self, ctx: &StrategyContext) -> Result<(), StrategyError> {
        if ctx.symbol != self.symbol {
            return Err(StrategyError::InvalidParameters(format!(
                "instance built for {} but initialized for {}",
                self.symbol, ctx.symbol
            )));
        }
        self.closes = VecDeque::with_capacity(self.long_period + 1);
        self.prev_diff = None;
        Ok(())
    }

    fn on_bar(&mut self, bar: &Bar) -> Result<Vec<Signal>, StrategyError> {
        if bar.symbol != self.symbol {
            tracing::warn!(instance = %self.instance_id, symbol = %bar.symbol, "Ignoring bar for foreign symbol");
            return Ok(Vec::new());
        }

        self.closes.push_back(bar.close);
        if self.closes.len() > self.long_period {
            self.closes.pop_front();
        }
        if self.closes.len() < self.long_period {
            return Ok(Vec::new());
        }

        let short_sma = self.sma(self.short_period);
        let long_sma = self.sma(self.long_period);
        let diff = short_sma - long_sma;

        let signal = self.crossover_signal(bar, diff, short_sma, long_sma);
        self.prev_diff = Some(diff);

        if let Some(signal) = &signal {
            tracing::debug!(
                instance = %self.instance_id,
                signal = %signal.signal_type,
                %short_sma,
                %long_sma,
                "MACrossover: crossover detected"
            );
        }

        Ok(signal.into_iter().collect())
    }

    fn on_trade(&mut self, _trade: &Trade) -> Result<Vec<Signal>, StrategyError> {
        // This strategy operates on bars only.
        Ok(Vec::new())
    }
}
