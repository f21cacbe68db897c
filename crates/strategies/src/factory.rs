use crate::error::StrategyError;
use crate::ma_crossover::MACrossover;
use crate::{Strategy, StrategyContext};
use configuration::StrategyConfig;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;

/// Builds a fresh, uninitialized strategy from its context.
pub type StrategyFactory =
    Box<dyn Fn(&StrategyContext) -> Result<Box<dyn Strategy>, StrategyError> + Send + Sync>;

/// A name-keyed collection of strategy factories.
///
/// Populated once at startup and then only read, so it is shared by plain reference.
#[derive(Default)]
pub struct StrategyRegistry {
    factories: HashMap<String, StrategyFactory>,
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.list())
            .finish()
    }
}

/// A resolved, initialized strategy ready to be driven by the pipeline.
pub struct StrategyInstance {
    pub id: String,
    pub symbol: String,
    /// Base order size for this instance's signals.
    pub order_qty: Decimal,
    pub strategy: Box<dyn Strategy>,
}

impl fmt::Debug for StrategyInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyInstance")
            .field("id", &self.id)
            .field("symbol", &self.symbol)
            .field("strategy", &self.strategy.name())
            .finish()
    }
}

impl StrategyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with every built-in strategy.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let ma_crossover: StrategyFactory = Box::new(|ctx: &StrategyContext| {
            Ok(Box::new(MACrossover::from_context(ctx)?) as Box<dyn Strategy>)
        });
        registry
            .factories
            .insert(MACrossover::NAME.to_string(), ma_crossover);
        registry
    }

    /// Adds a factory under `name`. Names are unique.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<(), StrategyError>
    where
        F: Fn(&StrategyContext) -> Result<Box<dyn Strategy>, StrategyError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(StrategyError::DuplicateStrategy(name));
        }
        self.factories.insert(name, Box::new(factory));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// All registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Builds and initializes one instance of the strategy registered under `name`.
    pub fn create(&self, name: &str, ctx: &StrategyContext) -> Result<Box<dyn Strategy>, StrategyError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| StrategyError::StrategyNotFound(name.to_string()))?;

        let mut strategy = factory(ctx)?;
        strategy.init(ctx).map_err(|e| StrategyError::InitFailed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(strategy)
    }

    /// Resolves the configured strategy list, in order.
    ///
    /// Fails on the first unknown name so a misconfiguration stops startup
    /// rather than surfacing at runtime.
    pub fn resolve(&self, configs: &[StrategyConfig]) -> Result<Vec<StrategyInstance>, StrategyError> {
        configs
            .iter()
            .map(|cfg| {
                let ctx = StrategyContext {
                    instance_id: cfg.instance_id(),
                    symbol: cfg.symbol.clone(),
                    params: cfg.params.clone(),
                };
                let strategy = self.create(&cfg.name, &ctx)?;
                tracing::info!(strategy = %cfg.name, instance = %ctx.instance_id, symbol = %cfg.symbol, "Strategy resolved");
                Ok(StrategyInstance {
                    id: ctx.instance_id,
                    symbol: cfg.symbol.clone(),
                    order_qty: cfg.order_qty,
                    strategy,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{Bar, Signal, Trade};
    use rust_decimal_macros::dec;
    use serde_json::json;

    struct Silent;

    impl Strategy for Silent {
        fn name(&self) -> &str {
            "silent"
        }
        fn init(&mut self, _ctx: &StrategyContext) -> Result<(), StrategyError> {
            Ok(())
        }
        fn on_bar(&mut self, _bar: &Bar) -> Result<Vec<Signal>, StrategyError> {
            Ok(Vec::new())
        }
        fn on_trade(&mut self, _trade: &Trade) -> Result<Vec<Signal>, StrategyError> {
            Ok(Vec::new())
        }
    }

    fn config(name: &str) -> StrategyConfig {
        StrategyConfig {
            name: name.to_string(),
            id: None,
            symbol: "AAPL".to_string(),
            order_qty: dec!(5),
            params: json!({ "short_period": 2, "long_period": 4 }),
        }
    }

    #[test]
    fn list_is_sorted() {
        let mut registry = StrategyRegistry::with_builtins();
        registry.register("alpha", |_: &StrategyContext| Ok(Box::new(Silent) as Box<dyn Strategy>)).unwrap();
        assert_eq!(registry.list(), vec!["alpha".to_string(), "ma_crossover".to_string()]);
    }

    #[test]
    fn duplicate_names_are_refused() {
        let mut registry = StrategyRegistry::with_builtins();
        let result = registry.register("ma_crossover", |_: &StrategyContext| Ok(Box::new(Silent) as Box<dyn Strategy>));
        assert!(matches!(result, Err(StrategyError::DuplicateStrategy(_))));
    }

    #[test]
    fn resolve_preserves_configured_order() {
        let mut registry = StrategyRegistry::with_builtins();
        registry.register("silent", |_: &StrategyContext| Ok(Box::new(Silent) as Box<dyn Strategy>)).unwrap();

        let instances = registry.resolve(&[config("silent"), config("ma_crossover")]).unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].id, "silent:AAPL");
        assert_eq!(instances[1].strategy.name(), "ma_crossover");
        assert_eq!(instances[1].order_qty, dec!(5));
    }

    #[test]
    fn unknown_name_fails_resolution() {
        let registry = StrategyRegistry::with_builtins();
        let result = registry.resolve(&[config("ma_crossover"), config("does_not_exist")]);
        assert!(matches!(result, Err(StrategyError::StrategyNotFound(name)) if name == "does_not_exist"));
    }
}
