use core_types::{Fill, Position};
use dashmap::DashMap;
use rust_decimal::Decimal;

/// The engine's in-memory position table and last-price cache.
///
/// One `Position` per symbol. Readers get cloned snapshots and never wait on
/// the reconciler; a flat position is removed from the table.
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: DashMap<String, Position>,
    last_prices: DashMap<String, Decimal>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the table with positions loaded from the store or the venue.
    pub fn load(&self, positions: Vec<Position>) {
        self.positions.clear();
        for position in positions.into_iter().filter(|p| !p.is_flat()) {
            self.positions.insert(position.symbol.clone(), position);
        }
    }

    /// Applies one incremental fill.
    ///
    /// Returns the resulting position (flat when the fill closed it out) and the
    /// realized P&L of any quantity it closed.
    pub fn apply_fill(&self, symbol: &str, fill: &Fill) -> (Position, Decimal) {
        self.last_prices.insert(symbol.to_string(), fill.price);

        let (position, realized) = match self.positions.get_mut(symbol) {
            Some(mut entry) => {
                let realized = entry.apply_fill(fill);
                (entry.clone(), realized)
            }
            None => (Position::open(symbol, fill), Decimal::ZERO),
        };

        if position.is_flat() {
            self.positions.remove(symbol);
        } else {
            self.positions.insert(symbol.to_string(), position.clone());
        }
        (position, realized)
    }

    /// Records the latest market price and re-marks the symbol's position.
    pub fn mark(&self, symbol: &str, price: Decimal) -> Option<Position> {
        self.last_prices.insert(symbol.to_string(), price);
        self.positions.get_mut(symbol).map(|mut p| {
            p.mark(price);
            p.clone()
        })
    }

    pub fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.last_prices.get(symbol).map(|p| *p)
    }

    /// Signed market value of the symbol's position, zero when flat.
    pub fn market_value(&self, symbol: &str) -> Decimal {
        self.positions
            .get(symbol)
            .map_or(Decimal::ZERO, |p| p.market_value)
    }

    pub fn get(&self, symbol: &str) -> Option<Position> {
        self.positions.get(symbol).map(|p| p.clone())
    }

    /// All open positions, sorted by symbol.
    pub fn snapshot(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.positions.iter().map(|p| p.value().clone()).collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }
}
