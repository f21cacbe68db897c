pub mod enums;
pub mod error;
pub mod lifecycle;
pub mod structs;

// Re-export the core types to provide a clean public API.
pub use enums::{OrderSide, OrderStatus, OrderType, PositionSide, SignalType, TimeInForce};
pub use error::CoreError;
pub use structs::{AccountInfo, Bar, Fill, Order, Position, Signal, Trade};
