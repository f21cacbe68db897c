//! # Database Crate
//!
//! This crate is the durable record of the engine's trading state: orders,
//! positions and the signal audit log.
//!
//! ## Architectural Principles
//!
//! - **Capability traits:** the engine depends only on `OrderStore`,
//!   `PositionStore` and `SignalStore` (bundled as `Store`), never on SQL.
//! - **Two backends:** `DbRepository` persists to PostgreSQL through a pooled
//!   `sqlx` connection; `MemoryStore` keeps everything in process for paper
//!   trading and tests.
//! - **Append-only signals:** signal rows are inserted once and never updated.
//!
//! ## Public API
//!
//! - `connect`: establishes the database connection pool.
//! - `run_migrations`: applies the embedded schema migrations.
//! - `DbRepository` / `MemoryStore`: the store implementations.
//! - `DbError`: the specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod memory;
pub mod repository;
pub mod store;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use memory::MemoryStore;
pub use repository::DbRepository;
pub use store::{OrderStore, PositionStore, SignalStore, Store};
