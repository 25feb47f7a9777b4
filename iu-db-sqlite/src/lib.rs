//! SQLite storage for bracket tables and currency unit values.

mod decimal;
mod store;

pub use store::SqliteStore;
