pub mod admin;
pub mod calculations;
pub mod db;
pub mod defaults;
pub mod models;

pub use admin::{AdminError, BracketAdmin};
pub use db::{BracketStore, MemoryStore, ProviderError, ReferenceDataProvider};
pub use defaults::reference_bracket_table;
pub use models::*;
