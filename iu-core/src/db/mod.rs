pub mod memory;
pub mod provider;
pub mod store;

pub use memory::MemoryStore;
pub use provider::{ProviderError, ReferenceDataProvider};
pub use store::BracketStore;
