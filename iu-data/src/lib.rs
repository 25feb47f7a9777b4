//! File-backed collaborators, loaders and the directory-to-database sync
//! for `iu-core`.

pub mod amount;
pub mod directory;
pub mod loader;
pub mod logging;
pub mod sync;

pub use amount::{AmountError, parse_amount, parse_rate};
pub use directory::DirectoryStore;
pub use loader::{BracketLoaderError, BracketRecord, BracketTableLoader, PeriodTable};
pub use logging::init_logging;
pub use sync::{SyncSummary, sync_directory};
