//! Copies reference data from a data directory into a SQLite database.

use iu_core::{AdminError, BracketAdmin, BracketStore, ProviderError, ReferenceDataProvider};
use iu_db_sqlite::SqliteStore;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::directory::DirectoryStore;

/// Counts reported by [`sync_directory`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub tables: usize,
    pub unit_values: usize,
    /// Periods whose table could not be read or failed validation.
    pub skipped_tables: usize,
}

/// Copies every stored bracket table and the matching unit values from
/// `directory` into `database`.
///
/// Tables go through [`BracketAdmin::save_period`], so malformed tables are
/// logged and skipped rather than persisted.
///
/// # Errors
///
/// Returns [`AdminError::Store`] when either store fails to read or write.
pub async fn sync_directory(
    directory: &DirectoryStore,
    database: &SqliteStore,
) -> Result<SyncSummary, AdminError> {
    let admin = BracketAdmin::new(database.clone());
    let mut summary = SyncSummary::default();

    for period in directory.periods().await? {
        match directory.get(period).await {
            Ok(Some(document)) => match admin.save_period(period, document.tramos).await {
                Ok(_) => summary.tables += 1,
                Err(AdminError::Validation(violations)) => {
                    warn!(
                        period = %period,
                        violations = violations.len(),
                        "Skipping invalid bracket table"
                    );
                    summary.skipped_tables += 1;
                }
                Err(error) => return Err(error),
            },
            Ok(None) => {}
            Err(ProviderError::InvalidData(reason)) => {
                warn!(period = %period, reason = %reason, "Skipping unreadable bracket table");
                summary.skipped_tables += 1;
            }
            Err(error) => return Err(error.into()),
        }

        match directory.currency_unit_values(period).await {
            Ok(values) => {
                database.put_unit_values(&values).await?;
                summary.unit_values += 1;
            }
            Err(ProviderError::DataNotFound(_)) => {
                debug!(period = %period, "No unit values to copy");
            }
            Err(ProviderError::InvalidData(reason)) => {
                warn!(period = %period, reason = %reason, "Skipping unreadable unit values");
            }
            Err(error) => return Err(error.into()),
        }
    }

    info!(
        tables = summary.tables,
        unit_values = summary.unit_values,
        skipped = summary.skipped_tables,
        "Synced data directory"
    );
    Ok(summary)
}
