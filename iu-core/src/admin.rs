//! Administrative edit flow for bracket tables.
//!
//! [`BracketAdmin`] is the only path by which an edited or imported table
//! reaches a [`BracketStore`]; every table is checked with
//! [`validate_structure`] first.

use std::collections::BTreeMap;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::calculations::{BracketViolation, validate_structure};
use crate::db::{BracketStore, ProviderError};
use crate::models::{BracketTable, BracketTableDocument, Period};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdminError {
    #[error("bracket table failed validation with {} violation(s)", .0.len())]
    Validation(Vec<BracketViolation>),

    #[error(transparent)]
    Store(#[from] ProviderError),
}

pub struct BracketAdmin<S> {
    store: S,
}

impl<S: BracketStore> BracketAdmin<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The table stored for `period`, if any.
    pub async fn load_period(
        &self,
        period: Period,
    ) -> Result<Option<BracketTableDocument>, AdminError> {
        Ok(self.store.get(period).await?)
    }

    /// Validates `table` and stores it for `period`.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Validation`] with every violation if the table
    /// is malformed; nothing is stored in that case.
    pub async fn save_period(
        &self,
        period: Period,
        table: BracketTable,
    ) -> Result<BracketTableDocument, AdminError> {
        let violations = validate_structure(&table);
        if !violations.is_empty() {
            warn!(
                period = %period,
                violations = violations.len(),
                "Rejected bracket table"
            );
            return Err(AdminError::Validation(violations));
        }

        let document = BracketTableDocument::new(period, table, Some(Utc::now()));
        self.store.put(period, document.clone()).await?;
        info!(period = %period, "Saved bracket table");
        Ok(document)
    }

    /// Stored periods, newest first.
    pub async fn saved_periods(&self) -> Result<Vec<Period>, AdminError> {
        let mut periods = self.store.periods().await?;
        periods.sort_unstable_by(|a, b| b.cmp(a));
        Ok(periods)
    }

    pub async fn delete_period(
        &self,
        period: Period,
    ) -> Result<bool, AdminError> {
        Ok(self.store.remove(period).await?)
    }

    /// Every stored document keyed by `YYYY_MM`.
    pub async fn export_all(&self) -> Result<BTreeMap<String, BracketTableDocument>, AdminError> {
        let mut exported = BTreeMap::new();
        for period in self.saved_periods().await? {
            if let Some(document) = self.store.get(period).await? {
                exported.insert(period.storage_key(), document);
            }
        }
        Ok(exported)
    }

    /// Stores every entry whose key names a valid period and whose table
    /// passes validation. Returns how many were imported.
    ///
    /// # Errors
    ///
    /// Only store failures abort the import; malformed entries are skipped.
    pub async fn import_all(
        &self,
        documents: BTreeMap<String, BracketTableDocument>,
    ) -> Result<usize, AdminError> {
        let mut imported = 0;
        for (key, document) in documents {
            let Some(period) = Period::from_storage_key(&key) else {
                warn!(key = %key, "Skipping import entry with invalid period key");
                continue;
            };
            match self.save_period(period, document.tramos).await {
                Ok(_) => imported += 1,
                Err(AdminError::Validation(_)) => {
                    warn!(key = %key, "Skipping import entry with invalid table");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(imported)
    }
}
