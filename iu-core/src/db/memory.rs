use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::provider::{ProviderError, ReferenceDataProvider};
use super::store::BracketStore;
use crate::models::{BracketTable, BracketTableDocument, CurrencyUnitValues, Period};

/// In-process store and provider backed by ordered maps.
///
/// Suitable for tests and for short-lived sessions that import data from
/// files without persisting it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<BTreeMap<Period, BracketTableDocument>>,
    unit_values: RwLock<BTreeMap<Period, CurrencyUnitValues>>,
}

fn poisoned<T>(_: T) -> ProviderError {
    ProviderError::Source("memory store lock poisoned".to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the unit values for their period, replacing earlier ones.
    pub fn insert_unit_values(
        &self,
        values: CurrencyUnitValues,
    ) -> Result<(), ProviderError> {
        self.unit_values
            .write()
            .map_err(poisoned)?
            .insert(values.period, values);
        Ok(())
    }
}

#[async_trait]
impl BracketStore for MemoryStore {
    async fn get(
        &self,
        period: Period,
    ) -> Result<Option<BracketTableDocument>, ProviderError> {
        Ok(self.documents.read().map_err(poisoned)?.get(&period).cloned())
    }

    async fn put(
        &self,
        period: Period,
        document: BracketTableDocument,
    ) -> Result<(), ProviderError> {
        self.documents
            .write()
            .map_err(poisoned)?
            .insert(period, document);
        Ok(())
    }

    async fn remove(
        &self,
        period: Period,
    ) -> Result<bool, ProviderError> {
        Ok(self
            .documents
            .write()
            .map_err(poisoned)?
            .remove(&period)
            .is_some())
    }

    async fn periods(&self) -> Result<Vec<Period>, ProviderError> {
        Ok(self.documents.read().map_err(poisoned)?.keys().copied().collect())
    }
}

#[async_trait]
impl ReferenceDataProvider for MemoryStore {
    async fn bracket_table(
        &self,
        period: Period,
    ) -> Result<BracketTable, ProviderError> {
        self.get(period)
            .await?
            .map(|document| document.tramos)
            .ok_or(ProviderError::DataNotFound(period))
    }

    async fn currency_unit_values(
        &self,
        period: Period,
    ) -> Result<CurrencyUnitValues, ProviderError> {
        self.unit_values
            .read()
            .map_err(poisoned)?
            .get(&period)
            .cloned()
            .ok_or(ProviderError::DataNotFound(period))
    }
}
