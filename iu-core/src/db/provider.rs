use async_trait::async_trait;
use thiserror::Error;

use crate::models::{BracketTable, CurrencyUnitValues, Period};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("no reference data for {0}")]
    DataNotFound(Period),

    #[error("invalid reference data: {0}")]
    InvalidData(String),

    #[error("data source error: {0}")]
    Source(String),
}

/// Supplies the bracket table and unit values published for a period.
#[async_trait]
pub trait ReferenceDataProvider: Send + Sync {
    async fn bracket_table(
        &self,
        period: Period,
    ) -> Result<BracketTable, ProviderError>;

    async fn currency_unit_values(
        &self,
        period: Period,
    ) -> Result<CurrencyUnitValues, ProviderError>;
}
