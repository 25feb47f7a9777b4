use async_trait::async_trait;

use super::provider::ProviderError;
use crate::models::{BracketTableDocument, Period};

/// Key-value storage for administratively edited bracket tables, one
/// document per period.
#[async_trait]
pub trait BracketStore: Send + Sync {
    async fn get(
        &self,
        period: Period,
    ) -> Result<Option<BracketTableDocument>, ProviderError>;

    /// Inserts or replaces the document for `period`.
    async fn put(
        &self,
        period: Period,
        document: BracketTableDocument,
    ) -> Result<(), ProviderError>;

    /// Returns whether a document was removed.
    async fn remove(
        &self,
        period: Period,
    ) -> Result<bool, ProviderError>;

    /// Every period with a stored document, in no particular order.
    async fn periods(&self) -> Result<Vec<Period>, ProviderError>;
}
