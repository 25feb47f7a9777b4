//! Reference data and stored tables kept as JSON files in a data directory.
//!
//! | Path | Content |
//! |------|---------|
//! | `tramos/sii-2025-09.json` | [`BracketTableDocument`] for September 2025 |
//! | `2025/2025-09.json` | `{ "periodo", "utm", "uf": { "2025-09-01": 39383.07, .. } }` |
//!
//! The provider side only needs the `tramos` array of a bracket document, so
//! hand-written files may omit the metadata fields.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use iu_core::{
    BracketStore, BracketTable, BracketTableDocument, CurrencyUnitValues, Period, ProviderError,
    ReferenceDataProvider,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

const TABLES_DIR: &str = "tramos";
const TABLE_PREFIX: &str = "sii-";

#[derive(Debug, Deserialize)]
struct TableFile {
    tramos: BracketTable,
}

#[derive(Debug, Deserialize)]
struct UnitValuesFile {
    #[serde(with = "rust_decimal::serde::float")]
    utm: Decimal,
    #[serde(default)]
    uf: BTreeMap<NaiveDate, Decimal>,
}

/// File-backed [`ReferenceDataProvider`] and [`BracketStore`].
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tables_dir(&self) -> PathBuf {
        self.root.join(TABLES_DIR)
    }

    fn table_path(
        &self,
        period: Period,
    ) -> PathBuf {
        self.tables_dir().join(format!("{TABLE_PREFIX}{period}.json"))
    }

    fn unit_values_path(
        &self,
        period: Period,
    ) -> PathBuf {
        self.root
            .join(period.year().to_string())
            .join(format!("{period}.json"))
    }

    /// Reads and parses `path`, or `None` if the file does not exist.
    async fn read_json<T: DeserializeOwned>(
        &self,
        path: &Path,
    ) -> Result<Option<T>, ProviderError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(source_error(path, &e)),
        };
        debug!(path = %path.display(), "Read reference file");
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| ProviderError::InvalidData(format!("{}: {e}", path.display())))
    }
}

fn source_error(
    path: &Path,
    error: &io::Error,
) -> ProviderError {
    ProviderError::Source(format!("{}: {error}", path.display()))
}

/// Parses `sii-YYYY-MM.json`.
fn period_from_file_name(name: &str) -> Option<Period> {
    let stem = name.strip_prefix(TABLE_PREFIX)?.strip_suffix(".json")?;
    let (year, month) = stem.split_once('-')?;
    Period::new(year.parse().ok()?, month.parse().ok()?).ok()
}

#[async_trait]
impl ReferenceDataProvider for DirectoryStore {
    async fn bracket_table(
        &self,
        period: Period,
    ) -> Result<BracketTable, ProviderError> {
        self.read_json::<TableFile>(&self.table_path(period))
            .await?
            .map(|file| file.tramos)
            .ok_or(ProviderError::DataNotFound(period))
    }

    async fn currency_unit_values(
        &self,
        period: Period,
    ) -> Result<CurrencyUnitValues, ProviderError> {
        let file = self
            .read_json::<UnitValuesFile>(&self.unit_values_path(period))
            .await?
            .ok_or(ProviderError::DataNotFound(period))?;
        Ok(CurrencyUnitValues {
            period,
            uf: file.uf,
            utm: file.utm,
        })
    }
}

#[async_trait]
impl BracketStore for DirectoryStore {
    async fn get(
        &self,
        period: Period,
    ) -> Result<Option<BracketTableDocument>, ProviderError> {
        self.read_json(&self.table_path(period)).await
    }

    async fn put(
        &self,
        period: Period,
        document: BracketTableDocument,
    ) -> Result<(), ProviderError> {
        let dir = self.tables_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| source_error(&dir, &e))?;

        let path = self.table_path(period);
        let json = serde_json::to_vec_pretty(&document)
            .map_err(|e| ProviderError::InvalidData(e.to_string()))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| source_error(&path, &e))
    }

    async fn remove(
        &self,
        period: Period,
    ) -> Result<bool, ProviderError> {
        let path = self.table_path(period);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(source_error(&path, &e)),
        }
    }

    async fn periods(&self) -> Result<Vec<Period>, ProviderError> {
        let dir = self.tables_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(source_error(&dir, &e)),
        };

        let mut periods = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| source_error(&dir, &e))?
        {
            if let Some(period) = entry.file_name().to_str().and_then(period_from_file_name) {
                periods.push(period);
            }
        }
        Ok(periods)
    }
}

#[cfg(test)]
mod tests {
    use iu_core::reference_bracket_table;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;

    fn september() -> Period {
        Period::new(2025, 9).unwrap()
    }

    fn store() -> (tempfile::TempDir, DirectoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn file_names_map_to_periods() {
        assert_eq!(period_from_file_name("sii-2025-09.json"), Some(september()));
        assert_eq!(period_from_file_name("sii-2025-13.json"), None);
        assert_eq!(period_from_file_name("2025-09.json"), None);
        assert_eq!(period_from_file_name("sii-2025-09.json.bak"), None);
    }

    #[test]
    fn paths_follow_directory_layout() {
        let store = DirectoryStore::new("data");

        assert_eq!(
            store.table_path(september()),
            PathBuf::from("data/tramos/sii-2025-09.json")
        );
        assert_eq!(
            store.unit_values_path(september()),
            PathBuf::from("data/2025/2025-09.json")
        );
    }

    #[tokio::test]
    async fn put_get_and_list() {
        let (_dir, store) = store();
        let document = BracketTableDocument::new(september(), reference_bracket_table(), None);

        store.put(september(), document.clone()).await.unwrap();

        assert_eq!(store.get(september()).await.unwrap(), Some(document));
        assert_eq!(store.periods().await.unwrap(), vec![september()]);
        assert_eq!(
            store.bracket_table(september()).await,
            Ok(reference_bracket_table())
        );
    }

    #[tokio::test]
    async fn missing_files_are_not_errors_for_the_store() {
        let (_dir, store) = store();

        assert_eq!(store.get(september()).await, Ok(None));
        assert_eq!(store.remove(september()).await, Ok(false));
        assert_eq!(store.periods().await, Ok(Vec::new()));
    }

    #[tokio::test]
    async fn missing_files_are_data_not_found_for_the_provider() {
        let (_dir, store) = store();

        assert_eq!(
            store.bracket_table(september()).await,
            Err(ProviderError::DataNotFound(september()))
        );
        assert_eq!(
            store.currency_unit_values(september()).await,
            Err(ProviderError::DataNotFound(september()))
        );
    }

    #[tokio::test]
    async fn remove_deletes_the_file() {
        let (_dir, store) = store();
        let document = BracketTableDocument::new(september(), reference_bracket_table(), None);
        store.put(september(), document).await.unwrap();

        assert_eq!(store.remove(september()).await, Ok(true));
        assert_eq!(store.get(september()).await, Ok(None));
    }

    #[tokio::test]
    async fn reads_unit_values_file() {
        let (dir, store) = store();
        std::fs::create_dir_all(dir.path().join("2025")).unwrap();
        std::fs::write(
            dir.path().join("2025/2025-09.json"),
            r#"{"periodo": "2025-09", "utm": 69265,
                "uf": {"2025-09-01": 39383.07, "2025-09-02": 39385.42}}"#,
        )
        .unwrap();

        let values = store.currency_unit_values(september()).await.unwrap();

        assert_eq!(values.period, september());
        assert_eq!(values.utm, dec!(69265));
        assert_eq!(
            values.uf_on(NaiveDate::from_ymd_opt(2025, 9, 2).unwrap()),
            Some(dec!(39385.42))
        );
    }

    #[tokio::test]
    async fn provider_accepts_bare_tramos_document() {
        let (dir, store) = store();
        std::fs::create_dir_all(dir.path().join("tramos")).unwrap();
        std::fs::write(
            dir.path().join("tramos/sii-2025-09.json"),
            r#"{"tramos": [
                {"numero": 1, "desde": 0, "hasta": 100, "factor": 0, "rebaja": 0},
                {"numero": 2, "desde": 100.01, "hasta": "Y MÁS", "factor": 0.04, "rebaja": 4}
            ]}"#,
        )
        .unwrap();

        let table = store.bracket_table(september()).await.unwrap();

        assert_eq!(table.len(), 2);
        assert!(matches!(
            store.get(september()).await,
            Err(ProviderError::InvalidData(_))
        ));
    }

    #[tokio::test]
    async fn malformed_json_is_invalid_data() {
        let (dir, store) = store();
        std::fs::create_dir_all(dir.path().join("tramos")).unwrap();
        std::fs::write(dir.path().join("tramos/sii-2025-09.json"), "{not json").unwrap();

        assert!(matches!(
            store.bracket_table(september()).await,
            Err(ProviderError::InvalidData(_))
        ));
    }
}
