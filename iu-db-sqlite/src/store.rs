use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use iu_core::{
    Bound, Bracket, BracketStore, BracketTable, BracketTableDocument, CurrencyUnitValues,
    MaxEffectiveRate, Period, ProviderError, ReferenceDataProvider,
};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use tracing::debug;

use crate::decimal::{get_decimal, get_optional_decimal};

fn database_error(e: sqlx::Error) -> ProviderError {
    ProviderError::Source(e.to_string())
}

/// SQLite-backed [`BracketStore`] and [`ReferenceDataProvider`].
///
/// Tables are keyed by [`Period::storage_key`]. Amounts are stored as
/// decimal text so a table reads back exactly as it was saved.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> Result<Self, ProviderError> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| ProviderError::Source(format!("{database_url}: {e}")))?;
        Ok(Self { pool })
    }

    pub async fn new_with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), ProviderError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ProviderError::Source(e.to_string()))?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Replaces the UF and UTM values stored for `values.period`.
    pub async fn put_unit_values(
        &self,
        values: &CurrencyUnitValues,
    ) -> Result<(), ProviderError> {
        let key = values.period.storage_key();
        let mut tx = self.pool.begin().await.map_err(database_error)?;

        sqlx::query("DELETE FROM uf_value WHERE period_key = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(database_error)?;
        sqlx::query(
            "INSERT INTO unit_values (period_key, utm) VALUES (?, ?)
             ON CONFLICT (period_key) DO UPDATE SET utm = excluded.utm",
        )
        .bind(&key)
        .bind(values.utm.to_string())
        .execute(&mut *tx)
        .await
        .map_err(database_error)?;

        for (date, value) in &values.uf {
            sqlx::query(
                "INSERT INTO uf_value (fecha, period_key, valor) VALUES (?, ?, ?)
                 ON CONFLICT (fecha) DO UPDATE SET
                    period_key = excluded.period_key, valor = excluded.valor",
            )
            .bind(*date)
            .bind(&key)
            .bind(value.to_string())
            .execute(&mut *tx)
            .await
            .map_err(database_error)?;
        }

        tx.commit().await.map_err(database_error)
    }

    async fn brackets(
        &self,
        period: Period,
    ) -> Result<Vec<Bracket>, ProviderError> {
        let rows = sqlx::query(
            "SELECT numero, desde, hasta, factor, rebaja, tasa_efectiva_max
             FROM bracket WHERE period_key = ? ORDER BY numero",
        )
        .bind(period.storage_key())
        .fetch_all(&self.pool)
        .await
        .map_err(database_error)?;

        rows.iter().map(row_to_bracket).collect()
    }
}

fn row_to_bracket(row: &SqliteRow) -> Result<Bracket, ProviderError> {
    let numero: i64 = row.try_get("numero").map_err(database_error)?;
    let label: Option<String> = row.try_get("tasa_efectiva_max").map_err(database_error)?;

    Ok(Bracket {
        index: u32::try_from(numero)
            .map_err(|_| ProviderError::InvalidData(format!("bracket number {numero}")))?,
        lower_bound: get_decimal(row, "desde")?,
        upper_bound: get_optional_decimal(row, "hasta")?
            .map_or(Bound::Unbounded, Bound::from_amount),
        marginal_rate: get_decimal(row, "factor")?,
        deduction: get_decimal(row, "rebaja")?,
        max_effective_rate: label.as_deref().and_then(MaxEffectiveRate::parse),
    })
}

#[async_trait]
impl BracketStore for SqliteStore {
    async fn get(
        &self,
        period: Period,
    ) -> Result<Option<BracketTableDocument>, ProviderError> {
        let Some(row) = sqlx::query(
            "SELECT vigencia, periodo_label, moneda, saved_at
             FROM bracket_table WHERE period_key = ?",
        )
        .bind(period.storage_key())
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?
        else {
            return Ok(None);
        };

        Ok(Some(BracketTableDocument {
            vigencia: row.try_get::<NaiveDate, _>("vigencia").map_err(database_error)?,
            periodo_label: row.try_get("periodo_label").map_err(database_error)?,
            moneda: row.try_get("moneda").map_err(database_error)?,
            tramos: BracketTable::new(self.brackets(period).await?),
            saved_at: row
                .try_get::<Option<DateTime<Utc>>, _>("saved_at")
                .map_err(database_error)?,
        }))
    }

    async fn put(
        &self,
        period: Period,
        document: BracketTableDocument,
    ) -> Result<(), ProviderError> {
        let key = period.storage_key();
        let mut tx = self.pool.begin().await.map_err(database_error)?;

        sqlx::query("DELETE FROM bracket WHERE period_key = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(database_error)?;
        sqlx::query(
            "INSERT INTO bracket_table (period_key, vigencia, periodo_label, moneda, saved_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (period_key) DO UPDATE SET
                vigencia = excluded.vigencia,
                periodo_label = excluded.periodo_label,
                moneda = excluded.moneda,
                saved_at = excluded.saved_at",
        )
        .bind(&key)
        .bind(document.vigencia)
        .bind(&document.periodo_label)
        .bind(&document.moneda)
        .bind(document.saved_at)
        .execute(&mut *tx)
        .await
        .map_err(database_error)?;

        for bracket in &document.tramos {
            sqlx::query(
                "INSERT INTO bracket
                    (period_key, numero, desde, hasta, factor, rebaja, tasa_efectiva_max)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&key)
            .bind(i64::from(bracket.index))
            .bind(bracket.lower_bound.to_string())
            .bind(bracket.upper_bound.finite().map(|v| v.to_string()))
            .bind(bracket.marginal_rate.to_string())
            .bind(bracket.deduction.to_string())
            .bind(bracket.max_effective_rate.as_ref().map(|r| r.to_string()))
            .execute(&mut *tx)
            .await
            .map_err(database_error)?;
        }

        tx.commit().await.map_err(database_error)?;
        debug!(period = %period, brackets = document.tramos.len(), "Stored bracket table");
        Ok(())
    }

    async fn remove(
        &self,
        period: Period,
    ) -> Result<bool, ProviderError> {
        let key = period.storage_key();
        let mut tx = self.pool.begin().await.map_err(database_error)?;

        sqlx::query("DELETE FROM bracket WHERE period_key = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(database_error)?;
        let removed = sqlx::query("DELETE FROM bracket_table WHERE period_key = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(database_error)?
            .rows_affected();

        tx.commit().await.map_err(database_error)?;
        Ok(removed > 0)
    }

    async fn periods(&self) -> Result<Vec<Period>, ProviderError> {
        let rows = sqlx::query("SELECT period_key FROM bracket_table")
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)?;

        rows.iter()
            .map(|row| {
                let key: String = row.try_get("period_key").map_err(database_error)?;
                Period::from_storage_key(&key)
                    .ok_or_else(|| ProviderError::InvalidData(format!("period key '{key}'")))
            })
            .collect()
    }
}

#[async_trait]
impl ReferenceDataProvider for SqliteStore {
    async fn bracket_table(
        &self,
        period: Period,
    ) -> Result<BracketTable, ProviderError> {
        let brackets = self.brackets(period).await?;
        if brackets.is_empty() {
            return Err(ProviderError::DataNotFound(period));
        }
        Ok(BracketTable::new(brackets))
    }

    async fn currency_unit_values(
        &self,
        period: Period,
    ) -> Result<CurrencyUnitValues, ProviderError> {
        let key = period.storage_key();
        let row = sqlx::query("SELECT utm FROM unit_values WHERE period_key = ?")
            .bind(&key)
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?
            .ok_or(ProviderError::DataNotFound(period))?;
        let utm = get_decimal(&row, "utm")?;

        let uf_rows = sqlx::query("SELECT fecha, valor FROM uf_value WHERE period_key = ?")
            .bind(&key)
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)?;
        let mut uf = BTreeMap::new();
        for row in &uf_rows {
            let date: NaiveDate = row.try_get("fecha").map_err(database_error)?;
            uf.insert(date, get_decimal(row, "valor")?);
        }

        Ok(CurrencyUnitValues { period, uf, utm })
    }
}
