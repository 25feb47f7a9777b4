use std::str::FromStr;

use iu_core::ProviderError;
use rust_decimal::Decimal;
use sqlx::{Row, TypeInfo, ValueRef};

/// Get a decimal value from a row.
///
/// Amounts are written as TEXT; INTEGER and REAL are accepted for rows
/// inserted by hand.
pub fn get_decimal(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<Decimal, ProviderError> {
    let value_ref = row
        .try_get_raw(column)
        .map_err(|e| ProviderError::Source(format!("Column '{column}' not found: {e}")))?;

    let type_info = value_ref.type_info();
    let type_name = type_info.name();

    match type_name {
        "TEXT" => {
            let val: String = row.try_get(column).map_err(|e| {
                ProviderError::Source(format!("Failed to get TEXT from '{column}': {e}"))
            })?;
            Decimal::from_str(val.trim()).map_err(|e| {
                ProviderError::InvalidData(format!("'{val}' in column '{column}': {e}"))
            })
        }
        "INTEGER" => {
            let val: i64 = row.try_get(column).map_err(|e| {
                ProviderError::Source(format!("Failed to get INTEGER from '{column}': {e}"))
            })?;
            Ok(Decimal::from(val))
        }
        "REAL" => {
            let val: f64 = row.try_get(column).map_err(|e| {
                ProviderError::Source(format!("Failed to get REAL from '{column}': {e}"))
            })?;
            Decimal::try_from(val).map_err(|e| {
                ProviderError::InvalidData(format!("Failed to convert {val} to Decimal: {e}"))
            })
        }
        _ => Err(ProviderError::InvalidData(format!(
            "Unexpected type '{type_name}' for column '{column}'"
        ))),
    }
}

/// Get an optional decimal value from a row, returning None for NULL values.
pub fn get_optional_decimal(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<Option<Decimal>, ProviderError> {
    let value_ref = row
        .try_get_raw(column)
        .map_err(|e| ProviderError::Source(format!("Column '{column}' not found: {e}")))?;

    if value_ref.is_null() {
        return Ok(None);
    }

    get_decimal(row, column).map(Some)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;

    async fn setup_test_db() -> sqlx::sqlite::SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");
        sqlx::query(
            "CREATE TABLE test_decimals (
                id INTEGER PRIMARY KEY,
                text_value TEXT,
                int_value INTEGER,
                real_value REAL,
                blob_value BLOB
            )",
        )
        .execute(&pool)
        .await
        .expect("Failed to create test table");
        pool
    }

    async fn fetch(
        pool: &sqlx::sqlite::SqlitePool,
        insert: &str,
        column: &str,
    ) -> sqlx::sqlite::SqliteRow {
        sqlx::query(insert)
            .execute(pool)
            .await
            .expect("Failed to insert test data");
        sqlx::query(&format!("SELECT {column} FROM test_decimals WHERE id = 1"))
            .fetch_one(pool)
            .await
            .expect("Failed to fetch row")
    }

    #[tokio::test]
    async fn test_get_decimal_from_text_keeps_scale() {
        let pool = setup_test_db().await;
        let row = fetch(
            &pool,
            "INSERT INTO test_decimals (id, text_value) VALUES (1, '935077.50')",
            "text_value",
        )
        .await;

        let result = get_decimal(&row, "text_value");

        assert_eq!(result, Ok(dec!(935077.50)));
        assert_eq!(result.map(|d| d.scale()), Ok(2));
    }

    #[tokio::test]
    async fn test_get_decimal_from_integer() {
        let pool = setup_test_db().await;
        let row = fetch(
            &pool,
            "INSERT INTO test_decimals (id, int_value) VALUES (1, 69265)",
            "int_value",
        )
        .await;

        let result = get_decimal(&row, "int_value");

        assert_eq!(result, Ok(dec!(69265)));
    }

    #[tokio::test]
    async fn test_get_decimal_from_real() {
        let pool = setup_test_db().await;
        let row = fetch(
            &pool,
            "INSERT INTO test_decimals (id, real_value) VALUES (1, 39383.07)",
            "real_value",
        )
        .await;

        let result = get_decimal(&row, "real_value");

        assert_eq!(result, Ok(dec!(39383.07)));
    }

    #[tokio::test]
    async fn test_get_decimal_rejects_malformed_text() {
        let pool = setup_test_db().await;
        let row = fetch(
            &pool,
            "INSERT INTO test_decimals (id, text_value) VALUES (1, 'not a number')",
            "text_value",
        )
        .await;

        let result = get_decimal(&row, "text_value");

        assert!(matches!(result, Err(ProviderError::InvalidData(msg)) if msg.starts_with("'not a number'")));
    }

    #[tokio::test]
    async fn test_get_decimal_unexpected_type() {
        let pool = setup_test_db().await;
        let row = fetch(
            &pool,
            "INSERT INTO test_decimals (id, blob_value) VALUES (1, x'00')",
            "blob_value",
        )
        .await;

        let result = get_decimal(&row, "blob_value");

        assert_eq!(
            result,
            Err(ProviderError::InvalidData(
                "Unexpected type 'BLOB' for column 'blob_value'".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_get_decimal_column_not_found() {
        let pool = setup_test_db().await;
        let row = fetch(&pool, "INSERT INTO test_decimals (id) VALUES (1)", "id").await;

        let result = get_decimal(&row, "nonexistent_column");

        assert!(matches!(result, Err(ProviderError::Source(msg)) if msg.starts_with("Column 'nonexistent_column' not found:")));
    }

    #[tokio::test]
    async fn test_get_optional_decimal_from_null_returns_none() {
        let pool = setup_test_db().await;
        let row = fetch(
            &pool,
            "INSERT INTO test_decimals (id, text_value) VALUES (1, NULL)",
            "text_value",
        )
        .await;

        let result = get_optional_decimal(&row, "text_value");

        assert_eq!(result, Ok(None));
    }

    #[tokio::test]
    async fn test_get_optional_decimal_from_text() {
        let pool = setup_test_db().await;
        let row = fetch(
            &pool,
            "INSERT INTO test_decimals (id, text_value) VALUES (1, '2077950')",
            "text_value",
        )
        .await;

        let result = get_optional_decimal(&row, "text_value");

        assert_eq!(result, Ok(Some(dec!(2077950))));
    }
}
