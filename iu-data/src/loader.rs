use std::collections::BTreeMap;
use std::io::Read;

use iu_core::calculations::{BracketViolation, validate_structure};
use iu_core::{
    AdminError, Bound, Bracket, BracketAdmin, BracketStore, BracketTable, MaxEffectiveRate, Period,
    PeriodError,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::amount::{AmountError, parse_amount, parse_rate};

/// Errors that can occur when loading bracket tables.
#[derive(Debug, Error, PartialEq)]
pub enum BracketLoaderError {
    #[error("CSV parse error: {0}")]
    CsvParse(String),

    #[error("invalid {field} '{value}' in row {row}: {source}")]
    InvalidAmount {
        row: usize,
        field: &'static str,
        value: String,
        source: AmountError,
    },

    #[error("invalid period in row {row}: {source}")]
    InvalidPeriod { row: usize, source: PeriodError },

    #[error("table for {period} failed validation with {} violation(s)", .violations.len())]
    Validation {
        period: Period,
        violations: Vec<BracketViolation>,
    },

    #[error(transparent)]
    Admin(#[from] AdminError),
}

impl From<csv::Error> for BracketLoaderError {
    fn from(err: csv::Error) -> Self {
        BracketLoaderError::CsvParse(err.to_string())
    }
}

/// A single row of a bracket CSV file.
///
/// Columns:
/// - `year`, `month`: the period the bracket belongs to
/// - `numero`: 1-based bracket position
/// - `desde`, `hasta`: bounds, plain (`935077.50`) or CLP formatted
///   (`$935.077,50`); an empty `hasta` or a label such as `Y MÁS` marks the
///   open top bracket
/// - `factor`: marginal rate as a fraction or percentage
/// - `rebaja`: fixed deduction
/// - `tasa_efectiva_max`: optional reference label (`Exento`, `4,52%`)
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BracketRecord {
    pub year: i32,
    pub month: u32,
    pub numero: u32,
    pub desde: String,
    pub hasta: Option<String>,
    pub factor: String,
    pub rebaja: String,
    #[serde(default)]
    pub tasa_efectiva_max: Option<String>,
}

/// A validated table and the period it applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodTable {
    pub period: Period,
    pub table: BracketTable,
}

/// Loader for bracket tables from CSV files.
///
/// Rows may appear in any order; they are grouped by period and ordered by
/// `numero` before validation.
pub struct BracketTableLoader;

impl BracketTableLoader {
    /// Parse bracket records from a CSV reader.
    pub fn parse<R: Read>(reader: R) -> Result<Vec<BracketRecord>, BracketLoaderError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut records = Vec::new();

        for result in csv_reader.deserialize() {
            let record: BracketRecord = result?;
            records.push(record);
        }

        Ok(records)
    }

    /// Groups records into one validated table per period, oldest first.
    ///
    /// Fails on the first malformed row or the first table that does not
    /// pass structural validation.
    pub fn tables(records: &[BracketRecord]) -> Result<Vec<PeriodTable>, BracketLoaderError> {
        let mut groups: BTreeMap<Period, Vec<Bracket>> = BTreeMap::new();

        // Header is line 1, so data rows start at 2.
        for (row, record) in (2..).zip(records) {
            let period = Period::new(record.year, record.month)
                .map_err(|source| BracketLoaderError::InvalidPeriod { row, source })?;
            groups
                .entry(period)
                .or_default()
                .push(to_bracket(row, record)?);
        }

        groups
            .into_iter()
            .map(|(period, brackets)| {
                let table = BracketTable::new(brackets);
                let violations = validate_structure(&table);
                if violations.is_empty() {
                    debug!(period = %period, "Parsed bracket table");
                    Ok(PeriodTable { period, table })
                } else {
                    Err(BracketLoaderError::Validation { period, violations })
                }
            })
            .collect()
    }

    /// Stores every table through `admin`, replacing existing ones.
    ///
    /// Returns the number of tables stored.
    pub async fn load<S: BracketStore>(
        admin: &BracketAdmin<S>,
        tables: Vec<PeriodTable>,
    ) -> Result<usize, BracketLoaderError> {
        let mut stored = 0;
        for PeriodTable { period, table } in tables {
            admin.save_period(period, table).await?;
            stored += 1;
        }
        info!(tables = stored, "Loaded bracket tables");
        Ok(stored)
    }
}

fn amount_field(
    row: usize,
    field: &'static str,
    value: &str,
    parse: fn(&str) -> Result<Decimal, AmountError>,
) -> Result<Decimal, BracketLoaderError> {
    parse(value).map_err(|source| BracketLoaderError::InvalidAmount {
        row,
        field,
        value: value.to_string(),
        source,
    })
}

fn to_bracket(
    row: usize,
    record: &BracketRecord,
) -> Result<Bracket, BracketLoaderError> {
    let upper_bound = match record.hasta.as_deref() {
        None => Bound::Unbounded,
        Some(label) => match Bound::from_label(label) {
            Some(bound) => bound,
            None => Bound::from_amount(amount_field(row, "hasta", label, parse_amount)?),
        },
    };

    let max_effective_rate = record
        .tasa_efectiva_max
        .as_deref()
        .and_then(MaxEffectiveRate::parse);

    Ok(Bracket {
        index: record.numero,
        lower_bound: amount_field(row, "desde", &record.desde, parse_amount)?,
        upper_bound,
        marginal_rate: amount_field(row, "factor", &record.factor, parse_rate)?,
        deduction: amount_field(row, "rebaja", &record.rebaja, parse_amount)?,
        max_effective_rate,
    })
}

#[cfg(test)]
mod tests {
    use iu_core::MemoryStore;
    use iu_core::calculations::ViolationKind;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;

    const HEADER: &str = "year,month,numero,desde,hasta,factor,rebaja,tasa_efectiva_max\n";

    const SEPTEMBER_CSV: &str = "\
year,month,numero,desde,hasta,factor,rebaja,tasa_efectiva_max
2025,9,1,0,935077.50,0,0,Exento
2025,9,2,935077.51,2077950.00,0.04,37403.10,\"2,20%\"
2025,9,3,2077950.01,3463250.00,0.08,120521.10,\"4,52%\"
2025,9,4,3463250.01,4848550.00,0.135,272540.10,\"7,88%\"
2025,9,5,4848550.01,6233850.00,0.23,676540.10,\"12,15%\"
2025,9,6,6233850.01,7619150.00,0.304,1021540.10,\"16,99%\"
2025,9,7,7619150.01,9004450.00,0.35,1341540.10,\"20,10%\"
2025,9,8,9004450.01,Y MÁS,0.4,1741540.10,\"Más de 20,10%\"
";

    #[test]
    fn parse_single_row() {
        let csv = format!("{HEADER}2025,9,2,\"$935.077,51\",\"$2.077.950\",4%,\"$37.403,10\",");

        let records = BracketTableLoader::parse(csv.as_bytes()).unwrap();

        assert_eq!(
            records,
            vec![BracketRecord {
                year: 2025,
                month: 9,
                numero: 2,
                desde: "$935.077,51".to_string(),
                hasta: Some("$2.077.950".to_string()),
                factor: "4%".to_string(),
                rebaja: "$37.403,10".to_string(),
                tasa_efectiva_max: None,
            }]
        );
    }

    #[test]
    fn clp_formatted_row_converts_to_bracket() {
        let csv = format!("{HEADER}2025,9,2,\"$935.077,51\",\"$2.077.950\",4%,\"$37.403,10\",");
        let records = BracketTableLoader::parse(csv.as_bytes()).unwrap();

        let bracket = to_bracket(2, &records[0]).unwrap();

        assert_eq!(bracket.lower_bound, dec!(935077.51));
        assert_eq!(bracket.upper_bound, Bound::Finite(dec!(2077950)));
        assert_eq!(bracket.marginal_rate, dec!(0.04));
        assert_eq!(bracket.deduction, dec!(37403.10));
    }

    #[test]
    fn tables_builds_validated_table() {
        let records = BracketTableLoader::parse(SEPTEMBER_CSV.as_bytes()).unwrap();

        let tables = BracketTableLoader::tables(&records).unwrap();

        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].period, Period::new(2025, 9).unwrap());
        assert_eq!(tables[0].table, iu_core::reference_bracket_table());
    }

    #[test]
    fn tables_orders_rows_by_numero() {
        let mut lines: Vec<&str> = SEPTEMBER_CSV.lines().collect();
        lines[1..].reverse();
        let csv = lines.join("\n");
        let records = BracketTableLoader::parse(csv.as_bytes()).unwrap();

        let tables = BracketTableLoader::tables(&records).unwrap();

        assert_eq!(tables[0].table.get(0).map(|b| b.index), Some(1));
    }

    #[test]
    fn tables_rejects_incomplete_table() {
        let csv: String = SEPTEMBER_CSV.lines().take(8).collect::<Vec<_>>().join("\n");
        let records = BracketTableLoader::parse(csv.as_bytes()).unwrap();

        let result = BracketTableLoader::tables(&records);

        match result {
            Err(BracketLoaderError::Validation { period, violations }) => {
                assert_eq!(period, Period::new(2025, 9).unwrap());
                assert_eq!(violations[0].kind, ViolationKind::WrongBracketCount);
            }
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn tables_reports_bad_amount_with_row() {
        let csv = format!("{HEADER}2025,9,1,abc,935077.50,0,0,");
        let records = BracketTableLoader::parse(csv.as_bytes()).unwrap();

        let result = BracketTableLoader::tables(&records);

        assert_eq!(
            result,
            Err(BracketLoaderError::InvalidAmount {
                row: 2,
                field: "desde",
                value: "abc".to_string(),
                source: AmountError::Invalid("abc".to_string()),
            })
        );
    }

    #[test]
    fn tables_rejects_unsupported_period() {
        let csv = format!("{HEADER}2019,9,1,0,935077.50,0,0,");
        let records = BracketTableLoader::parse(csv.as_bytes()).unwrap();

        let result = BracketTableLoader::tables(&records);

        assert_eq!(
            result,
            Err(BracketLoaderError::InvalidPeriod {
                row: 2,
                source: PeriodError::InvalidYear(2019),
            })
        );
    }

    #[test]
    fn parse_missing_column_fails() {
        let csv = "year,month,numero\n2025,9,1";

        let result = BracketTableLoader::parse(csv.as_bytes());

        let err = result.expect_err("Should fail for missing column");
        let BracketLoaderError::CsvParse(msg) = err else {
            panic!("Expected CsvParse error, got: {err:?}");
        };
        assert!(
            msg.contains("missing field"),
            "Expected 'missing field' in error, got: {msg}"
        );
    }

    #[test]
    fn parse_empty_csv() {
        let records = BracketTableLoader::parse(HEADER.as_bytes()).unwrap();

        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn load_stores_every_table() {
        let records = BracketTableLoader::parse(SEPTEMBER_CSV.as_bytes()).unwrap();
        let tables = BracketTableLoader::tables(&records).unwrap();
        let admin = BracketAdmin::new(MemoryStore::new());

        let stored = BracketTableLoader::load(&admin, tables).await.unwrap();

        assert_eq!(stored, 1);
        assert_eq!(
            admin.saved_periods().await.unwrap(),
            vec![Period::new(2025, 9).unwrap()]
        );
    }
}
