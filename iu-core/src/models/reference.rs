use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{BracketTable, Period};
use crate::calculations::common::{round_half_up, round_to_peso};

/// Errors raised when a parameter set is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParameterError {
    #[error("annual return rate must be between 0 and 1, got {0}")]
    InvalidReturnRate(Decimal),

    #[error("UF value must be positive, got {0}")]
    InvalidUfValue(Decimal),

    #[error("UTM value must be at least 1, got {0}")]
    InvalidUtmValue(Decimal),

    #[error("regime cap '{name}' must be positive, got {value}")]
    InvalidCap { name: &'static str, value: Decimal },

    #[error("liquid-to-taxable factor must be at least 1, got {0}")]
    InvalidTaxableFactor(Decimal),
}

/// Values the APV comparison depends on that change over time.
///
/// Field names on the wire match the external parameter shape
/// (`rentabilidadAnual`, `valorUF`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceParameters {
    /// Expected yearly return of the savings account, as a fraction.
    #[serde(rename = "rentabilidadAnual")]
    pub annual_return_rate: Decimal,

    #[serde(rename = "valorUF")]
    pub uf_value: Decimal,

    #[serde(rename = "valorUTM")]
    pub utm_value: Decimal,

    /// Yearly bonus ceiling for regime A, in UTM.
    #[serde(rename = "topeRegimenA_UTM")]
    pub regime_a_cap_utm: Decimal,

    /// Monthly deduction ceiling for regime B, in UF.
    #[serde(rename = "topeRegimenB_UF_mensual")]
    pub regime_b_monthly_cap_uf: Decimal,

    /// Yearly deduction ceiling for regime B, in UF.
    #[serde(rename = "topeRegimenB_UF_anual")]
    pub regime_b_annual_cap_uf: Decimal,

    /// Approximation turning liquid income into taxable income.
    #[serde(rename = "factorRentaImponible", default = "default_taxable_factor")]
    pub liquid_to_taxable_factor: Decimal,
}

fn default_taxable_factor() -> Decimal {
    dec!(1.13)
}

impl Default for ReferenceParameters {
    fn default() -> Self {
        Self {
            annual_return_rate: dec!(0.04255),
            uf_value: dec!(39486),
            utm_value: dec!(69265),
            regime_a_cap_utm: dec!(6),
            regime_b_monthly_cap_uf: dec!(50),
            regime_b_annual_cap_uf: dec!(600),
            liquid_to_taxable_factor: default_taxable_factor(),
        }
    }
}

impl ReferenceParameters {
    /// Checks every field against its admissible range.
    ///
    /// # Errors
    ///
    /// Returns the first [`ParameterError`] found.
    pub fn validate(&self) -> Result<(), ParameterError> {
        if self.annual_return_rate < Decimal::ZERO || self.annual_return_rate > Decimal::ONE {
            return Err(ParameterError::InvalidReturnRate(self.annual_return_rate));
        }
        if self.uf_value <= Decimal::ZERO {
            return Err(ParameterError::InvalidUfValue(self.uf_value));
        }
        if self.utm_value < Decimal::ONE {
            return Err(ParameterError::InvalidUtmValue(self.utm_value));
        }
        let caps = [
            ("topeRegimenA_UTM", self.regime_a_cap_utm),
            ("topeRegimenB_UF_mensual", self.regime_b_monthly_cap_uf),
            ("topeRegimenB_UF_anual", self.regime_b_annual_cap_uf),
        ];
        for (name, value) in caps {
            if value <= Decimal::ZERO {
                return Err(ParameterError::InvalidCap { name, value });
            }
        }
        if self.liquid_to_taxable_factor < Decimal::ONE {
            return Err(ParameterError::InvalidTaxableFactor(
                self.liquid_to_taxable_factor,
            ));
        }
        Ok(())
    }

    /// Regime A yearly bonus ceiling in pesos.
    pub fn regime_a_cap_pesos(&self) -> Decimal {
        round_to_peso(self.regime_a_cap_utm * self.utm_value)
    }

    /// Regime B monthly deduction ceiling in pesos.
    pub fn regime_b_monthly_cap_pesos(&self) -> Decimal {
        round_to_peso(self.regime_b_monthly_cap_uf * self.uf_value)
    }

    /// Regime B yearly deduction ceiling in pesos.
    pub fn regime_b_annual_cap_pesos(&self) -> Decimal {
        round_to_peso(self.regime_b_annual_cap_uf * self.uf_value)
    }
}

/// Daily UF values and the monthly UTM for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyUnitValues {
    pub period: Period,
    pub uf: BTreeMap<NaiveDate, Decimal>,
    pub utm: Decimal,
}

impl CurrencyUnitValues {
    /// UF on `date`, or the last value published for that month when the
    /// exact day is missing.
    pub fn uf_on(
        &self,
        date: NaiveDate,
    ) -> Option<Decimal> {
        if let Some(value) = self.uf.get(&date) {
            return Some(*value);
        }
        let first = self.period.first_day();
        let last = self.period.last_day();
        self.uf
            .range(first..=last)
            .next_back()
            .map(|(_, value)| *value)
    }

    pub fn uf_to_clp(
        &self,
        amount_uf: Decimal,
        date: NaiveDate,
    ) -> Option<Decimal> {
        self.uf_on(date).map(|uf| round_to_peso(amount_uf * uf))
    }

    pub fn clp_to_uf(
        &self,
        amount_clp: Decimal,
        date: NaiveDate,
    ) -> Option<Decimal> {
        let uf = self.uf_on(date).filter(|uf| !uf.is_zero())?;
        Some(round_half_up(amount_clp / uf))
    }

    pub fn utm_to_clp(
        &self,
        amount_utm: Decimal,
    ) -> Decimal {
        round_to_peso(amount_utm * self.utm)
    }

    /// Converts pesos to UTM, rounded to four decimals.
    pub fn clp_to_utm(
        &self,
        amount_clp: Decimal,
    ) -> Option<Decimal> {
        if self.utm.is_zero() {
            return None;
        }
        Some(
            (amount_clp / self.utm)
                .round_dp_with_strategy(4, rust_decimal::RoundingStrategy::MidpointAwayFromZero),
        )
    }
}

/// Where the active bracket table came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Loaded from the reference data provider.
    Provider,
    /// Embedded reference snapshot used because loading failed.
    Fallback,
}

/// A bracket table as stored or exported for a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketTableDocument {
    /// Date the table takes effect (first day of the period).
    pub vigencia: NaiveDate,
    pub periodo_label: String,
    pub moneda: String,
    pub tramos: BracketTable,
    #[serde(rename = "fechaGuardado", default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl BracketTableDocument {
    pub fn new(
        period: Period,
        tramos: BracketTable,
        saved_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            vigencia: period.first_day(),
            periodo_label: period.label(),
            moneda: "CLP".to_string(),
            tramos,
            saved_at,
        }
    }

    pub fn period(&self) -> Option<Period> {
        Period::from_date(self.vigencia).ok()
    }
}
