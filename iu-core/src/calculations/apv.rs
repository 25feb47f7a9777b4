//! Voluntary pension savings (APV) benefit comparison.
//!
//! An APV contribution earns one of two mutually exclusive tax benefits:
//!
//! | Regime | Benefit | Cap |
//! |--------|---------|-----|
//! | A | State bonus of 15% of the yearly contribution | `topeRegimenA_UTM` UTM per year |
//! | B | Contribution is subtracted from the taxable base | `topeRegimenB_UF_mensual` UF per month |
//!
//! Regime B evaluates the monthly tax twice, with and without the
//! contribution, and reports the difference as the saving. The taxable base
//! is approximated from the liquid income with
//! [`ReferenceParameters::liquid_to_taxable_factor`].
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use iu_core::calculations::{ApvCalculator, Regime};
//!
//! let calculator = ApvCalculator::with_reference_data();
//! let comparison = calculator
//!     .compare_regimes(dec!(2000000), dec!(100000))
//!     .unwrap();
//!
//! assert_eq!(comparison.recommendation, Regime::A);
//! assert_eq!(comparison.regime_a.benefit_total, dec!(180000));
//! assert_eq!(comparison.regime_b.benefit_total, dec!(96000));
//! assert_eq!(comparison.difference, dec!(84000));
//! ```

use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::common::{format_clp, max, round_to_peso};
use super::tax::{MAX_INCOME, TaxEvaluationError, compute_tax};
use super::validation::{BracketViolation, validate_structure};
use crate::db::ReferenceDataProvider;
use crate::defaults::reference_bracket_table;
use crate::models::{BracketTable, ParameterError, Period, Provenance, ReferenceParameters};

/// Statutory bonus rate for regime A.
pub const REGIME_A_BONUS_RATE: Decimal = dec!(0.15);

/// Longest projection horizon accepted, in years.
pub const MAX_PROJECTION_YEARS: u32 = 100;

/// Horizons shown by default when projecting a regime.
pub const DEFAULT_MILESTONES: [u32; 5] = [1, 5, 10, 15, 20];

const MONTHS_PER_YEAR: Decimal = dec!(12);

/// Errors that can occur while computing APV benefits.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApvError {
    #[error("liquid income must be greater than 0 and at most {max}, got {0}", max = MAX_INCOME)]
    InvalidIncome(Decimal),

    #[error("monthly contribution must be greater than 0 and at most {max}, got {0}", max = MAX_INCOME)]
    InvalidContribution(Decimal),

    #[error("monthly contribution {contribution} exceeds liquid income {income}")]
    ContributionExceedsIncome { contribution: Decimal, income: Decimal },

    #[error("projection horizon of {0} years exceeds the maximum of {max}", max = MAX_PROJECTION_YEARS)]
    InvalidHorizon(u32),

    #[error("bracket table failed validation with {} violation(s)", .0.len())]
    InvalidBracketTable(Vec<BracketViolation>),

    #[error(transparent)]
    Parameters(#[from] ParameterError),

    #[error(transparent)]
    Tax(#[from] TaxEvaluationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Regime {
    /// State bonus.
    A,
    /// Taxable base deduction.
    B,
}

impl Regime {
    pub fn label(&self) -> &'static str {
        match self {
            Self::A => "Régimen A",
            Self::B => "Régimen B",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

/// Regime A figures. Amounts are whole pesos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BonusDetail {
    pub monthly_bonus: Decimal,
    pub annual_bonus: Decimal,
    /// Part of the yearly contribution that earns the bonus.
    pub usable_contribution: Decimal,
    /// Part of the yearly contribution above the bonus cap.
    pub excess_contribution: Decimal,
    pub bonus_cap: Decimal,
}

/// Regime B figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeductionDetail {
    pub taxable_base: Decimal,
    pub new_taxable_base: Decimal,
    pub amount_deducted: Decimal,
    pub annual_amount_deducted: Decimal,
    pub tax_without_apv: Decimal,
    pub tax_with_apv: Decimal,
    pub monthly_saving: Decimal,
    pub annual_saving: Decimal,
    pub monthly_cap: Decimal,
    pub annual_cap: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RegimeDetail {
    Bonus(BonusDetail),
    Deduction(DeductionDetail),
}

/// Benefit obtained under one regime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegimeBenefit {
    pub regime: Regime,
    pub monthly_contribution: Decimal,
    pub annual_contribution: Decimal,
    /// Yearly benefit in whole pesos.
    pub benefit_total: Decimal,
    pub detail: RegimeDetail,
}

impl RegimeBenefit {
    pub fn bonus(&self) -> Option<&BonusDetail> {
        match &self.detail {
            RegimeDetail::Bonus(detail) => Some(detail),
            RegimeDetail::Deduction(_) => None,
        }
    }

    pub fn deduction(&self) -> Option<&DeductionDetail> {
        match &self.detail {
            RegimeDetail::Deduction(detail) => Some(detail),
            RegimeDetail::Bonus(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegimeComparison {
    pub regime_a: RegimeBenefit,
    pub regime_b: RegimeBenefit,
    pub recommendation: Regime,
    pub difference: Decimal,
    pub explanation: String,
    /// Whether the figures came from provider data or the embedded table.
    pub provenance: Provenance,
}

/// Accumulated state after a number of projected years. Unrounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProjectionYear {
    pub year: u32,
    pub capital: Decimal,
    pub benefit_accumulated: Decimal,
    pub contributions: Decimal,
}

impl ProjectionYear {
    /// One more year of compounding followed by the year's contribution
    /// and benefit. `None` on arithmetic overflow.
    pub fn advance(
        &self,
        annual_contribution: Decimal,
        annual_benefit: Decimal,
        annual_return_rate: Decimal,
    ) -> Option<Self> {
        let grown = self.capital.checked_mul(Decimal::ONE + annual_return_rate)?;
        Some(Self {
            year: self.year.checked_add(1)?,
            capital: grown
                .checked_add(annual_contribution)?
                .checked_add(annual_benefit)?,
            benefit_accumulated: self.benefit_accumulated.checked_add(annual_benefit)?,
            contributions: self.contributions.checked_add(annual_contribution)?,
        })
    }
}

/// Year-by-year projection of a regime; the first item is year 1.
#[derive(Debug, Clone)]
pub struct ProjectionSchedule {
    current: ProjectionYear,
    annual_contribution: Decimal,
    annual_benefit: Decimal,
    annual_return_rate: Decimal,
}

impl Iterator for ProjectionSchedule {
    type Item = ProjectionYear;

    fn next(&mut self) -> Option<Self::Item> {
        self.current = self.current.advance(
            self.annual_contribution,
            self.annual_benefit,
            self.annual_return_rate,
        )?;
        Some(self.current)
    }
}

/// Projected outcome after `years`, in whole pesos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Projection {
    pub years: u32,
    pub capital: Decimal,
    pub return_generated: Decimal,
    pub benefit_accumulated: Decimal,
    pub contributions: Decimal,
}

impl From<ProjectionYear> for Projection {
    fn from(state: ProjectionYear) -> Self {
        Self {
            years: state.year,
            capital: round_to_peso(state.capital),
            return_generated: round_to_peso(
                state.capital - state.contributions - state.benefit_accumulated,
            ),
            benefit_accumulated: round_to_peso(state.benefit_accumulated),
            contributions: round_to_peso(state.contributions),
        }
    }
}

/// One side of the before/after table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComparisonRow {
    pub monthly_saving: Decimal,
    pub taxable_salary: Decimal,
    pub tax_payable: Decimal,
    pub tax_saving: Decimal,
    pub fiscal_bonus: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComparisonTable {
    pub regime: Regime,
    pub without_apv: ComparisonRow,
    pub with_apv: ComparisonRow,
}

/// APV calculator holding the active parameters and bracket table.
///
/// Both are replaced wholesale through [`ApvCalculator::set_parameters`] and
/// [`ApvCalculator::replace_bracket_table`]; calculations only read them.
#[derive(Debug, Clone)]
pub struct ApvCalculator {
    parameters: ReferenceParameters,
    table: BracketTable,
    provenance: Provenance,
}

impl ApvCalculator {
    /// Creates a calculator from explicitly supplied data.
    ///
    /// # Errors
    ///
    /// Returns [`ApvError::Parameters`] or [`ApvError::InvalidBracketTable`]
    /// if either input is rejected.
    pub fn new(
        parameters: ReferenceParameters,
        table: BracketTable,
    ) -> Result<Self, ApvError> {
        parameters.validate()?;
        check_table(&table)?;
        Ok(Self {
            parameters,
            table,
            provenance: Provenance::Provider,
        })
    }

    /// Calculator using the default parameters and the embedded 2025 table.
    pub fn with_reference_data() -> Self {
        Self {
            parameters: ReferenceParameters::default(),
            table: reference_bracket_table(),
            provenance: Provenance::Fallback,
        }
    }

    /// Loads unit values and the bracket table for the period containing
    /// `today`.
    ///
    /// Never fails: any provider failure keeps the default parameter it
    /// would have replaced, and a missing or invalid bracket table is
    /// replaced by the embedded 2025 table with [`Provenance::Fallback`].
    pub async fn initialize<P>(
        provider: &P,
        today: NaiveDate,
    ) -> Self
    where
        P: ReferenceDataProvider + ?Sized,
    {
        let mut calculator = Self::with_reference_data();

        let period = match Period::from_date(today) {
            Ok(period) => period,
            Err(error) => {
                warn!(date = %today, error = %error, "Using reference data for unsupported date");
                return calculator;
            }
        };

        match provider.currency_unit_values(period).await {
            Ok(values) => {
                let mut parameters = calculator.parameters.clone();
                match values.uf_on(today) {
                    Some(uf) => parameters.uf_value = uf,
                    None => warn!(date = %today, "No UF value published for date, keeping default"),
                }
                parameters.utm_value = values.utm;

                match parameters.validate() {
                    Ok(()) => calculator.parameters = parameters,
                    Err(error) => warn!(period = %period, error = %error, "Ignoring invalid unit values"),
                }
            }
            Err(error) => warn!(period = %period, error = %error, "Unit values unavailable, keeping defaults"),
        }

        match provider.bracket_table(period).await {
            Ok(table) => match calculator.replace_bracket_table(table) {
                Ok(()) => {}
                Err(error) => warn!(period = %period, error = %error, "Using reference bracket table"),
            },
            Err(error) => warn!(period = %period, error = %error, "Using reference bracket table"),
        }

        info!(
            period = %period,
            provenance = ?calculator.provenance,
            uf = %calculator.parameters.uf_value,
            utm = %calculator.parameters.utm_value,
            "APV calculator initialized"
        );
        calculator
    }

    pub fn parameters(&self) -> &ReferenceParameters {
        &self.parameters
    }

    pub fn bracket_table(&self) -> &BracketTable {
        &self.table
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// Replaces the whole parameter set.
    ///
    /// # Errors
    ///
    /// Returns [`ApvError::Parameters`] and keeps the current set if
    /// `parameters` is invalid.
    pub fn set_parameters(
        &mut self,
        parameters: ReferenceParameters,
    ) -> Result<(), ApvError> {
        parameters.validate()?;
        self.parameters = parameters;
        Ok(())
    }

    /// Activates `table` after checking its structure.
    ///
    /// # Errors
    ///
    /// Returns [`ApvError::InvalidBracketTable`] and keeps the current table
    /// if `table` is malformed.
    pub fn replace_bracket_table(
        &mut self,
        table: BracketTable,
    ) -> Result<(), ApvError> {
        check_table(&table)?;
        self.table = table;
        self.provenance = Provenance::Provider;
        Ok(())
    }

    /// Computes the regime A bonus for a monthly contribution.
    ///
    /// # Errors
    ///
    /// Returns [`ApvError::InvalidContribution`] if the contribution is not
    /// positive or exceeds [`MAX_INCOME`].
    pub fn compute_regime_a(
        &self,
        monthly_contribution: Decimal,
    ) -> Result<RegimeBenefit, ApvError> {
        check_contribution(monthly_contribution)?;
        Ok(self.regime_a(monthly_contribution))
    }

    /// Computes the regime B tax saving.
    ///
    /// # Errors
    ///
    /// Returns an input error from [`ApvError`] before any tax is evaluated,
    /// or [`ApvError::Tax`] if either tax evaluation fails.
    pub fn compute_regime_b(
        &self,
        liquid_income: Decimal,
        monthly_contribution: Decimal,
    ) -> Result<RegimeBenefit, ApvError> {
        check_inputs(liquid_income, monthly_contribution)?;
        self.regime_b(liquid_income, monthly_contribution)
    }

    /// Computes both regimes and recommends the one with the larger yearly
    /// benefit. Equal benefits recommend regime B.
    pub fn compare_regimes(
        &self,
        liquid_income: Decimal,
        monthly_contribution: Decimal,
    ) -> Result<RegimeComparison, ApvError> {
        check_inputs(liquid_income, monthly_contribution)?;

        let regime_a = self.regime_a(monthly_contribution);
        let regime_b = self.regime_b(liquid_income, monthly_contribution)?;

        let recommendation = recommend(regime_a.benefit_total, regime_b.benefit_total);
        let difference = (regime_a.benefit_total - regime_b.benefit_total).abs();
        let explanation = explain(recommendation, &regime_a, &regime_b);

        debug!(
            liquid_income = %liquid_income,
            monthly_contribution = %monthly_contribution,
            recommendation = %recommendation,
            difference = %difference,
            "Compared APV regimes"
        );

        Ok(RegimeComparison {
            regime_a,
            regime_b,
            recommendation,
            difference,
            explanation,
            provenance: self.provenance,
        })
    }

    /// Year-by-year schedule for `benefit` at the current return rate.
    pub fn projection_schedule(
        &self,
        benefit: &RegimeBenefit,
    ) -> ProjectionSchedule {
        ProjectionSchedule {
            current: ProjectionYear::default(),
            annual_contribution: benefit.annual_contribution,
            annual_benefit: benefit.benefit_total,
            annual_return_rate: self.parameters.annual_return_rate,
        }
    }

    /// Projects `benefit` over `years`. A horizon of 0 yields all zeros.
    ///
    /// # Errors
    ///
    /// Returns [`ApvError::InvalidHorizon`] above [`MAX_PROJECTION_YEARS`].
    pub fn project_regime(
        &self,
        benefit: &RegimeBenefit,
        years: u32,
    ) -> Result<Projection, ApvError> {
        check_horizon(years)?;
        let state = self
            .projection_schedule(benefit)
            .take(years as usize)
            .last()
            .unwrap_or_default();
        Ok(state.into())
    }

    /// Projections at each of `milestones`, computed in a single pass.
    ///
    /// Results follow the order of `milestones`.
    pub fn project_milestones(
        &self,
        benefit: &RegimeBenefit,
        milestones: &[u32],
    ) -> Result<Vec<Projection>, ApvError> {
        let horizon = milestones.iter().copied().max().unwrap_or(0);
        check_horizon(horizon)?;

        let states: Vec<ProjectionYear> = std::iter::once(ProjectionYear::default())
            .chain(self.projection_schedule(benefit).take(horizon as usize))
            .collect();

        Ok(milestones
            .iter()
            .map(|years| Projection::from(states.get(*years as usize).copied().unwrap_or_default()))
            .collect())
    }

    /// Monthly figures with and without the contribution under `regime`.
    pub fn generate_comparison_table(
        &self,
        liquid_income: Decimal,
        monthly_contribution: Decimal,
        regime: Regime,
    ) -> Result<ComparisonTable, ApvError> {
        check_inputs(liquid_income, monthly_contribution)?;

        let taxable_base = self.taxable_base(liquid_income)?;
        let tax = compute_tax(taxable_base, &self.table)?.tax;

        let without_apv = ComparisonRow {
            monthly_saving: Decimal::ZERO,
            taxable_salary: round_to_peso(taxable_base),
            tax_payable: tax,
            tax_saving: Decimal::ZERO,
            fiscal_bonus: Decimal::ZERO,
        };

        let with_apv = match regime {
            Regime::A => {
                let benefit = self.regime_a(monthly_contribution);
                ComparisonRow {
                    monthly_saving: monthly_contribution,
                    fiscal_bonus: benefit.bonus().map_or(Decimal::ZERO, |b| b.monthly_bonus),
                    ..without_apv.clone()
                }
            }
            Regime::B => {
                let detail = self.deduction_detail(liquid_income, monthly_contribution)?;
                ComparisonRow {
                    monthly_saving: monthly_contribution,
                    taxable_salary: round_to_peso(detail.new_taxable_base),
                    tax_payable: detail.tax_with_apv,
                    tax_saving: detail.monthly_saving,
                    fiscal_bonus: Decimal::ZERO,
                }
            }
        };

        Ok(ComparisonTable {
            regime,
            without_apv,
            with_apv,
        })
    }

    fn taxable_base(
        &self,
        liquid_income: Decimal,
    ) -> Result<Decimal, ApvError> {
        liquid_income
            .checked_mul(self.parameters.liquid_to_taxable_factor)
            .ok_or(ApvError::InvalidIncome(liquid_income))
    }

    fn regime_a(
        &self,
        monthly_contribution: Decimal,
    ) -> RegimeBenefit {
        let annual_contribution = monthly_contribution * MONTHS_PER_YEAR;
        let gross_bonus = annual_contribution * REGIME_A_BONUS_RATE;
        let bonus_cap = self.parameters.regime_a_cap_utm * self.parameters.utm_value;
        let final_bonus = gross_bonus.min(bonus_cap);
        let usable_contribution = annual_contribution.min(bonus_cap / REGIME_A_BONUS_RATE);

        let detail = BonusDetail {
            monthly_bonus: round_to_peso(final_bonus / MONTHS_PER_YEAR),
            annual_bonus: round_to_peso(final_bonus),
            usable_contribution: round_to_peso(usable_contribution),
            excess_contribution: round_to_peso(max(
                annual_contribution - usable_contribution,
                Decimal::ZERO,
            )),
            bonus_cap: round_to_peso(bonus_cap),
        };

        debug!(
            monthly_contribution = %monthly_contribution,
            annual_bonus = %detail.annual_bonus,
            "Computed regime A"
        );

        RegimeBenefit {
            regime: Regime::A,
            monthly_contribution,
            annual_contribution,
            benefit_total: detail.annual_bonus,
            detail: RegimeDetail::Bonus(detail),
        }
    }

    fn regime_b(
        &self,
        liquid_income: Decimal,
        monthly_contribution: Decimal,
    ) -> Result<RegimeBenefit, ApvError> {
        let detail = self.deduction_detail(liquid_income, monthly_contribution)?;

        debug!(
            liquid_income = %liquid_income,
            monthly_contribution = %monthly_contribution,
            annual_saving = %detail.annual_saving,
            "Computed regime B"
        );

        Ok(RegimeBenefit {
            regime: Regime::B,
            monthly_contribution,
            annual_contribution: monthly_contribution * MONTHS_PER_YEAR,
            benefit_total: detail.annual_saving,
            detail: RegimeDetail::Deduction(detail),
        })
    }

    fn deduction_detail(
        &self,
        liquid_income: Decimal,
        monthly_contribution: Decimal,
    ) -> Result<DeductionDetail, ApvError> {
        let taxable_base = self.taxable_base(liquid_income)?;
        let monthly_cap = self.parameters.regime_b_monthly_cap_uf * self.parameters.uf_value;
        let amount_deducted = monthly_contribution.min(monthly_cap);
        let new_taxable_base = max(taxable_base - amount_deducted, Decimal::ZERO);

        let tax_without_apv = compute_tax(taxable_base, &self.table)?.tax;
        let tax_with_apv = if new_taxable_base > Decimal::ZERO {
            compute_tax(new_taxable_base, &self.table)?.tax
        } else {
            Decimal::ZERO
        };

        let monthly_saving = max(tax_without_apv - tax_with_apv, Decimal::ZERO);
        let annual_saving = round_to_peso(monthly_saving * MONTHS_PER_YEAR);

        Ok(DeductionDetail {
            taxable_base,
            new_taxable_base,
            amount_deducted,
            annual_amount_deducted: amount_deducted * MONTHS_PER_YEAR,
            tax_without_apv,
            tax_with_apv,
            monthly_saving: round_to_peso(monthly_saving),
            annual_saving,
            monthly_cap: round_to_peso(monthly_cap),
            annual_cap: round_to_peso(monthly_cap * MONTHS_PER_YEAR),
        })
    }
}

impl Default for ApvCalculator {
    fn default() -> Self {
        Self::with_reference_data()
    }
}

fn check_table(table: &BracketTable) -> Result<(), ApvError> {
    let violations = validate_structure(table);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ApvError::InvalidBracketTable(violations))
    }
}

fn check_contribution(monthly_contribution: Decimal) -> Result<(), ApvError> {
    if monthly_contribution <= Decimal::ZERO || monthly_contribution > MAX_INCOME {
        return Err(ApvError::InvalidContribution(monthly_contribution));
    }
    Ok(())
}

fn check_inputs(
    liquid_income: Decimal,
    monthly_contribution: Decimal,
) -> Result<(), ApvError> {
    check_contribution(monthly_contribution)?;
    if liquid_income <= Decimal::ZERO || liquid_income > MAX_INCOME {
        return Err(ApvError::InvalidIncome(liquid_income));
    }
    if monthly_contribution > liquid_income {
        return Err(ApvError::ContributionExceedsIncome {
            contribution: monthly_contribution,
            income: liquid_income,
        });
    }
    Ok(())
}

fn check_horizon(years: u32) -> Result<(), ApvError> {
    if years > MAX_PROJECTION_YEARS {
        return Err(ApvError::InvalidHorizon(years));
    }
    Ok(())
}

fn recommend(
    regime_a_benefit: Decimal,
    regime_b_benefit: Decimal,
) -> Regime {
    if regime_a_benefit > regime_b_benefit {
        Regime::A
    } else {
        Regime::B
    }
}

fn explain(
    recommendation: Regime,
    regime_a: &RegimeBenefit,
    regime_b: &RegimeBenefit,
) -> String {
    let bonus = format_clp(regime_a.benefit_total);
    let saving = format_clp(regime_b.benefit_total);
    if regime_a.benefit_total == regime_b.benefit_total {
        return format!(
            "Ambos regímenes entregan {saving} anuales; se recomienda el Régimen B."
        );
    }
    match recommendation {
        Regime::A => format!(
            "El Régimen A te otorga una bonificación fiscal de {bonus} anuales, \
             superior al ahorro tributario del Régimen B de {saving}."
        ),
        Regime::B => format!(
            "El Régimen B te permite ahorrar {saving} anuales en impuestos, \
             superior a la bonificación del Régimen A de {bonus}."
        ),
    }
}
