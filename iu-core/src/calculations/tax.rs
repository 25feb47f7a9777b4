//! Monthly "Impuesto Único" evaluation.
//!
//! The tax for a taxable income (RLI) is found by locating the bracket that
//! contains the income and applying the published formula:
//!
//! ```text
//! tax = max(0, income × factor − rebaja)
//! ```
//!
//! rounded to whole pesos.
//!
//! Published tables leave a 0.01 gap between one bracket's upper bound and
//! the next bracket's lower bound. An income inside that gap belongs to the
//! higher bracket: evaluation picks the first bracket whose upper bound admits
//! the income, and only then requires the income to reach that bracket's lower
//! bound within [`BOUNDARY_TOLERANCE`].
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use iu_core::calculations::compute_tax;
//! use iu_core::reference_bracket_table;
//!
//! let table = reference_bracket_table();
//! let result = compute_tax(dec!(2500000), &table).unwrap();
//!
//! assert_eq!(result.applied_bracket.index, 3);
//! assert_eq!(result.tax, dec!(79479));
//! assert_eq!(result.effective_rate_percentage(), "3.18%");
//! ```

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::calculations::common::{format_percentage, max, round_to_peso};
use crate::models::{Bound, Bracket, BracketTable};

/// Largest income accepted by the evaluator.
pub const MAX_INCOME: Decimal = dec!(999999999);

/// How far below a bracket's lower bound an income may fall and still be
/// assigned to it.
pub const BOUNDARY_TOLERANCE: Decimal = dec!(0.01);

/// Errors that can occur while evaluating the monthly tax.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaxEvaluationError {
    #[error("income must be greater than 0 and at most {max}, got {0}", max = MAX_INCOME)]
    InvalidIncome(Decimal),

    #[error("invalid bracket table: {0}")]
    InvalidBracketTable(String),

    #[error("no bracket applies to income {0}")]
    NoBracketApplicable(Decimal),

    #[error("invalid range from {from} to {to} with step {step}")]
    InvalidRange {
        from: Decimal,
        to: Decimal,
        step: Decimal,
    },
}

/// Outcome of a single tax evaluation.
///
/// Everything is held by value, so a result stays valid after the table it
/// was computed from is replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaxResult {
    pub income: Decimal,

    /// Tax owed, in whole pesos.
    pub tax: Decimal,

    /// Tax before rounding to whole pesos.
    pub unrounded_tax: Decimal,

    pub applied_bracket: Bracket,

    /// 0-based position of the applied bracket within the table.
    pub applied_bracket_index: usize,

    pub marginal_rate: Decimal,
    pub deduction: Decimal,

    /// `tax / income` as a fraction.
    pub effective_rate: Decimal,
}

impl TaxResult {
    /// Effective rate formatted as a percentage, e.g. `3.18%`.
    pub fn effective_rate_percentage(&self) -> String {
        format_percentage(self.effective_rate)
    }
}

/// Computes the monthly tax for `income` using `table`.
///
/// # Errors
///
/// - [`TaxEvaluationError::InvalidIncome`] if `income` is not in `(0, MAX_INCOME]`
/// - [`TaxEvaluationError::InvalidBracketTable`] if the table is empty
/// - [`TaxEvaluationError::NoBracketApplicable`] if no bracket contains `income`
pub fn compute_tax(
    income: Decimal,
    table: &BracketTable,
) -> Result<TaxResult, TaxEvaluationError> {
    check_income(income)?;
    if table.is_empty() {
        return Err(TaxEvaluationError::InvalidBracketTable(
            "table has no brackets".to_string(),
        ));
    }

    let (position, bracket) = locate_bracket(income, table)?;

    let unrounded_tax = max(
        income * bracket.marginal_rate - bracket.deduction,
        Decimal::ZERO,
    );
    let tax = round_to_peso(unrounded_tax);
    let effective_rate = if income > Decimal::ZERO {
        tax / income
    } else {
        Decimal::ZERO
    };

    debug!(
        income = %income,
        bracket = bracket.index,
        tax = %tax,
        "Evaluated monthly tax"
    );

    Ok(TaxResult {
        income,
        tax,
        unrounded_tax,
        applied_bracket: bracket.clone(),
        applied_bracket_index: position,
        marginal_rate: bracket.marginal_rate,
        deduction: bracket.deduction,
        effective_rate,
    })
}

/// 0-based position of the bracket that applies to `income`.
///
/// Lenient counterpart of [`compute_tax`] for display code: an invalid income,
/// an empty table or an unmatched income all yield `None`.
pub fn applied_bracket_index(
    income: Decimal,
    table: &BracketTable,
) -> Option<usize> {
    check_income(income).ok()?;
    locate_bracket(income, table)
        .ok()
        .map(|(position, _)| position)
}

fn check_income(income: Decimal) -> Result<(), TaxEvaluationError> {
    if income <= Decimal::ZERO || income > MAX_INCOME {
        return Err(TaxEvaluationError::InvalidIncome(income));
    }
    Ok(())
}

fn locate_bracket(
    income: Decimal,
    table: &BracketTable,
) -> Result<(usize, &Bracket), TaxEvaluationError> {
    let (position, bracket) = table
        .iter()
        .enumerate()
        .find(|(_, b)| b.upper_bound.admits(income))
        .ok_or(TaxEvaluationError::NoBracketApplicable(income))?;

    if income < bracket.lower_bound - BOUNDARY_TOLERANCE {
        return Err(TaxEvaluationError::NoBracketApplicable(income));
    }
    Ok((position, bracket))
}

/// Evenly spaced tax samples over `[from, to]`.
///
/// Built by [`compute_tax_range`]. The range is lazy and can be iterated any
/// number of times.
#[derive(Debug, Clone)]
pub struct TaxRange<'a> {
    from: Decimal,
    to: Decimal,
    step: Decimal,
    table: &'a BracketTable,
}

impl<'a> TaxRange<'a> {
    pub fn iter(&self) -> TaxRangeIter<'a> {
        TaxRangeIter {
            next: Some(self.from),
            to: self.to,
            step: self.step,
            table: self.table,
        }
    }
}

impl<'a> IntoIterator for &TaxRange<'a> {
    type Item = TaxResult;
    type IntoIter = TaxRangeIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`TaxRange`].
///
/// Samples that fail to evaluate are logged and skipped.
#[derive(Debug, Clone)]
pub struct TaxRangeIter<'a> {
    next: Option<Decimal>,
    to: Decimal,
    step: Decimal,
    table: &'a BracketTable,
}

impl Iterator for TaxRangeIter<'_> {
    type Item = TaxResult;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let income = self.next?;
            self.next = income
                .checked_add(self.step)
                .filter(|next| *next <= self.to);

            match compute_tax(income, self.table) {
                Ok(result) => return Some(result),
                Err(error) => warn!(
                    income = %income,
                    error = %error,
                    "Skipping tax sample"
                ),
            }
        }
    }
}

/// Samples the tax from `from` to `to` (inclusive) every `step` pesos.
///
/// # Errors
///
/// Returns [`TaxEvaluationError::InvalidRange`] if `step` is not positive or
/// `from` is greater than `to`. Individual samples never fail the range.
pub fn compute_tax_range(
    from: Decimal,
    to: Decimal,
    step: Decimal,
    table: &BracketTable,
) -> Result<TaxRange<'_>, TaxEvaluationError> {
    if step <= Decimal::ZERO || from > to {
        return Err(TaxEvaluationError::InvalidRange { from, to, step });
    }
    Ok(TaxRange {
        from,
        to,
        step,
        table,
    })
}

/// Summary figures for a bracket table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStatistics {
    pub bracket_count: usize,

    /// `(lower, upper)` of the exempt bracket, if the table has one.
    pub exempt_range: Option<(Decimal, Bound)>,

    pub highest_rate: Decimal,
    pub highest_deduction: Decimal,

    /// The last bracket, which applies to every income above it.
    pub top_bracket: Bracket,
}

/// Computes [`TableStatistics`] for `table`.
///
/// # Errors
///
/// Returns [`TaxEvaluationError::InvalidBracketTable`] if the table is empty.
pub fn table_statistics(table: &BracketTable) -> Result<TableStatistics, TaxEvaluationError> {
    let top_bracket = table
        .iter()
        .last()
        .cloned()
        .ok_or_else(|| TaxEvaluationError::InvalidBracketTable("table has no brackets".to_string()))?;

    let exempt_range = table
        .iter()
        .find(|b| b.is_exempt())
        .map(|b| (b.lower_bound, b.upper_bound));
    let highest_rate = table
        .iter()
        .map(|b| b.marginal_rate)
        .fold(Decimal::ZERO, max);
    let highest_deduction = table
        .iter()
        .map(|b| b.deduction)
        .fold(Decimal::ZERO, max);

    Ok(TableStatistics {
        bracket_count: table.len(),
        exempt_range,
        highest_rate,
        highest_deduction,
        top_bracket,
    })
}
