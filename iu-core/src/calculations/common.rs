//! Common utility functions for tax calculations.
//!
//! This module provides shared rounding and formatting used by the tax
//! evaluator, the APV calculator and the display helpers on the models.

use rust_decimal::{Decimal, RoundingStrategy};

/// Rounds a decimal value to exactly two decimal places using half-up rounding.
///
/// Values at exactly 0.005 are rounded away from zero.
///
/// # Examples
///
/// ```
/// use rust_decimal_macros::dec;
/// use iu_core::calculations::common::round_half_up;
///
/// assert_eq!(round_half_up(dec!(123.454)), dec!(123.45));
/// assert_eq!(round_half_up(dec!(123.455)), dec!(123.46));
/// assert_eq!(round_half_up(dec!(-123.455)), dec!(-123.46)); // Away from zero
/// ```
pub fn round_half_up(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Rounds a peso amount to the nearest whole peso.
///
/// Half a peso rounds up, matching how the monthly tax is published.
///
/// # Examples
///
/// ```
/// use rust_decimal_macros::dec;
/// use iu_core::calculations::common::round_to_peso;
///
/// assert_eq!(round_to_peso(dec!(79478.90)), dec!(79479));
/// assert_eq!(round_to_peso(dec!(0.49)), dec!(0));
/// assert_eq!(round_to_peso(dec!(0.5)), dec!(1));
/// ```
pub fn round_to_peso(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// Returns the maximum of two decimal values.
///
/// # Examples
///
/// ```
/// use rust_decimal_macros::dec;
/// use iu_core::calculations::common::max;
///
/// assert_eq!(max(dec!(100.00), dec!(200.00)), dec!(200.00));
/// assert_eq!(max(dec!(-100.00), dec!(-200.00)), dec!(-100.00));
/// ```
pub fn max(
    a: Decimal,
    b: Decimal,
) -> Decimal {
    if a > b { a } else { b }
}

/// Formats a peso amount with Chilean grouping, e.g. `$2.500.000`.
///
/// The amount is rounded to whole pesos first.
///
/// # Examples
///
/// ```
/// use rust_decimal_macros::dec;
/// use iu_core::calculations::common::format_clp;
///
/// assert_eq!(format_clp(dec!(2500000)), "$2.500.000");
/// assert_eq!(format_clp(dec!(0)), "$0");
/// ```
pub fn format_clp(value: Decimal) -> String {
    let rounded = round_to_peso(value);
    let digits = rounded.abs().trunc().to_string();

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 2);
    if rounded < Decimal::ZERO {
        grouped.push('-');
    }
    grouped.push('$');
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    grouped
}

/// Formats a fractional rate as a percentage with two decimals,
/// e.g. `0.0318` becomes `3.18%`.
pub fn format_percentage(rate: Decimal) -> String {
    let mut pct = round_half_up(rate * Decimal::ONE_HUNDRED);
    pct.rescale(2);
    format!("{pct}%")
}

/// Formats a marginal rate ("factor") with four decimals, e.g. `0.1350`.
pub fn format_factor(rate: Decimal) -> String {
    let mut factor = rate.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero);
    factor.rescale(4);
    factor.to_string()
}
