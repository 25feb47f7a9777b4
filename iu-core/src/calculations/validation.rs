//! Structural validation of bracket tables.
//!
//! A table must pass these checks before it is stored or activated. Every
//! violation is collected so an editor can show all problems at once.
//!
//! | Rule | Applies to | Violation |
//! |------|------------|-----------|
//! | exactly 8 brackets | table | `WrongBracketCount` |
//! | lower bound 0 for the exempt bracket, `>= 0` elsewhere | 1..8 | `InvalidLowerBound` |
//! | finite upper bound greater than the lower bound | 2..7 | `InvalidUpperBound` |
//! | starts where the previous bracket ends (±0.01) | 3..8 | `DiscontinuousBracket` |
//! | rate exactly 0 | 1 | `ExemptRateNonZero` |
//! | rate in `(0, 1]` | 2..8 | `InvalidRate` |
//! | rate not below the previous rate | 3..8 | `NonIncreasingRate` |
//! | deduction `>= 0` | all | `InvalidDeduction` |

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::models::{Bound, Bracket, BracketTable};

/// Number of brackets in a complete monthly table.
pub const EXPECTED_BRACKET_COUNT: usize = 8;

/// Largest gap allowed between one bracket's upper bound and the next
/// bracket's lower bound.
pub const CONTINUITY_TOLERANCE: Decimal = dec!(0.01);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViolationKind {
    WrongBracketCount,
    InvalidLowerBound,
    InvalidUpperBound,
    DiscontinuousBracket,
    ExemptRateNonZero,
    InvalidRate,
    NonIncreasingRate,
    InvalidDeduction,
}

/// A single failed rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BracketViolation {
    /// 1-based bracket position, or `None` for table-level problems.
    pub bracket: Option<usize>,
    pub kind: ViolationKind,
    pub description: String,
}

impl BracketViolation {
    fn table(
        kind: ViolationKind,
        description: String,
    ) -> Self {
        Self {
            bracket: None,
            kind,
            description,
        }
    }

    fn at(
        position: usize,
        kind: ViolationKind,
        description: String,
    ) -> Self {
        Self {
            bracket: Some(position),
            kind,
            description,
        }
    }
}

impl fmt::Display for BracketViolation {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self.bracket {
            Some(position) => write!(f, "bracket {position}: {}", self.description),
            None => write!(f, "{}", self.description),
        }
    }
}

/// Checks `table` against the structural rules and returns every violation.
///
/// An empty result means the table is valid.
///
/// # Example
///
/// ```
/// use iu_core::calculations::{ViolationKind, validate_structure};
/// use iu_core::BracketTable;
///
/// let violations = validate_structure(&BracketTable::new(Vec::new()));
///
/// assert_eq!(violations[0].kind, ViolationKind::WrongBracketCount);
/// ```
pub fn validate_structure(table: &BracketTable) -> Vec<BracketViolation> {
    let brackets = table.brackets();
    let mut violations = Vec::new();

    if brackets.len() != EXPECTED_BRACKET_COUNT {
        violations.push(BracketViolation::table(
            ViolationKind::WrongBracketCount,
            format!(
                "table must have exactly {EXPECTED_BRACKET_COUNT} brackets, found {}",
                brackets.len()
            ),
        ));
    }

    for (i, bracket) in brackets.iter().enumerate() {
        let position = i + 1;
        let previous = i.checked_sub(1).map(|p| &brackets[p]);

        check_bounds(position, bracket, previous, &mut violations);
        check_rate(position, bracket, previous, &mut violations);

        if bracket.deduction < Decimal::ZERO {
            violations.push(BracketViolation::at(
                position,
                ViolationKind::InvalidDeduction,
                format!("deduction must be zero or positive, got {}", bracket.deduction),
            ));
        }
    }

    violations
}

/// Returns the table unchanged if it passes [`validate_structure`].
///
/// # Errors
///
/// Returns every violation found.
pub fn validated(table: BracketTable) -> Result<BracketTable, Vec<BracketViolation>> {
    let violations = validate_structure(&table);
    if violations.is_empty() {
        Ok(table)
    } else {
        Err(violations)
    }
}

fn check_bounds(
    position: usize,
    bracket: &Bracket,
    previous: Option<&Bracket>,
    violations: &mut Vec<BracketViolation>,
) {
    if position == 1 {
        if !bracket.lower_bound.is_zero() {
            violations.push(BracketViolation::at(
                position,
                ViolationKind::InvalidLowerBound,
                format!("exempt bracket must start at 0, got {}", bracket.lower_bound),
            ));
        }
        return;
    }

    if bracket.lower_bound < Decimal::ZERO {
        violations.push(BracketViolation::at(
            position,
            ViolationKind::InvalidLowerBound,
            format!("lower bound must be zero or positive, got {}", bracket.lower_bound),
        ));
    }

    // The top bracket's upper bound is open.
    if position < EXPECTED_BRACKET_COUNT {
        let valid_upper = matches!(bracket.upper_bound, Bound::Finite(upper) if upper > bracket.lower_bound);
        if !valid_upper {
            violations.push(BracketViolation::at(
                position,
                ViolationKind::InvalidUpperBound,
                format!(
                    "upper bound must be greater than lower bound {}, got {}",
                    bracket.lower_bound, bracket.upper_bound
                ),
            ));
        }
    }

    // The exempt bracket is fixed at zero, so continuity starts at bracket 3.
    if position > 2 {
        if let Some(previous) = previous {
            let continuous = match previous.upper_bound {
                Bound::Finite(prev_upper) => {
                    (bracket.lower_bound - prev_upper).abs() <= CONTINUITY_TOLERANCE
                }
                Bound::Unbounded => false,
            };
            if !continuous {
                violations.push(BracketViolation::at(
                    position,
                    ViolationKind::DiscontinuousBracket,
                    format!(
                        "must start where bracket {} ends ({}), got {}",
                        position - 1,
                        previous.upper_bound,
                        bracket.lower_bound
                    ),
                ));
            }
        }
    }
}

fn check_rate(
    position: usize,
    bracket: &Bracket,
    previous: Option<&Bracket>,
    violations: &mut Vec<BracketViolation>,
) {
    if position == 1 {
        if !bracket.marginal_rate.is_zero() {
            violations.push(BracketViolation::at(
                position,
                ViolationKind::ExemptRateNonZero,
                format!("exempt bracket rate must be 0, got {}", bracket.marginal_rate),
            ));
        }
        return;
    }

    if bracket.marginal_rate <= Decimal::ZERO || bracket.marginal_rate > Decimal::ONE {
        violations.push(BracketViolation::at(
            position,
            ViolationKind::InvalidRate,
            format!(
                "rate must be greater than 0 and at most 1, got {}",
                bracket.marginal_rate
            ),
        ));
    }

    if position > 2 {
        if let Some(previous) = previous {
            if bracket.marginal_rate < previous.marginal_rate {
                violations.push(BracketViolation::at(
                    position,
                    ViolationKind::NonIncreasingRate,
                    format!(
                        "rate {} is below bracket {} rate {}",
                        bracket.marginal_rate,
                        position - 1,
                        previous.marginal_rate
                    ),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::defaults::reference_bracket_table;

    fn kinds(violations: &[BracketViolation]) -> Vec<(Option<usize>, ViolationKind)> {
        violations.iter().map(|v| (v.bracket, v.kind)).collect()
    }

    fn edited(edit: impl FnOnce(&mut Vec<Bracket>)) -> BracketTable {
        let mut brackets: Vec<Bracket> = reference_bracket_table().into();
        edit(&mut brackets);
        BracketTable::new(brackets)
    }

    #[test]
    fn reference_table_is_valid() {
        assert_eq!(validate_structure(&reference_bracket_table()), Vec::new());
    }

    #[test]
    fn seven_brackets_fail_count_check() {
        let table = edited(|b| {
            b.pop();
        });

        let violations = validate_structure(&table);

        assert_eq!(
            violations[0].kind,
            ViolationKind::WrongBracketCount,
            "{violations:?}"
        );
        assert_eq!(violations[0].bracket, None);
    }

    #[test]
    fn seven_brackets_also_flag_open_seventh_upper_bound() {
        let table = edited(|b| {
            b.pop();
            b[6].upper_bound = Bound::Unbounded;
        });

        let violations = validate_structure(&table);

        assert_eq!(
            kinds(&violations),
            vec![
                (None, ViolationKind::WrongBracketCount),
                (Some(7), ViolationKind::InvalidUpperBound),
            ]
        );
    }

    #[test]
    fn non_zero_exempt_rate_is_rejected() {
        let table = edited(|b| b[0].marginal_rate = dec!(0.01));

        assert_eq!(
            kinds(&validate_structure(&table)),
            vec![(Some(1), ViolationKind::ExemptRateNonZero)]
        );
    }

    #[test]
    fn exempt_bracket_must_start_at_zero() {
        let table = edited(|b| b[0].lower_bound = dec!(10));

        assert_eq!(
            kinds(&validate_structure(&table)),
            vec![(Some(1), ViolationKind::InvalidLowerBound)]
        );
    }

    #[test]
    fn negative_lower_bound_is_rejected() {
        let table = edited(|b| b[1].lower_bound = dec!(-1));

        assert_eq!(
            kinds(&validate_structure(&table)),
            vec![(Some(2), ViolationKind::InvalidLowerBound)]
        );
    }

    #[test]
    fn upper_bound_not_above_lower_is_rejected() {
        let table = edited(|b| b[1].upper_bound = Bound::Finite(b[1].lower_bound));

        let violations = validate_structure(&table);

        // Bracket 3 no longer starts where bracket 2 ends either.
        assert_eq!(
            kinds(&violations),
            vec![
                (Some(2), ViolationKind::InvalidUpperBound),
                (Some(3), ViolationKind::DiscontinuousBracket),
            ]
        );
    }

    #[test]
    fn last_bracket_upper_bound_is_not_checked() {
        let table = edited(|b| b[7].upper_bound = Bound::Finite(dec!(1)));

        assert_eq!(validate_structure(&table), Vec::new());
    }

    #[test]
    fn gap_larger_than_tolerance_is_discontinuous() {
        let table = edited(|b| b[4].lower_bound += dec!(0.02));

        assert_eq!(
            kinds(&validate_structure(&table)),
            vec![(Some(5), ViolationKind::DiscontinuousBracket)]
        );
    }

    #[test]
    fn gap_of_one_cent_is_continuous() {
        let table = edited(|b| {
            let upper = b[2].upper_bound.finite().unwrap();
            b[3].lower_bound = upper + dec!(0.01);
        });

        assert_eq!(validate_structure(&table), Vec::new());
    }

    #[test]
    fn rate_above_one_is_rejected() {
        let table = edited(|b| b[7].marginal_rate = dec!(1.5));

        assert_eq!(
            kinds(&validate_structure(&table)),
            vec![(Some(8), ViolationKind::InvalidRate)]
        );
    }

    #[test]
    fn decreasing_rate_is_rejected() {
        let table = edited(|b| b[5].marginal_rate = dec!(0.2));

        assert_eq!(
            kinds(&validate_structure(&table)),
            vec![(Some(6), ViolationKind::NonIncreasingRate)]
        );
    }

    #[test]
    fn zero_rate_outside_exempt_bracket_is_rejected() {
        let table = edited(|b| b[1].marginal_rate = dec!(0));

        assert_eq!(
            kinds(&validate_structure(&table)),
            vec![(Some(2), ViolationKind::InvalidRate)]
        );
    }

    #[test]
    fn negative_deduction_is_rejected() {
        let table = edited(|b| b[3].deduction = dec!(-5));

        assert_eq!(
            kinds(&validate_structure(&table)),
            vec![(Some(4), ViolationKind::InvalidDeduction)]
        );
    }

    #[test]
    fn all_violations_are_reported() {
        let table = edited(|b| {
            b[0].marginal_rate = dec!(0.01);
            b[3].deduction = dec!(-5);
            b[7].marginal_rate = dec!(2);
        });

        assert_eq!(
            kinds(&validate_structure(&table)),
            vec![
                (Some(1), ViolationKind::ExemptRateNonZero),
                (Some(4), ViolationKind::InvalidDeduction),
                (Some(8), ViolationKind::InvalidRate),
            ]
        );
    }

    #[test]
    fn violation_display_names_the_bracket() {
        let table = edited(|b| b[3].deduction = dec!(-5));

        let violations = validate_structure(&table);

        assert_eq!(
            violations[0].to_string(),
            "bracket 4: deduction must be zero or positive, got -5"
        );
    }

    #[test]
    fn validated_returns_table_when_clean() {
        let table = reference_bracket_table();

        assert_eq!(validated(table.clone()), Ok(table));
    }
}
