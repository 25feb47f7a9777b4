//! Monthly income tax evaluation, bracket table validation and the APV
//! regime comparison built on top of them.

pub mod apv;
pub mod common;
pub mod tax;
pub mod validation;

pub use apv::{
    ApvCalculator, ApvError, BonusDetail, ComparisonRow, ComparisonTable, DEFAULT_MILESTONES,
    DeductionDetail, MAX_PROJECTION_YEARS, Projection, ProjectionSchedule, ProjectionYear,
    REGIME_A_BONUS_RATE, Regime, RegimeBenefit, RegimeComparison, RegimeDetail,
};
pub use tax::{
    BOUNDARY_TOLERANCE, MAX_INCOME, TableStatistics, TaxEvaluationError, TaxRange, TaxRangeIter,
    TaxResult, applied_bracket_index, compute_tax, compute_tax_range, table_statistics,
};
pub use validation::{
    BracketViolation, CONTINUITY_TOLERANCE, EXPECTED_BRACKET_COUNT, ViolationKind, validate_structure,
    validated,
};
