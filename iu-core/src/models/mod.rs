mod bracket;
mod period;
mod reference;

pub use bracket::{Bound, Bracket, BracketInfo, BracketTable, MaxEffectiveRate, UNBOUNDED_SENTINEL};
pub use period::{MAX_YEAR, MIN_YEAR, Period, PeriodError};
pub use reference::{
    BracketTableDocument, CurrencyUnitValues, ParameterError, Provenance, ReferenceParameters,
};
