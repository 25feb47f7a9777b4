//! Parsing of peso amounts and rates as they appear in published tables.
//!
//! | Input | Parsed |
//! |-------|--------|
//! | `935077.50` | 935077.50 |
//! | `$935.077,50` | 935077.50 |
//! | `1.234.567` | 1234567 |
//! | `0,04` | 0.04 |
//! | `13,5%` (rates only) | 0.135 |
//!
//! A single dot without a currency sign is read as a decimal point.

use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,

    #[error("'{0}' is not a valid amount")]
    Invalid(String),

    #[error("amount pattern failed to compile: {0}")]
    Pattern(String),
}

static PLAIN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^-?\d+(?:\.\d+)?$"));

static CLP: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"^(?P<sign>-)?\$?\s*(?P<int>\d{1,3}(?:\.\d{3})+|\d+)(?:,(?P<frac>\d+))?$")
});

static PERCENT: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^(?P<num>-?\d+(?:[.,]\d+)?)\s*%$"));

fn pattern(re: &'static LazyLock<Result<Regex, regex::Error>>) -> Result<&'static Regex, AmountError> {
    LazyLock::force(re)
        .as_ref()
        .map_err(|e| AmountError::Pattern(e.to_string()))
}

fn to_decimal(
    normalized: &str,
    input: &str,
) -> Result<Decimal, AmountError> {
    normalized
        .parse::<Decimal>()
        .map_err(|_| AmountError::Invalid(input.to_string()))
}

/// Parses a plain or CLP-formatted peso amount.
///
/// # Example
///
/// ```
/// use rust_decimal_macros::dec;
/// use iu_data::amount::parse_amount;
///
/// assert_eq!(parse_amount("$2.500.000").unwrap(), dec!(2500000));
/// assert_eq!(parse_amount("2077950.01").unwrap(), dec!(2077950.01));
/// ```
pub fn parse_amount(input: &str) -> Result<Decimal, AmountError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Empty);
    }

    if pattern(&PLAIN)?.is_match(trimmed) {
        return to_decimal(trimmed, input);
    }

    let captures = pattern(&CLP)?
        .captures(trimmed)
        .ok_or_else(|| AmountError::Invalid(input.to_string()))?;
    let sign = captures.name("sign").map_or("", |m| m.as_str());
    let int = captures
        .name("int")
        .map_or(String::new(), |m| m.as_str().replace('.', ""));
    let normalized = match captures.name("frac") {
        Some(frac) => format!("{sign}{int}.{}", frac.as_str()),
        None => format!("{sign}{int}"),
    };
    to_decimal(&normalized, input)
}

/// Parses a rate given as a fraction (`0.135`, `0,135`) or a percentage
/// (`13,5%`).
pub fn parse_rate(input: &str) -> Result<Decimal, AmountError> {
    let trimmed = input.trim();
    if let Some(captures) = pattern(&PERCENT)?.captures(trimmed) {
        let num = captures
            .name("num")
            .map_or(String::new(), |m| m.as_str().replace(',', "."));
        return Ok(to_decimal(&num, input)? / Decimal::ONE_HUNDRED);
    }
    parse_amount(trimmed)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn parses_plain_decimals() {
        assert_eq!(parse_amount("935077.50"), Ok(dec!(935077.50)));
        assert_eq!(parse_amount(" 0 "), Ok(dec!(0)));
        assert_eq!(parse_amount("-12.5"), Ok(dec!(-12.5)));
    }

    #[test]
    fn parses_clp_formatted_amounts() {
        assert_eq!(parse_amount("$935.077,50"), Ok(dec!(935077.50)));
        assert_eq!(parse_amount("$ 2.500.000"), Ok(dec!(2500000)));
        assert_eq!(parse_amount("1.234.567"), Ok(dec!(1234567)));
        assert_eq!(parse_amount("-$1.500"), Ok(dec!(-1500)));
        assert_eq!(parse_amount("$1.234"), Ok(dec!(1234)));
    }

    #[test]
    fn single_dot_without_sign_is_decimal_point() {
        assert_eq!(parse_amount("1.234"), Ok(dec!(1.234)));
    }

    #[test]
    fn comma_is_decimal_separator() {
        assert_eq!(parse_amount("0,04"), Ok(dec!(0.04)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_amount(""), Err(AmountError::Empty));
        assert_eq!(
            parse_amount("12.34.5"),
            Err(AmountError::Invalid("12.34.5".to_string()))
        );
        assert_eq!(
            parse_amount("abc"),
            Err(AmountError::Invalid("abc".to_string()))
        );
    }

    #[test]
    fn parses_rates() {
        assert_eq!(parse_rate("0.135"), Ok(dec!(0.135)));
        assert_eq!(parse_rate("13,5%"), Ok(dec!(0.135)));
        assert_eq!(parse_rate("4 %"), Ok(dec!(0.04)));
    }
}
