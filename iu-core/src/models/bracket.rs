use std::fmt;

use rust_decimal::Decimal;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::calculations::common::{format_clp, format_factor};

/// Numeric sentinel the published tables use for "and above".
pub const UNBOUNDED_SENTINEL: i64 = 999_999_999;

/// Upper edge of a bracket.
///
/// External tables encode the open top of the last bracket as `null`, as the
/// sentinel `999999999`, or as a label such as `"Y MÁS"`. All of those become
/// [`Bound::Unbounded`] on ingestion so evaluation never sees the ambiguity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Finite(Decimal),
    Unbounded,
}

impl Bound {
    /// Normalizes a numeric upper bound, mapping the sentinel to `Unbounded`.
    pub fn from_amount(amount: Decimal) -> Self {
        if amount >= Decimal::from(UNBOUNDED_SENTINEL) {
            Self::Unbounded
        } else {
            Self::Finite(amount)
        }
    }

    /// Normalizes a textual upper bound.
    ///
    /// Returns `None` if the label is neither a number nor a known
    /// "and above" marker.
    pub fn from_label(label: &str) -> Option<Self> {
        let trimmed = label.trim();
        if trimmed.is_empty() {
            return Some(Self::Unbounded);
        }
        if let Ok(amount) = trimmed.parse::<Decimal>() {
            return Some(Self::from_amount(amount));
        }
        let upper = trimmed.to_uppercase();
        let markers = ["MÁS", "MAS", "ADELANTE", "INFINITY", "∞"];
        if markers.iter().any(|m| upper.contains(m)) {
            Some(Self::Unbounded)
        } else {
            None
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Self::Unbounded)
    }

    pub fn finite(&self) -> Option<Decimal> {
        match self {
            Self::Finite(v) => Some(*v),
            Self::Unbounded => None,
        }
    }

    /// Whether `value` lies at or below this bound.
    pub fn admits(
        &self,
        value: Decimal,
    ) -> bool {
        match self {
            Self::Finite(upper) => value <= *upper,
            Self::Unbounded => true,
        }
    }
}

impl fmt::Display for Bound {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Finite(v) => write!(f, "{v}"),
            Self::Unbounded => write!(f, "unbounded"),
        }
    }
}

impl Serialize for Bound {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match self {
            Self::Finite(v) => rust_decimal::serde::float::serialize(v, serializer),
            Self::Unbounded => serializer.serialize_i64(UNBOUNDED_SENTINEL),
        }
    }
}

impl<'de> Deserialize<'de> for Bound {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Amount(Decimal),
            Label(String),
        }

        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(Self::Unbounded),
            Some(Raw::Amount(amount)) => Ok(Self::from_amount(amount)),
            Some(Raw::Label(label)) => Self::from_label(&label)
                .ok_or_else(|| de::Error::custom(format!("unrecognised upper bound '{label}'"))),
        }
    }
}

/// Reference "maximum effective rate" printed next to each bracket.
///
/// Informational only; never used when computing tax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaxEffectiveRate {
    Exempt,
    /// Percentage points, e.g. `4.52` for 4,52%.
    Percentage(Decimal),
    /// Open-ended top bracket, e.g. "Más de 20,10%".
    Above(Decimal),
}

impl MaxEffectiveRate {
    pub fn parse(label: &str) -> Option<Self> {
        let upper = label.trim().to_uppercase();
        if upper.is_empty() {
            return None;
        }
        if upper.starts_with("EXENTO") || upper.starts_with("EXEMPT") {
            return Some(Self::Exempt);
        }
        let digits: String = upper
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
            .collect::<String>()
            .replace(',', ".");
        let value = digits.trim_matches('.').parse::<Decimal>().ok()?;
        if upper.contains("MÁS") || upper.contains("MAS") || upper.contains("ABOVE") {
            Some(Self::Above(value))
        } else {
            Some(Self::Percentage(value))
        }
    }
}

impl fmt::Display for MaxEffectiveRate {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Exempt => write!(f, "Exento"),
            Self::Percentage(p) => write!(f, "{}%", p.to_string().replace('.', ",")),
            Self::Above(p) => write!(f, "Más de {}%", p.to_string().replace('.', ",")),
        }
    }
}

impl Serialize for MaxEffectiveRate {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match self {
            Self::Percentage(p) => rust_decimal::serde::float::serialize(p, serializer),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for MaxEffectiveRate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Amount(Decimal),
            Label(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Amount(p) => Ok(Self::Percentage(p)),
            Raw::Label(label) => Self::parse(&label).ok_or_else(|| {
                de::Error::custom(format!("unrecognised effective rate '{label}'"))
            }),
        }
    }
}

/// One tier ("tramo") of the monthly tax table.
///
/// Field names on the wire follow the published table format:
/// `{ numero, desde, hasta, factor, rebaja, tasaEfectivaMax? }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bracket {
    /// 1-based position defining evaluation order.
    #[serde(rename = "numero")]
    pub index: u32,

    /// Inclusive lower edge in pesos.
    #[serde(rename = "desde", with = "rust_decimal::serde::float")]
    pub lower_bound: Decimal,

    /// Inclusive upper edge in pesos.
    #[serde(rename = "hasta")]
    pub upper_bound: Bound,

    /// Marginal rate as a fraction; zero only for the exempt bracket.
    #[serde(rename = "factor", with = "rust_decimal::serde::float")]
    pub marginal_rate: Decimal,

    /// Fixed amount ("rebaja") subtracted after applying the rate.
    #[serde(rename = "rebaja", with = "rust_decimal::serde::float")]
    pub deduction: Decimal,

    #[serde(
        rename = "tasaEfectivaMax",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_effective_rate: Option<MaxEffectiveRate>,
}

impl Bracket {
    pub fn is_exempt(&self) -> bool {
        self.marginal_rate.is_zero()
    }

    /// Whether `income` falls inside `[lower_bound, upper_bound]`.
    pub fn contains(
        &self,
        income: Decimal,
    ) -> bool {
        income >= self.lower_bound && self.upper_bound.admits(income)
    }
}

/// Display view of a single bracket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BracketInfo {
    pub index: u32,
    pub label: String,
    pub bracket: Bracket,
    pub lower_formatted: String,
    pub upper_formatted: String,
    pub rate_formatted: String,
    pub deduction_formatted: String,
    pub max_effective_rate_formatted: String,
}

/// Ordered list of brackets for one period.
///
/// Construction only orders the brackets by `index`; structural rules are
/// checked separately by [`crate::calculations::validate_structure`] so that
/// malformed tables can be reported in full rather than rejected on the
/// first problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Bracket>", into = "Vec<Bracket>")]
pub struct BracketTable {
    brackets: Vec<Bracket>,
}

impl BracketTable {
    pub fn new(mut brackets: Vec<Bracket>) -> Self {
        brackets.sort_by_key(|b| b.index);
        Self { brackets }
    }

    pub fn brackets(&self) -> &[Bracket] {
        &self.brackets
    }

    pub fn len(&self) -> usize {
        self.brackets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brackets.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Bracket> {
        self.brackets.iter()
    }

    /// Bracket at a 0-based position.
    pub fn get(
        &self,
        position: usize,
    ) -> Option<&Bracket> {
        self.brackets.get(position)
    }

    /// Display details for the bracket at a 0-based position.
    pub fn bracket_info(
        &self,
        position: usize,
    ) -> Option<BracketInfo> {
        let bracket = self.brackets.get(position)?;
        let upper_formatted = match bracket.upper_bound {
            Bound::Finite(v) => format_clp(v),
            Bound::Unbounded => "En adelante".to_string(),
        };
        let max_effective_rate_formatted = bracket
            .max_effective_rate
            .as_ref()
            .map_or_else(|| "N/A".to_string(), |r| r.to_string());

        Some(BracketInfo {
            index: bracket.index,
            label: format!("Tramo {}", position + 1),
            lower_formatted: format_clp(bracket.lower_bound),
            upper_formatted,
            rate_formatted: format_factor(bracket.marginal_rate),
            deduction_formatted: format_clp(bracket.deduction),
            max_effective_rate_formatted,
            bracket: bracket.clone(),
        })
    }
}

impl From<Vec<Bracket>> for BracketTable {
    fn from(brackets: Vec<Bracket>) -> Self {
        Self::new(brackets)
    }
}

impl From<BracketTable> for Vec<Bracket> {
    fn from(table: BracketTable) -> Self {
        table.brackets
    }
}

impl<'a> IntoIterator for &'a BracketTable {
    type Item = &'a Bracket;
    type IntoIter = std::slice::Iter<'a, Bracket>;

    fn into_iter(self) -> Self::IntoIter {
        self.brackets.iter()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;

    fn bracket(
        index: u32,
        lower: Decimal,
        upper: Bound,
        rate: Decimal,
        deduction: Decimal,
    ) -> Bracket {
        Bracket {
            index,
            lower_bound: lower,
            upper_bound: upper,
            marginal_rate: rate,
            deduction,
            max_effective_rate: None,
        }
    }

    // =========================================================================
    // Bound normalisation
    // =========================================================================

    #[test]
    fn from_amount_maps_sentinel_to_unbounded() {
        assert_eq!(Bound::from_amount(dec!(999999999)), Bound::Unbounded);
        assert_eq!(
            Bound::from_amount(dec!(2077950.00)),
            Bound::Finite(dec!(2077950.00))
        );
    }

    #[test]
    fn from_label_recognises_and_above_markers() {
        assert_eq!(Bound::from_label("Y MÁS"), Some(Bound::Unbounded));
        assert_eq!(Bound::from_label("y mas"), Some(Bound::Unbounded));
        assert_eq!(Bound::from_label("En adelante"), Some(Bound::Unbounded));
        assert_eq!(Bound::from_label(""), Some(Bound::Unbounded));
        assert_eq!(
            Bound::from_label("935077.50"),
            Some(Bound::Finite(dec!(935077.50)))
        );
        assert_eq!(Bound::from_label("tope"), None);
    }

    #[test]
    fn bound_deserializes_every_external_encoding() {
        let null: Bound = serde_json::from_str("null").unwrap();
        let sentinel: Bound = serde_json::from_str("999999999").unwrap();
        let label: Bound = serde_json::from_str("\"Y MÁS\"").unwrap();
        let number: Bound = serde_json::from_str("2077950.0").unwrap();

        assert_eq!(null, Bound::Unbounded);
        assert_eq!(sentinel, Bound::Unbounded);
        assert_eq!(label, Bound::Unbounded);
        assert_eq!(number, Bound::Finite(dec!(2077950)));
    }

    #[test]
    fn bound_rejects_unknown_label() {
        let result: Result<Bound, _> = serde_json::from_str("\"sin tope\"");

        assert!(result.is_err());
    }

    #[test]
    fn unbounded_serializes_as_sentinel() {
        let json = serde_json::to_string(&Bound::Unbounded).unwrap();

        assert_eq!(json, "999999999");
    }

    // =========================================================================
    // MaxEffectiveRate
    // =========================================================================

    #[test]
    fn max_effective_rate_parses_labels() {
        assert_eq!(MaxEffectiveRate::parse("Exento"), Some(MaxEffectiveRate::Exempt));
        assert_eq!(
            MaxEffectiveRate::parse("4,52%"),
            Some(MaxEffectiveRate::Percentage(dec!(4.52)))
        );
        assert_eq!(
            MaxEffectiveRate::parse("Más de 20,10%"),
            Some(MaxEffectiveRate::Above(dec!(20.10)))
        );
        assert_eq!(MaxEffectiveRate::parse("n/a"), None);
    }

    #[test]
    fn max_effective_rate_displays_with_decimal_comma() {
        assert_eq!(MaxEffectiveRate::Above(dec!(20.10)).to_string(), "Más de 20,10%");
        assert_eq!(MaxEffectiveRate::Percentage(dec!(2.2)).to_string(), "2,2%");
    }

    // =========================================================================
    // Bracket / BracketTable
    // =========================================================================

    #[test]
    fn bracket_deserializes_from_published_shape() {
        let json = r#"{"numero": 2, "desde": 935077.51, "hasta": 2077950.00,
                       "factor": 0.04, "rebaja": 37403.10, "tasaEfectivaMax": "2,20%"}"#;

        let parsed: Bracket = serde_json::from_str(json).unwrap();

        assert_eq!(
            parsed,
            Bracket {
                max_effective_rate: Some(MaxEffectiveRate::Percentage(dec!(2.20))),
                ..bracket(
                    2,
                    dec!(935077.51),
                    Bound::Finite(dec!(2077950)),
                    dec!(0.04),
                    dec!(37403.10)
                )
            }
        );
    }

    #[test]
    fn table_orders_brackets_by_index() {
        let table = BracketTable::new(vec![
            bracket(2, dec!(100), Bound::Unbounded, dec!(0.1), dec!(10)),
            bracket(1, dec!(0), Bound::Finite(dec!(100)), dec!(0), dec!(0)),
        ]);

        let indices: Vec<u32> = table.iter().map(|b| b.index).collect();

        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn table_deserialization_also_orders_brackets() {
        let json = r#"[
            {"numero": 2, "desde": 100, "hasta": null, "factor": 0.1, "rebaja": 10},
            {"numero": 1, "desde": 0, "hasta": 100, "factor": 0, "rebaja": 0}
        ]"#;

        let table: BracketTable = serde_json::from_str(json).unwrap();

        assert_eq!(table.get(0).map(|b| b.index), Some(1));
        assert_eq!(table.get(1).map(|b| b.upper_bound), Some(Bound::Unbounded));
    }

    #[test]
    fn bracket_info_formats_unbounded_top() {
        let table = BracketTable::new(vec![
            bracket(1, dec!(0), Bound::Finite(dec!(935077.50)), dec!(0), dec!(0)),
            bracket(2, dec!(935077.51), Bound::Unbounded, dec!(0.04), dec!(37403.10)),
        ]);

        let info = table.bracket_info(1).unwrap();

        assert_eq!(info.label, "Tramo 2");
        assert_eq!(info.lower_formatted, "$935.078");
        assert_eq!(info.upper_formatted, "En adelante");
        assert_eq!(info.rate_formatted, "0.0400");
        assert_eq!(info.max_effective_rate_formatted, "N/A");
        assert!(table.bracket_info(2).is_none());
    }
}
