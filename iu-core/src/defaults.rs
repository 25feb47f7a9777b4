//! Embedded reference data used when the provider cannot supply a table.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::{Bound, Bracket, BracketTable, MaxEffectiveRate};

/// `(desde, hasta, factor, rebaja, tasa efectiva máxima)`.
type Row = (Decimal, Option<Decimal>, Decimal, Decimal, MaxEffectiveRate);

fn rows() -> [Row; 8] {
    use MaxEffectiveRate::{Above, Exempt, Percentage};

    [
        (dec!(0), Some(dec!(935077.50)), dec!(0), dec!(0), Exempt),
        (dec!(935077.51), Some(dec!(2077950)), dec!(0.04), dec!(37403.10), Percentage(dec!(2.20))),
        (dec!(2077950.01), Some(dec!(3463250)), dec!(0.08), dec!(120521.10), Percentage(dec!(4.52))),
        (dec!(3463250.01), Some(dec!(4848550)), dec!(0.135), dec!(272540.10), Percentage(dec!(7.88))),
        (dec!(4848550.01), Some(dec!(6233850)), dec!(0.23), dec!(676540.10), Percentage(dec!(12.15))),
        (dec!(6233850.01), Some(dec!(7619150)), dec!(0.304), dec!(1021540.10), Percentage(dec!(16.99))),
        (dec!(7619150.01), Some(dec!(9004450)), dec!(0.35), dec!(1341540.10), Percentage(dec!(20.10))),
        (dec!(9004450.01), None, dec!(0.4), dec!(1741540.10), Above(dec!(20.10))),
    ]
}

/// The monthly Impuesto Único table published for 2025.
pub fn reference_bracket_table() -> BracketTable {
    let brackets = rows()
        .into_iter()
        .zip(1u32..)
        .map(|((lower, upper, rate, deduction, max_rate), index)| Bracket {
            index,
            lower_bound: lower,
            upper_bound: upper.map_or(Bound::Unbounded, Bound::Finite),
            marginal_rate: rate,
            deduction,
            max_effective_rate: Some(max_rate),
        })
        .collect();
    BracketTable::new(brackets)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn reference_table_has_eight_ordered_brackets() {
        let table = reference_bracket_table();

        let indices: Vec<u32> = table.iter().map(|b| b.index).collect();

        assert_eq!(indices, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn only_the_last_bracket_is_open() {
        let table = reference_bracket_table();

        let open: Vec<u32> = table
            .iter()
            .filter(|b| b.upper_bound.is_unbounded())
            .map(|b| b.index)
            .collect();

        assert_eq!(open, vec![8]);
    }
}
