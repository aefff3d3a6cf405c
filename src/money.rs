//! Currency helpers. All monetary values are exact decimals; floats never
//! enter the arithmetic.

use rust_decimal::Decimal;

/// Floors a monetary value at zero.
pub fn clamp_non_negative(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO)
}

/// Formats an amount in meticais with thousands separators, e.g. `MT 1.234,50`.
pub fn format_mzn(amount: Decimal) -> String {
    let rounded = amount.round_dp(2);
    let raw = format!("{rounded:.2}");
    let (int_part, frac_part) = raw.split_once('.').unwrap_or((raw.as_str(), "00"));
    let (sign, digits) = match int_part.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", int_part),
    };

    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }

    format!("MT {sign}{grouped},{frac_part}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    #[test]
    fn clamps_negative_values_to_zero() {
        assert_eq!(clamp_non_negative(dec!(-10.50)), Decimal::ZERO);
        assert_eq!(clamp_non_negative(dec!(10.50)), dec!(10.50));
    }

    #[test_case(dec!(1234.5), "MT 1.234,50" ; "grouped thousands")]
    #[test_case(dec!(250), "MT 250,00" ; "no grouping below a thousand")]
    #[test_case(dec!(1000000), "MT 1.000.000,00" ; "millions")]
    #[test_case(dec!(-42.1), "MT -42,10" ; "negative amounts keep the sign")]
    fn formats_with_portuguese_separators(amount: Decimal, expected: &str) {
        assert_eq!(format_mzn(amount), expected);
    }
}
