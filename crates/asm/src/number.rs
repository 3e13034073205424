/// Parses a numeric literal as a 64-bit signed integer.
///
/// Literals take the form `BASE#digits` with `BASE` one of 2, 8, 10 or 16 in
/// decimal; without a prefix the base is 10. Underscores in the digits are
/// readability separators and are ignored.
pub fn parse_number(value: &str) -> Result<i64, String> {
    let (sign, magnitude) = match value.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, value.strip_prefix('+').unwrap_or(value)),
    };

    let (base, digits) = split_number(magnitude);
    if !(2..=36).contains(&base) {
        return Err(format!("invalid base {base} in literal {value:?}"));
    }
    i64::from_str_radix(&digits, base)
        .map(|parsed| sign * parsed)
        .map_err(|err| format!("invalid number {value:?}: {err}"))
}

/// Splits a literal into its base and digit string. Defaults to base 10 when
/// there is no prefix or the prefix is not a valid number.
pub fn split_number(value: &str) -> (u32, String) {
    match value.split_once('#') {
        None => (10, value.to_string()),
        Some((base, digits)) => {
            let base = base.parse::<u32>().unwrap_or(10);
            (base, digits.replace('_', ""))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_bases() {
        assert_eq!(parse_number("123"), Ok(123));
        assert_eq!(parse_number("2#10011010"), Ok(0x9a));
        assert_eq!(parse_number("8#644"), Ok(0o644));
        assert_eq!(parse_number("16#ff"), Ok(255));
        assert_eq!(parse_number("16#FF"), Ok(255));
    }

    #[test]
    fn ignores_digit_separators() {
        assert_eq!(parse_number("16#ff_ff"), Ok(0xffff));
        assert_eq!(parse_number("10#1_000"), Ok(1000));
    }

    #[test]
    fn parses_signed_literals() {
        assert_eq!(parse_number("-5"), Ok(-5));
        assert_eq!(parse_number("+5"), Ok(5));
        assert_eq!(parse_number("-16#ff"), Ok(-255));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_number("").is_err());
        assert!(parse_number("16#").is_err());
        assert!(parse_number("2#777").is_err());
        assert!(parse_number("99#1").is_err());
    }
}
