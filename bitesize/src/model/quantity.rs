/// Binary (power-of-two) quantity suffixes.
const BINARY_SUFFIXES: &[&str] = &["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
/// Decimal quantity suffixes, including the sub-unit ones used for CPU.
const DECIMAL_SUFFIXES: &[&str] = &["n", "u", "m", "k", "M", "G", "T", "P", "E"];

/// Validates a Kubernetes resource quantity without normalizing it.
///
/// Accepts a non-negative decimal number followed by an optional binary or
/// decimal suffix, or scientific notation (`128974848e3`). The empty string
/// is not a quantity; callers treat "absent" separately.
pub fn is_valid_quantity(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }

    let (number, suffix) = split_suffix(value);

    if number.is_empty() {
        return false;
    }

    if let Some(exp) = number.find(['e', 'E']) {
        // Scientific notation excludes a unit suffix.
        if !suffix.is_empty() {
            return false;
        }
        let (mantissa, exponent) = number.split_at(exp);
        let exponent = exponent[1..].strip_prefix(['+', '-']).unwrap_or(&exponent[1..]);
        return is_decimal(mantissa) && !exponent.is_empty() && exponent.bytes().all(|b| b.is_ascii_digit());
    }

    is_decimal(number)
}

fn split_suffix(value: &str) -> (&str, &str) {
    for suffix in BINARY_SUFFIXES.iter().chain(DECIMAL_SUFFIXES) {
        if let Some(number) = value.strip_suffix(suffix) {
            // "e" and "E" also start an exponent; only treat them as a
            // suffix when the remainder is a plain number.
            if (*suffix == "E" || *suffix == "e") && !is_decimal(number) {
                continue;
            }
            return (number, suffix);
        }
    }
    (value, "")
}

fn is_decimal(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    let mut seen_dot = false;
    for b in value.bytes() {
        match b {
            b'0'..=b'9' => {}
            b'.' if !seen_dot => seen_dot = true,
            _ => return false,
        }
    }
    value != "."
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_quantities() {
        for value in ["1", "100m", "0.5", "2Gi", "512Mi", "1500k", "128974848e3", "1e6"] {
            assert!(is_valid_quantity(value), "{value} should be valid");
        }
    }

    #[test]
    fn rejects_malformed_quantities() {
        for value in ["", "Gi", "two", "1GiB", "1.2.3", "10 Gi", "-1Gi"] {
            assert!(!is_valid_quantity(value), "{value} should be invalid");
        }
    }
}
