// src/domain/normalize.rs

//! Address normalization, fingerprinting and the small amount of numeric
//! work shared by the statistics and valuation steps.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Street and unit spellings collapsed to one canonical token.
const CANONICAL_TOKENS: &[(&str, &str)] = &[
    ("street", "st"),
    ("str", "st"),
    ("avenue", "ave"),
    ("av", "ave"),
    ("road", "rd"),
    ("drive", "dr"),
    ("boulevard", "blvd"),
    ("lane", "ln"),
    ("court", "ct"),
    ("place", "pl"),
    ("terrace", "ter"),
    ("parkway", "pkwy"),
    ("highway", "hwy"),
    ("circle", "cir"),
    ("trail", "trl"),
    ("cove", "cv"),
    ("square", "sq"),
    ("north", "n"),
    ("south", "s"),
    ("east", "e"),
    ("west", "w"),
    ("apartment", "unit"),
    ("apt", "unit"),
    ("suite", "unit"),
    ("ste", "unit"),
    ("number", "unit"),
    ("no", "unit"),
];

fn canonical_token(token: &str) -> &str {
    CANONICAL_TOKENS
        .iter()
        .find(|(from, _)| *from == token)
        .map(|(_, to)| *to)
        .unwrap_or(token)
}

/// Lowercases, maps `#` and unit/street spellings onto canonical tokens,
/// strips punctuation and collapses whitespace.
///
/// `normalize_address(normalize_address(x)) == normalize_address(x)`.
pub fn normalize_address(raw: &str) -> String {
    let mut spaced = String::with_capacity(raw.len() + 8);
    for c in raw.to_lowercase().chars() {
        match c {
            '#' => spaced.push_str(" unit "),
            c if c.is_alphanumeric() || c.is_whitespace() => spaced.push(c),
            _ => spaced.push(' '),
        }
    }

    let mut out: Vec<&str> = Vec::new();
    for token in spaced.split_whitespace() {
        let token = canonical_token(token);
        if token == "unit" && out.last() == Some(&"unit") {
            continue;
        }
        out.push(token);
    }
    out.join(" ")
}

/// SHA-256 hex digest of an already normalized address.
pub fn fingerprint(normalized_address: &str) -> String {
    let digest = Sha256::digest(normalized_address.as_bytes());
    format!("{digest:x}")
}

/// Coerces a loosely typed upstream value into a number.
///
/// Accepts JSON numbers and strings such as `"$1,250/mo"` or `"2.5 ba"`.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .skip_while(|c| !(c.is_ascii_digit() || *c == '-' || *c == '.'))
                .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',' || *c == '-')
                .filter(|c| *c != ',')
                .collect();
            cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
        }
        _ => None,
    }
}

fn sorted_copy(numbers: &[f64]) -> Vec<f64> {
    let mut sorted = numbers.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Middle value (or mean of the two middle values).
///
/// Returns `NaN` for an empty slice; callers guard against that.
pub fn median(numbers: &[f64]) -> f64 {
    if numbers.is_empty() {
        return f64::NAN;
    }
    let sorted = sorted_copy(numbers);
    let middle = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[middle - 1] + sorted[middle]) / 2.0
    } else {
        sorted[middle]
    }
}

/// Linear interpolation between the order statistics bracketing
/// `p/100 * (n-1)` of an already sorted, non-empty slice.
fn interpolate(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let position = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// The `p`th percentile of `numbers`.
///
/// With `winsorize`, every value is first clamped into the sample's own
/// [5th, 95th] percentile range so a handful of outliers cannot drag the
/// tails. Returns `NaN` for an empty slice.
pub fn percentile(numbers: &[f64], p: f64, winsorize: bool) -> f64 {
    if numbers.is_empty() {
        return f64::NAN;
    }
    let mut sorted = sorted_copy(numbers);
    if winsorize {
        let low = interpolate(&sorted, 5.0);
        let high = interpolate(&sorted, 95.0);
        for value in sorted.iter_mut() {
            *value = value.clamp(low, high);
        }
    }
    interpolate(&sorted, p)
}

/// Rounds to a fixed number of fractional digits. Non-finite input is
/// returned unchanged.
pub fn decimals(n: f64, places: u32) -> f64 {
    if !n.is_finite() {
        return n;
    }
    let factor = 10f64.powi(places as i32);
    (n * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_abbreviations_and_punctuation() {
        assert_eq!(
            normalize_address("123 North Main Street, Apt. #4B, Austin, TX"),
            "123 n main st unit 4b austin tx"
        );
        assert_eq!(
            normalize_address("  123 N. Main St   #4b  Austin TX "),
            "123 n main st unit 4b austin tx"
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            "4501 Speedway Blvd., Suite 200, Austin, TX 78751",
            "12-B West Avenue #3",
            "1 Apartment No 5",
            "",
            "###",
            "Unit unit UNIT 7",
        ];
        for raw in samples {
            let once = normalize_address(raw);
            assert_eq!(normalize_address(&once), once, "input: {raw:?}");
        }
    }

    #[test]
    fn fingerprint_is_stable_hex() {
        let a = fingerprint("123 n main st");
        assert_eq!(a, fingerprint("123 n main st"));
        assert_ne!(a, fingerprint("124 n main st"));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn percentile_midpoint_interpolation() {
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        assert!((percentile(&values, 50.0, false) - 50.5).abs() < 1e-9);
        assert_eq!(percentile(&values, 0.0, false), 1.0);
        assert_eq!(percentile(&values, 100.0, false), 100.0);
    }

    #[test]
    fn winsorized_percentile_clamps_outliers() {
        let mut values: Vec<f64> = (1..=19).map(|n| f64::from(n) * 100.0).collect();
        values.push(1_000_000.0);
        let raw = percentile(&values, 100.0, false);
        let clamped = percentile(&values, 100.0, true);
        assert_eq!(raw, 1_000_000.0);
        assert!(clamped < raw);
        assert!((clamped - percentile(&values, 95.0, false)).abs() < 1e-9);
    }

    #[test]
    fn percentile_single_value() {
        assert_eq!(percentile(&[42.0], 90.0, true), 42.0);
        assert!(percentile(&[], 50.0, true).is_nan());
    }

    #[test]
    fn decimals_rounds() {
        assert_eq!(decimals(1.23456, 2), 1.23);
        assert_eq!(decimals(1.235, 1), 1.2);
        assert!(decimals(f64::INFINITY, 2).is_infinite());
    }

    #[test]
    fn coerces_upstream_numbers() {
        assert_eq!(to_number(&json!(1500)), Some(1500.0));
        assert_eq!(to_number(&json!("$1,500/mo")), Some(1500.0));
        assert_eq!(to_number(&json!("2.5 ba")), Some(2.5));
        assert_eq!(to_number(&json!("--")), None);
        assert_eq!(to_number(&json!(null)), None);
        assert_eq!(to_number(&json!(true)), None);
    }
}
