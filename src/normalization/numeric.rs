use serde_json::{Number, Value};

/// Placeholder text providers use for "no value" (OMDb sends `"N/A"`).
const MISSING_MARKERS: [&str; 3] = ["n/a", "na", "none"];

/// Returns the trimmed text unless it is empty or a provider "missing" marker.
pub fn present_text(raw: Option<&str>) -> Option<&str> {
    let s = raw?.trim();
    if s.is_empty() || MISSING_MARKERS.contains(&s.to_ascii_lowercase().as_str()) {
        return None;
    }
    Some(s)
}

/// Parse a numeric-looking string such as `"1,234,567"`, `"$12,500"` or `"74"`.
///
/// Thousands separators and a leading currency sign are ignored. Anything that
/// still fails to parse is `None`, never zero.
pub fn parse_number(raw: Option<&str>) -> Option<f64> {
    let s = present_text(raw)?;
    let cleaned: String = s
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    let n = cleaned.trim().parse::<f64>().ok()?;
    n.is_finite().then_some(n)
}

/// Interpret a JSON value as a float, accepting numbers and numeric strings.
pub fn value_as_f64(v: &Value) -> Option<f64> {
    if let Some(n) = v.as_f64() {
        return Some(n);
    }
    if let Some(s) = v.as_str() {
        return parse_number(Some(s));
    }
    None
}

/// Wrap a parsed number as a cell: integers stay integral, missing becomes null.
pub fn number_cell(n: Option<f64>) -> Value {
    match n {
        Some(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Value::from(v as i64),
        Some(v) => Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null),
        None => Value::Null,
    }
}

/// Wrap optional text as a cell, treating provider "missing" markers as null.
pub fn text_cell(raw: Option<&str>) -> Value {
    match present_text(raw) {
        Some(s) => Value::String(s.to_string()),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_thousands_separators() {
        assert_eq!(parse_number(Some("2,845,123")), Some(2_845_123.0));
        assert_eq!(parse_number(Some("$12,500,000")), Some(12_500_000.0));
        assert_eq!(parse_number(Some(" 7.9 ")), Some(7.9));
    }

    #[test]
    fn unparsable_is_missing_not_zero() {
        assert_eq!(parse_number(Some("N/A")), None);
        assert_eq!(parse_number(Some("")), None);
        assert_eq!(parse_number(Some("soon")), None);
        assert_eq!(parse_number(None), None);
        assert_eq!(number_cell(parse_number(Some("N/A"))), Value::Null);
    }

    #[test]
    fn integral_numbers_stay_integers() {
        assert_eq!(number_cell(Some(74.0)), Value::from(74));
        assert_eq!(number_cell(Some(8.1)), serde_json::json!(8.1));
    }

    #[test]
    fn text_cell_drops_missing_markers() {
        assert_eq!(text_cell(Some("N/A")), Value::Null);
        assert_eq!(text_cell(Some("  ")), Value::Null);
        assert_eq!(text_cell(Some("PG-13")), Value::from("PG-13"));
    }

    #[test]
    fn value_as_f64_accepts_strings() {
        assert_eq!(value_as_f64(&Value::from("1,024")), Some(1024.0));
        assert_eq!(value_as_f64(&Value::from(3)), Some(3.0));
        assert_eq!(value_as_f64(&Value::Null), None);
    }
}
