//! Pattern Library (component E): pure, I/O-free string classification and
//! normalization. No function here looks at a bbox or talks to a network;
//! everything is a predicate or a text transform over a `&str`.

use once_cell::sync::Lazy;
use regex::Regex;

static DIMENSION_LIKE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"\d+\.?\d*["']"#,
        r"\d+\.?\d*(?:in|mm|cm)",
        r"\d+/\d+",
        r"[ØøR]\d+",
        r"M\d+",
        r"\d+-\d+",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
    .collect()
});

static THREAD_CALLOUT: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\d+/\d+\s*-\s*\d+",
        r"#\d+\s*-\s*\d+",
        r"M\d+\s*[xX×]\s*\d+",
        r"\d+/\d+\s*NPT",
        r"UN[CF]",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
    .collect()
});

static TOLERANCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+\-±]\s*\.?\d+(?:\.\d+)?$").unwrap());

static MODIFIER: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"^\d+[xX]$", r"^\(\d+[xX]\)$", r"^TYP\.?$", r"^REF\.?$"]
        .iter()
        .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
        .collect()
});

static NUMERIC_DECIMAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d+\.?\d*").unwrap());
static NUMERIC_FRACTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*/\s*(\d+)").unwrap());

static TRAILING_QUANTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*[(\[]\d+[xX][)\]]\s*$").unwrap());
static TRAILING_WORD_MODIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s+(TYP|TYPICAL|REF|REFERENCE|C/C|C-C|B\.?C\.?|PCD|MAX|MIN|NOM|BSC|BASIC|THRU|DEEP|EQ\s*SP)\.?\s*$").unwrap()
});
static TRAILING_PLACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+\d+\s*PL(ACES?)?\.?\s*$").unwrap());

static NON_MATCH_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w.\-+/]").unwrap());

/// Does `text` look like it carries a dimension value (a number plus a unit,
/// fraction, diameter/radius prefix, or thread-size marker)?
pub fn is_dimension_text(text: &str) -> bool {
    let text = text.trim();
    if !text.chars().any(|c| c.is_ascii_digit()) {
        return false;
    }
    DIMENSION_LIKE.iter().any(|re| re.is_match(text))
}

/// Is `text` a thread callout (`1/4-20`, `#8-32`, `M8x1.25`, `1/4 NPT`, `UNC`/`UNF`)?
pub fn is_thread_callout(text: &str) -> bool {
    THREAD_CALLOUT.iter().any(|re| re.is_match(text))
}

/// Is `text` a bare tolerance value (`+.005`, `-0.003`, `±0.01`)?
pub fn is_tolerance(text: &str) -> bool {
    TOLERANCE.is_match(text.trim())
}

/// Is `text` a quantity/type modifier with nothing else attached (`4X`, `(4X)`, `TYP`, `REF`)?
pub fn is_modifier(text: &str) -> bool {
    let upper = text.trim().to_uppercase();
    MODIFIER.iter().any(|re| re.is_match(&upper))
}

/// Extracts the leading numeric value of a dimension, decimal first, falling
/// back to a fraction expressed as its decimal quotient.
pub fn extract_numeric(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Some(m) = NUMERIC_DECIMAL.find(text) {
        if let Ok(v) = m.as_str().parse::<f64>() {
            return Some(v);
        }
    }
    if let Some(caps) = NUMERIC_FRACTION.captures(text) {
        let num: f64 = caps[1].parse().ok()?;
        let den: f64 = caps[2].parse().ok()?;
        if den != 0.0 {
            return Some(num / den);
        }
    }
    None
}

/// Strips trailing quantity/modifier/tolerance/PLACES suffixes, leaving the
/// base numeric portion of a compound dimension (e.g. `"4X .250 TYP"` ->
/// `"4X .250"` -> see [`extract_base_value`] for the full chain).
pub fn extract_base_value(dimension: &str) -> String {
    let mut base = dimension.to_string();
    base = TRAILING_QUANTITY.replace(&base, "").into_owned();
    base = TRAILING_WORD_MODIFIER.replace(&base, "").into_owned();
    base = TRAILING_PLACES.replace(&base, "").into_owned();
    base.trim().to_string()
}

/// Canonicalizes text for equality/substring comparisons in the fusion
/// matcher: lowercases, maps symbolic variants to ASCII equivalents, drops
/// whitespace, and strips anything outside `[\w.\-+/]`.
pub fn normalize(text: &str) -> String {
    let mut normalized = text.to_lowercase();
    for (from, to) in [
        ("ø", "o"),
        ("⌀", "o"),
        ("°", ""),
        ("±", "+-"),
        (" ", ""),
        (",", "."),
    ] {
        normalized = normalized.replace(from, to);
    }
    NON_MATCH_CHARS.replace_all(&normalized, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_dimension_shapes() {
        assert!(is_dimension_text("2.500\""));
        assert!(is_dimension_text("25mm"));
        assert!(is_dimension_text("1/4"));
        assert!(is_dimension_text("Ø5"));
        assert!(is_dimension_text("M8"));
        assert!(is_dimension_text("6-32"));
        assert!(!is_dimension_text("ABC"));
    }

    #[test]
    fn recognizes_thread_callouts() {
        assert!(is_thread_callout("1/4-20"));
        assert!(is_thread_callout("M8x1.25"));
        assert!(is_thread_callout("1/4 NPT"));
        assert!(is_thread_callout("UNC"));
        assert!(!is_thread_callout("2.500"));
    }

    #[test]
    fn recognizes_tolerances() {
        assert!(is_tolerance("+.005"));
        assert!(is_tolerance("-0.003"));
        assert!(is_tolerance("±0.01"));
        assert!(!is_tolerance("2.500"));
    }

    #[test]
    fn recognizes_modifiers() {
        assert!(is_modifier("4X"));
        assert!(is_modifier("(4X)"));
        assert!(is_modifier("TYP"));
        assert!(is_modifier("TYP."));
        assert!(is_modifier("ref"));
        assert!(!is_modifier("2.500"));
    }

    #[test]
    fn extracts_numeric_decimal_then_fraction() {
        assert_eq!(extract_numeric("2.500"), Some(2.5));
        assert_eq!(extract_numeric("1/4"), Some(0.25));
        assert_eq!(extract_numeric("no numbers"), None);
    }

    #[test]
    fn strips_trailing_modifiers_for_base_value() {
        assert_eq!(extract_base_value("2.500 TYP"), "2.500");
        assert_eq!(extract_base_value("Ø.250 (4X)"), "Ø.250");
        assert_eq!(extract_base_value("1.000 4 PLACES"), "1.000");
    }

    #[test]
    fn normalize_maps_symbols_and_strips_whitespace() {
        assert_eq!(normalize("Ø 2.500 ±.005"), "o2.500+-.005");
        assert_eq!(normalize("1, 250"), "1.250");
    }
}
