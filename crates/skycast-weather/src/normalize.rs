//! Address normalization.
//!
//! Turns whatever the caller typed into the stable key the forecast cache is
//! indexed by. Postal codes pass through untouched, "City, ST" collapses to
//! `city,st`, everything else is lowercased with whitespace collapsed.

use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static POSTAL_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{5}(?:-\d{4})?$").expect("valid regex"));

/// Postal code closing an address, optionally followed by a US country name.
/// The code must start the string or follow whitespace or a comma, so digits
/// after a decimal point or a minus sign never qualify.
#[allow(clippy::expect_used)]
static TRAILING_POSTAL_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)(?:^|[\s,])(\d{5}(?:-\d{4})?)",
        r"(?:\s*,?\s*(?:usa|us|united states(?: of america)?))?\s*$",
    ))
    .expect("valid regex")
});

/// `<city-ish text>, <2-letter code>`
#[allow(clippy::expect_used)]
static CITY_STATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s*,\s*([A-Za-z]{2})$").expect("valid regex"));

#[allow(clippy::expect_used)]
static COORDINATE_PAIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(-?\d{1,2}(?:\.\d+)?)\s*,\s*(-?\d{1,3}(?:\.\d+)?)\s*$").expect("valid regex")
});

/// Normalize a raw location string into a cache key. Never fails.
#[must_use]
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();

    if is_postal_code(trimmed) {
        return trimmed.to_string();
    }

    if let Some(caps) = CITY_STATE_RE.captures(trimmed) {
        let city = collapse_whitespace(&caps[1].to_lowercase());
        if !city.is_empty() {
            return format!("{},{}", city, caps[2].to_lowercase());
        }
    }

    collapse_whitespace(&trimmed.to_lowercase())
}

/// True for `12345` or `12345-6789`.
#[must_use]
pub fn is_postal_code(s: &str) -> bool {
    POSTAL_CODE_RE.is_match(s)
}

/// Pull the ZIP out of a full address. Only a code in trailing position
/// counts; a leading house number is never taken for one, and neither is
/// anything inside a coordinate pair.
#[must_use]
pub fn extract_postal_code(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if is_coordinate_pair(raw) {
        return None;
    }
    TRAILING_POSTAL_CODE_RE
        .captures(raw)
        .map(|caps| caps[1].to_string())
}

/// Parse `"lat,lon"` into a coordinate pair within valid ranges.
#[must_use]
pub fn parse_coordinates(s: &str) -> Option<(f64, f64)> {
    let caps = COORDINATE_PAIR_RE.captures(s)?;
    let lat: f64 = caps[1].parse().ok()?;
    let lon: f64 = caps[2].parse().ok()?;
    ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)).then_some((lat, lon))
}

#[must_use]
pub fn is_coordinate_pair(s: &str) -> bool {
    parse_coordinates(s).is_some()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
