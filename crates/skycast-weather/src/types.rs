use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Records younger than this are "fresh" rather than merely cached.
pub const FRESH_WINDOW_SECS: i64 = 60;

/// Where a forecast is for, as reported by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherLocation {
    pub name: String,
    pub region: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: Option<String>,
    /// Postal code, when the provider resolved one
    #[serde(default)]
    pub postal_code: Option<String>,
}

/// Current conditions, Celsius
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub temperature_celsius: i32,
    pub condition_text: String,
    pub condition_code: i32,
}

/// Daily forecast entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub date: NaiveDate,
    pub high_celsius: i32,
    pub low_celsius: i32,
    pub condition_text: String,
}

/// Provider-independent result of one fetch.
///
/// `daily_forecast` is chronological and never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalWeather {
    pub location: WeatherLocation,
    pub current: CurrentConditions,
    pub daily_forecast: Vec<DailyForecast>,
}

/// How usable a stored record is at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Fetched less than a minute ago
    Fresh,
    /// Older than a minute but inside the TTL; served as-is
    Cached,
    /// At or past the TTL; must be re-fetched
    Stale,
}

impl Freshness {
    pub fn classify(age: Duration, ttl: Duration) -> Self {
        if age >= ttl {
            Self::Stale
        } else if age < Duration::seconds(FRESH_WINDOW_SECS) {
            Self::Fresh
        } else {
            Self::Cached
        }
    }
}

/// A persisted forecast. Never mutated after it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    /// Row id, `None` until stored
    pub id: Option<i64>,
    pub raw_address: String,
    pub normalized_key: String,
    pub postal_code: Option<String>,
    pub current_temp_c: i32,
    pub high_temp_c: i32,
    pub low_temp_c: i32,
    pub conditions: String,
    pub extended_forecast: Vec<DailyForecast>,
    pub timezone: Option<String>,
    pub queried_at: DateTime<Utc>,
}

impl ForecastRecord {
    /// Build an unsaved record from a successful fetch. Today's high/low come
    /// from the first forecast day. A postal code taken from the address wins
    /// over the one the provider reported.
    pub fn from_weather(
        raw_address: &str,
        normalized_key: &str,
        postal_code: Option<String>,
        weather: CanonicalWeather,
        queried_at: DateTime<Utc>,
    ) -> Self {
        let current = weather.current.temperature_celsius;
        let (high, low) = weather
            .daily_forecast
            .first()
            .map(|d| (d.high_celsius, d.low_celsius))
            .unwrap_or((current, current));

        Self {
            id: None,
            raw_address: raw_address.to_string(),
            normalized_key: normalized_key.to_string(),
            postal_code: postal_code.or(weather.location.postal_code),
            current_temp_c: current,
            high_temp_c: high,
            low_temp_c: low,
            conditions: weather.current.condition_text,
            extended_forecast: weather.daily_forecast,
            timezone: weather.location.timezone,
            queried_at,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.queried_at
    }

    pub fn freshness(&self, now: DateTime<Utc>, ttl: Duration) -> Freshness {
        Freshness::classify(self.age(now), ttl)
    }
}

/// Where a resolved record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionSource {
    Cache,
    Provider,
}

/// Successful outcome of a resolve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub record: ForecastRecord,
    pub freshness: Freshness,
    pub source: ResolutionSource,
}
