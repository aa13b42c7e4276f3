//! Provider payloads and their mapping onto [`CanonicalWeather`].
//!
//! Each provider gets its own typed payload; [`transform`] dispatches on the
//! variant. Both providers are queried in metric units, so no conversion
//! happens here, only rounding to whole degrees. Any missing required field
//! fails the whole transform.

use chrono::{DateTime, NaiveDate, Timelike};
use serde::Deserialize;
use skycast_core::ForecastError;
use std::collections::BTreeMap;

use crate::types::{CanonicalWeather, CurrentConditions, DailyForecast, WeatherLocation};

/// Upper bound on forecast days produced from the 3-hourly feed.
pub const MAX_OPENWEATHER_DAYS: usize = 5;

/// Raw response of one provider fetch
#[derive(Debug, Clone)]
pub enum ProviderPayload {
    WeatherApi(WeatherApiPayload),
    OpenWeather(OpenWeatherPayload),
}

// WeatherAPI.com `forecast.json`

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherApiPayload {
    #[serde(default)]
    pub location: Option<WeatherApiLocation>,
    #[serde(default)]
    pub current: Option<WeatherApiCurrent>,
    #[serde(default)]
    pub forecast: Option<WeatherApiForecast>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherApiLocation {
    pub name: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(default)]
    pub tz_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherApiCondition {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub code: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherApiCurrent {
    pub temp_c: Option<f64>,
    pub condition: Option<WeatherApiCondition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherApiForecast {
    #[serde(default)]
    pub forecastday: Vec<WeatherApiForecastDay>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherApiForecastDay {
    pub date: Option<String>,
    pub day: Option<WeatherApiDay>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherApiDay {
    pub maxtemp_c: Option<f64>,
    pub mintemp_c: Option<f64>,
    pub condition: Option<WeatherApiCondition>,
}

// OpenWeather geocoding + `data/2.5/weather` + `data/2.5/forecast`

/// Place resolved by the OpenWeather geocoding step
#[derive(Debug, Clone, PartialEq)]
pub struct OpenWeatherPlace {
    pub name: String,
    pub state: Option<String>,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenWeatherPayload {
    pub place: OpenWeatherPlace,
    pub current: OpenWeatherCurrent,
    pub forecast: OpenWeatherForecast,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenWeatherMain {
    pub temp: Option<f64>,
    #[serde(default)]
    pub temp_min: Option<f64>,
    #[serde(default)]
    pub temp_max: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenWeatherCondition {
    #[serde(default)]
    pub id: Option<i32>,
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenWeatherSys {
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenWeatherCurrent {
    /// Station or city name; only used when the query was a coordinate pair
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sys: Option<OpenWeatherSys>,
    pub main: Option<OpenWeatherMain>,
    #[serde(default)]
    pub weather: Vec<OpenWeatherCondition>,
    /// Shift from UTC in seconds
    #[serde(default)]
    pub timezone: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenWeatherForecastEntry {
    pub dt: i64,
    pub main: Option<OpenWeatherMain>,
    #[serde(default)]
    pub weather: Vec<OpenWeatherCondition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenWeatherCity {
    #[serde(default)]
    pub timezone: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenWeatherForecast {
    pub list: Option<Vec<OpenWeatherForecastEntry>>,
    #[serde(default)]
    pub city: Option<OpenWeatherCity>,
}

/// Map a provider payload into the canonical schema. Pure.
pub fn transform(payload: ProviderPayload) -> Result<CanonicalWeather, ForecastError> {
    match payload {
        ProviderPayload::WeatherApi(p) => transform_weatherapi(p),
        ProviderPayload::OpenWeather(p) => transform_openweather(p),
    }
}

fn round_celsius(value: f64) -> i32 {
    value.round() as i32
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ForecastError> {
    value.ok_or_else(|| ForecastError::malformed(format!("missing field `{}`", field)))
}

fn transform_weatherapi(payload: WeatherApiPayload) -> Result<CanonicalWeather, ForecastError> {
    let location = required(payload.location, "location")?;
    let current = required(payload.current, "current")?;
    let forecast = required(payload.forecast, "forecast")?;

    let location = WeatherLocation {
        name: required(location.name, "location.name")?,
        region: location.region.unwrap_or_default(),
        country: location.country.unwrap_or_default(),
        latitude: required(location.lat, "location.lat")?,
        longitude: required(location.lon, "location.lon")?,
        timezone: location.tz_id.filter(|tz| !tz.is_empty()),
        postal_code: None,
    };

    let condition = required(current.condition, "current.condition")?;
    let current = CurrentConditions {
        temperature_celsius: round_celsius(required(current.temp_c, "current.temp_c")?),
        condition_text: required(condition.text, "current.condition.text")?,
        condition_code: required(condition.code, "current.condition.code")?,
    };

    let mut days = Vec::with_capacity(forecast.forecastday.len());
    for entry in forecast.forecastday {
        let raw_date = required(entry.date, "forecastday.date")?;
        let date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d").map_err(|e| {
            ForecastError::malformed(format!("bad forecast date {:?}: {}", raw_date, e))
        })?;
        let day = required(entry.day, "forecastday.day")?;
        let condition = required(day.condition, "forecastday.day.condition")?;
        days.push(DailyForecast {
            date,
            high_celsius: round_celsius(required(day.maxtemp_c, "forecastday.day.maxtemp_c")?),
            low_celsius: round_celsius(required(day.mintemp_c, "forecastday.day.mintemp_c")?),
            condition_text: required(condition.text, "forecastday.day.condition.text")?,
        });
    }

    Ok(CanonicalWeather {
        location,
        current,
        daily_forecast: chronological(days)?,
    })
}

/// Accumulates 3-hourly slots that fall on one local date.
struct DayAccumulator {
    high: f64,
    low: f64,
    /// (distance from local noon in hours, condition)
    midday: Option<(u32, String)>,
}

fn transform_openweather(payload: OpenWeatherPayload) -> Result<CanonicalWeather, ForecastError> {
    let OpenWeatherPayload {
        place,
        current,
        forecast,
    } = payload;

    let offset_secs = current
        .timezone
        .or_else(|| forecast.city.as_ref().and_then(|c| c.timezone))
        .unwrap_or(0);

    let main = required(current.main, "weather.main")?;
    let condition = required(current.weather.into_iter().next(), "weather.weather[0]")?;
    let current = CurrentConditions {
        temperature_celsius: round_celsius(required(main.temp, "weather.main.temp")?),
        condition_text: condition_text(&condition)?,
        condition_code: required(condition.id, "weather.weather[0].id")?,
    };

    let entries = required(forecast.list, "forecast.list")?;
    let mut by_date: BTreeMap<NaiveDate, DayAccumulator> = BTreeMap::new();
    for entry in entries {
        let local = DateTime::from_timestamp(entry.dt + i64::from(offset_secs), 0)
            .ok_or_else(|| ForecastError::malformed(format!("bad timestamp {}", entry.dt)))?
            .naive_utc();
        let main = required(entry.main, "forecast.list.main")?;
        let temp = required(main.temp, "forecast.list.main.temp")?;
        let high = main.temp_max.unwrap_or(temp);
        let low = main.temp_min.unwrap_or(temp);
        let distance = local.hour().abs_diff(12);
        let text = entry
            .weather
            .first()
            .map(condition_text)
            .transpose()?;

        let day = by_date.entry(local.date()).or_insert(DayAccumulator {
            high,
            low,
            midday: None,
        });
        day.high = day.high.max(high);
        day.low = day.low.min(low);
        if let Some(text) = text {
            if day.midday.as_ref().map_or(true, |(d, _)| distance < *d) {
                day.midday = Some((distance, text));
            }
        }
    }

    let days = by_date
        .into_iter()
        .take(MAX_OPENWEATHER_DAYS)
        .map(|(date, acc)| {
            let (_, condition_text) = required(acc.midday, "forecast.list.weather")?;
            Ok(DailyForecast {
                date,
                high_celsius: round_celsius(acc.high),
                low_celsius: round_celsius(acc.low),
                condition_text,
            })
        })
        .collect::<Result<Vec<_>, ForecastError>>()?;

    let location = WeatherLocation {
        name: place.name,
        region: place.state.unwrap_or_default(),
        country: place.country,
        latitude: place.latitude,
        longitude: place.longitude,
        timezone: Some(format_utc_offset(offset_secs)),
        postal_code: place.postal_code,
    };

    Ok(CanonicalWeather {
        location,
        current,
        daily_forecast: chronological(days)?,
    })
}

fn condition_text(condition: &OpenWeatherCondition) -> Result<String, ForecastError> {
    condition
        .description
        .clone()
        .or_else(|| condition.main.clone())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ForecastError::malformed("missing weather description"))
}

/// Sort by date and reject empty or duplicated days.
fn chronological(mut days: Vec<DailyForecast>) -> Result<Vec<DailyForecast>, ForecastError> {
    if days.is_empty() {
        return Err(ForecastError::malformed("forecast contains no days"));
    }
    days.sort_by_key(|d| d.date);
    if days.windows(2).any(|w| w[0].date == w[1].date) {
        return Err(ForecastError::malformed("forecast repeats a date"));
    }
    Ok(days)
}

/// `3600` -> `UTC+01:00`, `-25200` -> `UTC-07:00`
fn format_utc_offset(offset_secs: i32) -> String {
    let sign = if offset_secs < 0 { '-' } else { '+' };
    let abs = offset_secs.unsigned_abs();
    format!("UTC{}{:02}:{:02}", sign, abs / 3600, (abs % 3600) / 60)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use skycast_core::ErrorKind;

    fn weatherapi_json(days: usize) -> serde_json::Value {
        let forecastday: Vec<_> = (0..days)
            .map(|i| {
                serde_json::json!({
                    "date": format!("2024-03-{:02}", i + 1),
                    "day": {
                        "maxtemp_c": 18.6 + i as f64,
                        "mintemp_c": 10.2,
                        "condition": { "text": "Partly cloudy", "code": 1003 }
                    }
                })
            })
            .collect();

        serde_json::json!({
            "location": {
                "name": "San Francisco",
                "region": "California",
                "country": "United States of America",
                "lat": 37.78,
                "lon": -122.42,
                "tz_id": "America/Los_Angeles"
            },
            "current": {
                "temp_c": 15.5,
                "condition": { "text": "Sunny", "code": 1000 }
            },
            "forecast": { "forecastday": forecastday }
        })
    }

    fn weatherapi(value: serde_json::Value) -> ProviderPayload {
        ProviderPayload::WeatherApi(serde_json::from_value(value).unwrap())
    }

    #[test]
    fn test_weatherapi_well_formed() {
        let weather = transform(weatherapi(weatherapi_json(3))).unwrap();

        assert_eq!(weather.location.name, "San Francisco");
        assert_eq!(weather.location.region, "California");
        assert_eq!(weather.location.timezone.as_deref(), Some("America/Los_Angeles"));
        assert_eq!(weather.current.temperature_celsius, 16);
        assert_eq!(weather.current.condition_text, "Sunny");
        assert_eq!(weather.current.condition_code, 1000);

        assert_eq!(weather.daily_forecast.len(), 3);
        assert!(weather
            .daily_forecast
            .windows(2)
            .all(|w| w[0].date < w[1].date));
        assert_eq!(weather.daily_forecast[0].high_celsius, 19);
        assert_eq!(weather.daily_forecast[0].low_celsius, 10);
    }

    #[test]
    fn test_weatherapi_day_count_follows_payload() {
        let weather = transform(weatherapi(weatherapi_json(5))).unwrap();
        assert_eq!(weather.daily_forecast.len(), 5);
    }

    #[test]
    fn test_weatherapi_unordered_days_are_sorted() {
        let mut json = weatherapi_json(3);
        json["forecast"]["forecastday"]
            .as_array_mut()
            .unwrap()
            .reverse();
        let weather = transform(weatherapi(json)).unwrap();
        assert!(weather
            .daily_forecast
            .windows(2)
            .all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_weatherapi_missing_top_level_keys() {
        for key in ["location", "current", "forecast"] {
            let mut json = weatherapi_json(3);
            json.as_object_mut().unwrap().remove(key);
            let err = transform(weatherapi(json)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedResponse, "without {}", key);
        }
    }

    #[test]
    fn test_weatherapi_missing_nested_field() {
        let mut json = weatherapi_json(3);
        json["forecast"]["forecastday"][1]["day"]
            .as_object_mut()
            .unwrap()
            .remove("mintemp_c");
        let err = transform(weatherapi(json)).unwrap_err();
        assert!(matches!(err, ForecastError::MalformedResponse(ref m) if m.contains("mintemp_c")));
    }

    #[test]
    fn test_weatherapi_empty_forecast() {
        let err = transform(weatherapi(weatherapi_json(0))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }

    fn openweather_payload() -> OpenWeatherPayload {
        // 2024-03-01T00:00:00Z, every three hours for two and a half days
        let start = 1_709_251_200_i64;
        let list: Vec<serde_json::Value> = (0..20)
            .map(|i| {
                let temp = 5.0 + (i % 8) as f64;
                let description = if i % 8 == 4 { "noon sky" } else { "night sky" };
                serde_json::json!({
                    "dt": start + i * 3 * 3600,
                    "main": { "temp": temp, "temp_min": temp - 0.5, "temp_max": temp + 0.5 },
                    "weather": [{
                        "id": 800,
                        "main": "Clear",
                        "description": description
                    }]
                })
            })
            .collect();

        OpenWeatherPayload {
            place: OpenWeatherPlace {
                name: "Seattle".into(),
                state: Some("Washington".into()),
                country: "US".into(),
                latitude: 47.61,
                longitude: -122.33,
                postal_code: Some("98101".into()),
            },
            current: serde_json::from_value(serde_json::json!({
                "main": { "temp": 11.4 },
                "weather": [{ "id": 500, "main": "Rain", "description": "light rain" }],
                "timezone": 0
            }))
            .unwrap(),
            forecast: serde_json::from_value(serde_json::json!({
                "list": list,
                "city": { "timezone": 0 }
            }))
            .unwrap(),
        }
    }

    #[test]
    fn test_openweather_groups_slots_by_day() {
        let weather = transform(ProviderPayload::OpenWeather(openweather_payload())).unwrap();

        assert_eq!(weather.current.temperature_celsius, 11);
        assert_eq!(weather.current.condition_text, "light rain");
        assert_eq!(weather.current.condition_code, 500);
        assert_eq!(weather.location.region, "Washington");
        assert_eq!(weather.location.timezone.as_deref(), Some("UTC+00:00"));
        assert_eq!(weather.location.postal_code.as_deref(), Some("98101"));

        // 20 slots of 3h starting at midnight cover 3 dates
        assert_eq!(weather.daily_forecast.len(), 3);
        let first = &weather.daily_forecast[0];
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(first.high_celsius, 13); // 12.5 rounds away from zero
        assert_eq!(first.low_celsius, 5); // 4.5 rounds away from zero
        assert_eq!(first.condition_text, "noon sky");
        assert!(weather
            .daily_forecast
            .windows(2)
            .all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_openweather_caps_at_five_days() {
        let mut payload = openweather_payload();
        let start = 1_709_251_200_i64;
        payload.forecast.list = Some(
            (0..7 * 8)
                .map(|i| {
                    serde_json::from_value(serde_json::json!({
                        "dt": start + i * 3 * 3600,
                        "main": { "temp": 10.0 },
                        "weather": [{ "id": 801, "description": "few clouds" }]
                    }))
                    .unwrap()
                })
                .collect(),
        );
        let weather = transform(ProviderPayload::OpenWeather(payload)).unwrap();
        assert_eq!(weather.daily_forecast.len(), MAX_OPENWEATHER_DAYS);
    }

    #[test]
    fn test_openweather_missing_list() {
        let mut payload = openweather_payload();
        payload.forecast.list = None;
        let err = transform(ProviderPayload::OpenWeather(payload)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }

    #[test]
    fn test_openweather_missing_current_temp() {
        let mut payload = openweather_payload();
        payload.current.main = None;
        assert!(transform(ProviderPayload::OpenWeather(payload)).is_err());
    }

    #[test]
    fn test_format_utc_offset() {
        assert_eq!(format_utc_offset(0), "UTC+00:00");
        assert_eq!(format_utc_offset(-25_200), "UTC-07:00");
        assert_eq!(format_utc_offset(19_800), "UTC+05:30");
    }
}
