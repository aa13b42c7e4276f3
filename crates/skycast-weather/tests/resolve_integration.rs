//! End-to-end tests for ForecastResolver using wiremock.
//!
//! Every test wires the resolver from a `Config` pointing at a mock server and
//! an on-disk cache in a temp directory.

#![allow(clippy::unwrap_used)]

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use skycast_core::{Config, ErrorKind, ForecastError, ProviderKind};
use skycast_weather::{
    DailyForecast, ForecastRecord, ForecastResolver, Freshness, ResolutionSource,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper to build a WeatherAPI `forecast.json` body
fn weatherapi_body(name: &str, temp_c: f64) -> serde_json::Value {
    serde_json::json!({
        "location": {
            "name": name, "region": "Washington", "country": "United States of America",
            "lat": 47.61, "lon": -122.33, "tz_id": "America/Los_Angeles"
        },
        "current": { "temp_c": temp_c, "condition": { "text": "Overcast", "code": 1009 } },
        "forecast": { "forecastday": [
            { "date": "2024-03-01", "day": { "maxtemp_c": 13.2, "mintemp_c": 5.8,
              "condition": { "text": "Patchy rain nearby", "code": 1063 } } },
            { "date": "2024-03-02", "day": { "maxtemp_c": 12.0, "mintemp_c": 6.0,
              "condition": { "text": "Cloudy", "code": 1006 } } },
            { "date": "2024-03-03", "day": { "maxtemp_c": 14.0, "mintemp_c": 7.0,
              "condition": { "text": "Sunny", "code": 1000 } } }
        ]}
    })
}

fn weatherapi_config(server: &MockServer, dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.config_dir = dir.path().to_path_buf();
    config.provider = ProviderKind::WeatherApi;
    config.weatherapi.api_key = Some("test_key".into());
    config.weatherapi.base_url = server.uri();
    config.cache.database_path = Some(dir.path().join("forecasts.db"));
    config.http.timeout_secs = 5;
    config
}

#[tokio::test]
async fn test_postal_code_end_to_end() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/forecast.json"))
        .and(query_param("q", "98101"))
        .and(query_param("key", "test_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(weatherapi_body("Seattle", 10.6)))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = ForecastResolver::from_config(&weatherapi_config(&server, &dir)).unwrap();

    let first = resolver.resolve("98101").await.unwrap().unwrap();
    assert_eq!(first.source, ResolutionSource::Provider);
    assert_eq!(first.freshness, Freshness::Fresh);
    assert_eq!(first.record.postal_code.as_deref(), Some("98101"));
    assert_eq!(first.record.current_temp_c, 11);
    assert_eq!(first.record.high_temp_c, 13);
    assert_eq!(first.record.low_temp_c, 6);
    assert_eq!(first.record.conditions, "Overcast");
    assert_eq!(first.record.extended_forecast.len(), 3);
    assert!(first.record.id.is_some());

    assert_eq!(resolver.cache().count().unwrap(), 1);
    assert_eq!(resolver.rate_limiter().remaining("weatherapi"), 59);

    let second = resolver.resolve("98101").await.unwrap().unwrap();
    assert_eq!(second.source, ResolutionSource::Cache);
    assert_eq!(second.record.id, first.record.id);
    assert_eq!(resolver.cache().count().unwrap(), 1);
}

#[tokio::test]
async fn test_equivalent_addresses_share_one_fetch() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/forecast.json"))
        .and(query_param("q", "seattle,wa"))
        .respond_with(ResponseTemplate::new(200).set_body_json(weatherapi_body("Seattle", 9.0)))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = ForecastResolver::from_config(&weatherapi_config(&server, &dir)).unwrap();

    let first = resolver.resolve("Seattle, WA").await.unwrap().unwrap();
    let second = resolver.resolve("  seattle ,   wa ").await.unwrap().unwrap();
    assert_eq!(first.record.normalized_key, "seattle,wa");
    assert_eq!(second.source, ResolutionSource::Cache);
    assert_eq!(first.record.raw_address, "Seattle, WA");
}

#[tokio::test]
async fn test_unknown_location_is_not_found() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/forecast.json"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": { "code": 1006, "message": "No matching location found." }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = ForecastResolver::from_config(&weatherapi_config(&server, &dir)).unwrap();
    let result = resolver.resolve("Atlantis").await.unwrap();

    assert!(result.is_none());
    assert_eq!(resolver.cache().count().unwrap(), 0);
}

#[tokio::test]
async fn test_malformed_payload_persists_nothing() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let mut body = weatherapi_body("Seattle", 9.0);
    body.as_object_mut().unwrap().remove("forecast");
    Mock::given(method("GET"))
        .and(path("/forecast.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let resolver = ForecastResolver::from_config(&weatherapi_config(&server, &dir)).unwrap();
    let err = resolver.resolve("98101").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    assert_eq!(err.suggested_status(), 502);
    assert_eq!(resolver.cache().count().unwrap(), 0);
}

#[tokio::test]
async fn test_upstream_failure_does_not_serve_stale_record() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/forecast.json"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = ForecastResolver::from_config(&weatherapi_config(&server, &dir)).unwrap();

    let stale = ForecastRecord {
        id: None,
        raw_address: "98101".into(),
        normalized_key: "98101".into(),
        postal_code: Some("98101".into()),
        current_temp_c: 4,
        high_temp_c: 8,
        low_temp_c: 1,
        conditions: "Fog".into(),
        extended_forecast: vec![DailyForecast {
            date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            high_celsius: 8,
            low_celsius: 1,
            condition_text: "Fog".into(),
        }],
        timezone: None,
        queried_at: Utc::now() - ChronoDuration::hours(2),
    };
    resolver.cache().store(&stale).unwrap();

    let err = resolver.resolve("98101").await.unwrap_err();
    assert!(matches!(err, ForecastError::Upstream { status: 503, .. }));
    assert!(err.is_retryable());

    let latest = resolver.cache().latest("98101").unwrap().unwrap();
    assert_eq!(latest.conditions, "Fog");
    assert_eq!(resolver.cache().count().unwrap(), 1);
}

#[tokio::test]
async fn test_rate_limit_denial_skips_provider() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/forecast.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(weatherapi_body("Anywhere", 20.0)))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = weatherapi_config(&server, &dir);
    config.rate_limit.max_requests_per_minute = 0;
    let resolver = ForecastResolver::from_config(&config).unwrap();

    let err = resolver.resolve("10001").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
    assert_eq!(err.suggested_status(), 429);
    assert!(err.is_retryable());
    assert_eq!(resolver.cache().count().unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_misses_fetch_once() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/forecast.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(weatherapi_body("Seattle", 10.0))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let resolver =
        Arc::new(ForecastResolver::from_config(&weatherapi_config(&server, &dir)).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.resolve("98101").await })
        })
        .collect();

    let mut from_provider = 0;
    for handle in handles {
        let resolution = handle.await.unwrap().unwrap().unwrap();
        if resolution.source == ResolutionSource::Provider {
            from_provider += 1;
        }
    }

    assert_eq!(from_provider, 1);
    assert_eq!(resolver.cache().count().unwrap(), 1);
}

#[tokio::test]
async fn test_cache_survives_restart() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/forecast.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(weatherapi_body("Seattle", 10.0)))
        .expect(1)
        .mount(&server)
        .await;

    let config = weatherapi_config(&server, &dir);
    {
        let resolver = ForecastResolver::from_config(&config).unwrap();
        resolver.resolve("98101").await.unwrap();
    }

    let resolver = ForecastResolver::from_config(&config).unwrap();
    let resolution = resolver.resolve("98101").await.unwrap().unwrap();
    assert_eq!(resolution.source, ResolutionSource::Cache);
}

#[tokio::test]
async fn test_openweather_end_to_end() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/geo/1.0/direct"))
        .and(query_param("q", "portland,or"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "name": "Portland", "lat": 45.52, "lon": -122.68, "country": "US", "state": "Oregon" }
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .and(query_param("units", "metric"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "main": { "temp": 12.4 },
            "weather": [{ "id": 801, "main": "Clouds", "description": "few clouds" }],
            "timezone": -28800
        })))
        .expect(1)
        .mount(&server)
        .await;

    // 2024-03-01T08:00:00Z is local midnight at UTC-8; six days of slots
    let start = 1_709_280_000_i64;
    let list: Vec<serde_json::Value> = (0..48)
        .map(|i| {
            serde_json::json!({
                "dt": start + i * 3 * 3600,
                "main": { "temp": 10.0, "temp_min": 7.0, "temp_max": 14.0 },
                "weather": [{ "id": 500, "description": "light rain" }]
            })
        })
        .collect();
    Mock::given(method("GET"))
        .and(path("/data/2.5/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "list": list,
            "city": { "timezone": -28800 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.config_dir = dir.path().to_path_buf();
    config.provider = ProviderKind::OpenWeather;
    config.openweather.api_key = Some("ow_key".into());
    config.openweather.base_url = server.uri();
    config.cache.database_path = Some(dir.path().join("forecasts.db"));

    let resolver = ForecastResolver::from_config(&config).unwrap();
    assert_eq!(resolver.provider().service_name(), "openweather");

    let resolution = resolver.resolve("Portland, OR").await.unwrap().unwrap();
    let record = &resolution.record;
    assert_eq!(record.normalized_key, "portland,or");
    assert_eq!(record.current_temp_c, 12);
    assert_eq!(record.conditions, "few clouds");
    assert_eq!(record.extended_forecast.len(), 5);
    assert_eq!(record.timezone.as_deref(), Some("UTC-08:00"));
    assert!(record
        .extended_forecast
        .windows(2)
        .all(|w| w[0].date < w[1].date));
}

#[tokio::test]
async fn test_missing_api_key_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.config_dir = dir.path().to_path_buf();
    config.weatherapi.api_key = None;
    config.cache.database_path = Some(dir.path().join("forecasts.db"));

    let err = ForecastResolver::from_config(&config).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_coordinates_are_sent_upstream_verbatim() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/forecast.json"))
        .and(query_param("q", "47.60621,-122.33207"))
        .respond_with(ResponseTemplate::new(200).set_body_json(weatherapi_body("Seattle", 10.6)))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = ForecastResolver::from_config(&weatherapi_config(&server, &dir)).unwrap();

    let resolution = resolver
        .resolve("47.60621,-122.33207")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolution.record.normalized_key, "47.60621,-122.33207");
    assert_eq!(resolution.record.postal_code, None);

    let stored = resolver.cache().latest("47.60621,-122.33207").unwrap().unwrap();
    assert_eq!(stored.postal_code, None);
    // The digits after the decimal point are not a postal code
    assert!(resolver.cache().latest("33207").unwrap().is_none());
}

#[tokio::test]
async fn test_street_address_without_postal_code() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/forecast.json"))
        .and(query_param("q", "12345 lake city way ne, seattle,wa"))
        .respond_with(ResponseTemplate::new(200).set_body_json(weatherapi_body("Seattle", 9.0)))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = ForecastResolver::from_config(&weatherapi_config(&server, &dir)).unwrap();

    let resolution = resolver
        .resolve("12345 Lake City Way NE, Seattle, WA")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        resolution.record.normalized_key,
        "12345 lake city way ne, seattle,wa"
    );
    assert_eq!(resolution.record.postal_code, None);
    // The house number must not become a key other addresses collide with
    assert!(resolver.cache().latest("12345").unwrap().is_none());
}

#[tokio::test]
async fn test_openweather_coordinates_skip_geocoding() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/geo/1.0/zip"))
        .respond_with(ResponseTemplate::new(404))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/geo/1.0/direct"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data/2.5/weather"))
        .and(query_param("lat", "47.60621"))
        .and(query_param("lon", "-122.33207"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "Seattle",
            "main": { "temp": 9.6 },
            "weather": [{ "id": 804, "main": "Clouds", "description": "overcast clouds" }],
            "sys": { "country": "US" },
            "timezone": -25200
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data/2.5/forecast"))
        .and(query_param("lat", "47.60621"))
        .and(query_param("lon", "-122.33207"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "list": [{
                "dt": 1_709_280_000_i64,
                "main": { "temp": 9.0, "temp_min": 6.0, "temp_max": 12.0 },
                "weather": [{ "id": 804, "description": "overcast clouds" }]
            }],
            "city": { "timezone": -25200 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.config_dir = dir.path().to_path_buf();
    config.provider = ProviderKind::OpenWeather;
    config.openweather.api_key = Some("ow_key".into());
    config.openweather.base_url = server.uri();
    config.cache.database_path = Some(dir.path().join("forecasts.db"));

    let resolver = ForecastResolver::from_config(&config).unwrap();
    let resolution = resolver
        .resolve("47.60621,-122.33207")
        .await
        .unwrap()
        .unwrap();
    let record = &resolution.record;
    assert_eq!(record.normalized_key, "47.60621,-122.33207");
    assert_eq!(record.postal_code, None);
    assert_eq!(record.current_temp_c, 10);
    assert_eq!(record.conditions, "overcast clouds");
}
