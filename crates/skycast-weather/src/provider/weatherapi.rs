//! WeatherAPI.com client: location, current conditions and the daily
//! forecast come back from a single `forecast.json` call.

use reqwest::StatusCode;
use serde::Deserialize;
use skycast_core::{ForecastError, WeatherApiConfig};
use std::time::Duration;
use tracing::instrument;

use super::{build_http_client, handle_response, require_api_key, send};
use crate::transform::WeatherApiPayload;

pub(crate) const SERVICE: &str = "weatherapi";

/// WeatherAPI error code for "No matching location found."
const NO_MATCHING_LOCATION: i32 = 1006;

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct WeatherApiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    forecast_days: u8,
}

impl WeatherApiClient {
    pub fn new(config: &WeatherApiConfig, timeout: Duration) -> Result<Self, ForecastError> {
        Ok(Self {
            client: build_http_client(SERVICE, timeout)?,
            api_key: require_api_key(SERVICE, config.api_key.as_deref())?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            forecast_days: config.forecast_days,
        })
    }

    /// `GET /forecast.json?q=&days=&key=`. `Ok(None)` when WeatherAPI cannot
    /// match the query to a location.
    #[instrument(skip(self), level = "info")]
    pub async fn fetch_payload(
        &self,
        query: &str,
    ) -> Result<Option<WeatherApiPayload>, ForecastError> {
        let url = format!("{}/forecast.json", self.base_url);
        let days = self.forecast_days.to_string();

        let response = send(
            SERVICE,
            self.client.get(&url).query(&[
                ("q", query),
                ("days", days.as_str()),
                ("key", self.api_key.as_str()),
            ]),
        )
        .await?;

        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            if is_no_matching_location(&body) {
                tracing::info!("WeatherAPI found no location for {:?}", query);
                return Ok(None);
            }
            return Err(ForecastError::from_status(SERVICE, 400, None, body));
        }

        let payload = handle_response(SERVICE, response).await?;
        Ok(Some(payload))
    }
}

fn is_no_matching_location(body: &str) -> bool {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error)
        .and_then(|e| e.code)
        == Some(NO_MATCHING_LOCATION)
}
