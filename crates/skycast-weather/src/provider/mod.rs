//! Upstream weather providers.
//!
//! Exactly one provider is active per process, picked from configuration.
//! Both variants expose the same contract: `Ok(Some(_))` on success,
//! `Ok(None)` when the location cannot be resolved, and a typed
//! [`ForecastError`] for everything else.

mod openweather;
mod weatherapi;

pub use openweather::OpenWeatherClient;
pub use weatherapi::WeatherApiClient;

use reqwest::header::RETRY_AFTER;
use serde::de::DeserializeOwned;
use skycast_core::{Config, ForecastError, ProviderKind, ReqwestErrorExt};
use std::time::Duration;

use crate::transform::{transform, ProviderPayload};
use crate::types::CanonicalWeather;

/// What to ask a provider for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Simplified lookup string (postal code, `lat,lon`, `city,st`, ...)
    pub query: String,
    /// Address exactly as the caller typed it
    pub original: String,
}

impl FetchRequest {
    pub fn new(query: impl Into<String>, original: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            original: original.into(),
        }
    }
}

/// The configured upstream provider
#[derive(Debug, Clone)]
pub enum WeatherProvider {
    WeatherApi(WeatherApiClient),
    OpenWeather(OpenWeatherClient),
}

impl WeatherProvider {
    /// Build the active provider. A missing API key is a configuration error.
    pub fn from_config(config: &Config) -> Result<Self, ForecastError> {
        let timeout = Duration::from_secs(config.http.timeout_secs);
        match config.provider {
            ProviderKind::WeatherApi => Ok(Self::WeatherApi(WeatherApiClient::new(
                &config.weatherapi,
                timeout,
            )?)),
            ProviderKind::OpenWeather => Ok(Self::OpenWeather(OpenWeatherClient::new(
                &config.openweather,
                timeout,
            )?)),
        }
    }

    /// Rate limiter key for this provider.
    pub fn service_name(&self) -> &'static str {
        match self {
            Self::WeatherApi(_) => weatherapi::SERVICE,
            Self::OpenWeather(_) => openweather::SERVICE,
        }
    }

    /// Raw provider payload, untransformed.
    pub async fn fetch_raw(
        &self,
        request: &FetchRequest,
    ) -> Result<Option<ProviderPayload>, ForecastError> {
        match self {
            Self::WeatherApi(client) => Ok(client
                .fetch_payload(&request.query)
                .await?
                .map(ProviderPayload::WeatherApi)),
            Self::OpenWeather(client) => Ok(client
                .fetch_payload(request)
                .await?
                .map(ProviderPayload::OpenWeather)),
        }
    }

    /// Fetch and canonicalize.
    pub async fn fetch(
        &self,
        request: &FetchRequest,
    ) -> Result<Option<CanonicalWeather>, ForecastError> {
        match self.fetch_raw(request).await? {
            Some(payload) => transform(payload).map(Some),
            None => Ok(None),
        }
    }
}

pub(crate) fn build_http_client(
    service: &str,
    timeout: Duration,
) -> Result<reqwest::Client, ForecastError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ForecastError::Configuration(format!("{} HTTP client: {}", service, e)))
}

pub(crate) fn require_api_key(service: &str, key: Option<&str>) -> Result<String, ForecastError> {
    key.map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ForecastError::Configuration(format!("missing API key for {}", service)))
}

/// Send a request, mapping transport failures into the taxonomy.
pub(crate) async fn send(
    service: &str,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, ForecastError> {
    request
        .send()
        .await
        .map_err(|e| e.into_forecast_error(service))
}

/// Decode a successful response or classify a failed one.
pub(crate) async fn handle_response<T: DeserializeOwned>(
    service: &str,
    response: reqwest::Response,
) -> Result<T, ForecastError> {
    let status = response.status();

    if status.is_success() {
        let body = response
            .text()
            .await
            .map_err(|e| e.into_forecast_error(service))?;
        serde_json::from_str(&body)
            .map_err(|e| ForecastError::malformed(format!("{} JSON parse error: {}", service, e)))
    } else {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());
        let text = response.text().await.unwrap_or_default();
        tracing::warn!(service, status = status.as_u16(), "provider request failed");
        Err(ForecastError::from_status(
            service,
            status.as_u16(),
            retry_after,
            truncate(&text, 500),
        ))
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
