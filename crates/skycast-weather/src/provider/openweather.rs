//! OpenWeather client. Two steps: geocode the query to coordinates, then
//! fetch current conditions and the 5-day/3-hour forecast by coordinate,
//! always in metric units.

use reqwest::StatusCode;
use serde::Deserialize;
use skycast_core::{ForecastError, OpenWeatherConfig};
use std::time::Duration;
use tracing::instrument;

use super::{build_http_client, handle_response, require_api_key, send, FetchRequest};
use crate::normalize::parse_coordinates;
use crate::transform::{
    OpenWeatherCurrent, OpenWeatherForecast, OpenWeatherPayload, OpenWeatherPlace,
};

pub(crate) const SERVICE: &str = "openweather";

/// Entry of `/geo/1.0/direct` (array) or the body of `/geo/1.0/zip`.
#[derive(Debug, Deserialize)]
struct GeoPlace {
    name: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    zip: Option<String>,
}

impl GeoPlace {
    /// `None` unless both coordinates are present.
    fn into_place(self, fallback_name: &str) -> Option<OpenWeatherPlace> {
        Some(OpenWeatherPlace {
            latitude: self.lat?,
            longitude: self.lon?,
            name: self.name.unwrap_or_else(|| fallback_name.to_string()),
            state: self.state,
            country: self.country.unwrap_or_default(),
            postal_code: self.zip,
        })
    }
}

#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenWeatherClient {
    pub fn new(config: &OpenWeatherConfig, timeout: Duration) -> Result<Self, ForecastError> {
        Ok(Self {
            client: build_http_client(SERVICE, timeout)?,
            api_key: require_api_key(SERVICE, config.api_key.as_deref())?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Geocode then fetch. `Ok(None)` when the location cannot be resolved
    /// to a coordinate pair.
    #[instrument(skip(self), level = "info")]
    pub async fn fetch_payload(
        &self,
        request: &FetchRequest,
    ) -> Result<Option<OpenWeatherPayload>, ForecastError> {
        if let Some((lat, lon)) = parse_coordinates(&request.query) {
            let (current, forecast) = self.fetch_weather(lat, lon).await?;
            let place = OpenWeatherPlace {
                name: current
                    .name
                    .clone()
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| request.query.clone()),
                state: None,
                country: current
                    .sys
                    .as_ref()
                    .and_then(|s| s.country.clone())
                    .unwrap_or_default(),
                latitude: lat,
                longitude: lon,
                postal_code: None,
            };
            return Ok(Some(OpenWeatherPayload {
                place,
                current,
                forecast,
            }));
        }

        let Some(place) = self.geocode(request).await? else {
            tracing::info!("OpenWeather could not geocode {:?}", request.query);
            return Ok(None);
        };

        let (current, forecast) = self.fetch_weather(place.latitude, place.longitude).await?;
        Ok(Some(OpenWeatherPayload {
            place,
            current,
            forecast,
        }))
    }

    /// Resolve the request to a place with coordinates.
    ///
    /// Numeric queries go to the zip endpoint; anything else goes to direct
    /// search, retried once with the caller's original text when the
    /// simplified query finds nothing.
    pub async fn geocode(
        &self,
        request: &FetchRequest,
    ) -> Result<Option<OpenWeatherPlace>, ForecastError> {
        let query = request.query.trim();

        if is_numeric_query(query) {
            return self.geocode_zip(query).await;
        }

        if let Some(place) = self.geocode_direct(query).await? {
            return Ok(Some(place));
        }

        let original = request.original.trim();
        if !original.is_empty() && original != query {
            tracing::debug!("Retrying OpenWeather geocoding with original address {:?}", original);
            return self.geocode_direct(original).await;
        }

        Ok(None)
    }

    async fn geocode_zip(&self, query: &str) -> Result<Option<OpenWeatherPlace>, ForecastError> {
        let url = format!("{}/geo/1.0/zip", self.base_url);
        // ZIP+4 is not accepted; the five-digit prefix is
        let zip = query.split('-').next().unwrap_or(query);
        let zip_param = format!("{},US", zip);

        let response = send(
            SERVICE,
            self.client
                .get(&url)
                .query(&[("zip", zip_param.as_str()), ("appid", self.api_key.as_str())]),
        )
        .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let place: GeoPlace = handle_response(SERVICE, response).await?;
        Ok(place.into_place(zip))
    }

    async fn geocode_direct(&self, query: &str) -> Result<Option<OpenWeatherPlace>, ForecastError> {
        let url = format!("{}/geo/1.0/direct", self.base_url);

        let response = send(
            SERVICE,
            self.client.get(&url).query(&[
                ("q", query),
                ("limit", "1"),
                ("appid", self.api_key.as_str()),
            ]),
        )
        .await?;

        let places: Vec<GeoPlace> = handle_response(SERVICE, response).await?;
        Ok(places.into_iter().next().and_then(|p| p.into_place(query)))
    }

    /// Current conditions and forecast for a coordinate pair, fetched
    /// concurrently.
    async fn fetch_weather(
        &self,
        lat: f64,
        lon: f64,
    ) -> Result<(OpenWeatherCurrent, OpenWeatherForecast), ForecastError> {
        let lat = lat.to_string();
        let lon = lon.to_string();
        let params = [
            ("lat", lat.as_str()),
            ("lon", lon.as_str()),
            ("units", "metric"),
            ("appid", self.api_key.as_str()),
        ];

        let current_url = format!("{}/data/2.5/weather", self.base_url);
        let forecast_url = format!("{}/data/2.5/forecast", self.base_url);

        let current = async {
            let response = send(SERVICE, self.client.get(&current_url).query(&params)).await?;
            handle_response::<OpenWeatherCurrent>(SERVICE, response).await
        };
        let forecast = async {
            let response = send(SERVICE, self.client.get(&forecast_url).query(&params)).await?;
            handle_response::<OpenWeatherForecast>(SERVICE, response).await
        };

        tokio::try_join!(current, forecast)
    }
}

/// Postal-code style queries (`98101`, `98101-1234`).
fn is_numeric_query(query: &str) -> bool {
    !query.is_empty()
        && query.chars().any(|c| c.is_ascii_digit())
        && query.chars().all(|c| c.is_ascii_digit() || c == '-')
}
