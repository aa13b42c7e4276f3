//! Forward geocoding: turn a normalized address into a location record.
//! Uses Nominatim (OpenStreetMap) - free, no API key required.
//!
//! Nothing in here returns an error. Transport failures, bad statuses and
//! unparseable bodies are logged and surface as "no result".

use reqwest::Client;
use serde::Deserialize;
use skycast_core::{ForecastError, GeocodingConfig};
use std::net::IpAddr;
use std::time::Duration;
use tracing::instrument;

/// Best-effort location for an address
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeocodeResult {
    pub postal_code: Option<String>,
    pub coordinates: Option<(f64, f64)>,
    pub city: Option<String>,
    pub region_code: Option<String>,
    pub country: Option<String>,
}

impl GeocodeResult {
    /// Most precise lookup string this result supports:
    /// postal code, then `lat,lon`, then `city,region`, then `city,country`.
    pub fn lookup_query(&self) -> Option<String> {
        if let Some(postal) = self.postal_code.as_deref().filter(|p| !p.is_empty()) {
            return Some(postal.to_string());
        }
        if let Some((lat, lon)) = self.coordinates {
            return Some(format!("{},{}", lat, lon));
        }
        let city = self.city.as_deref().filter(|c| !c.is_empty())?;
        if let Some(region) = self.region_code.as_deref().filter(|r| !r.is_empty()) {
            return Some(format!("{},{}", city, region));
        }
        self.country
            .as_deref()
            .filter(|c| !c.is_empty())
            .map(|country| format!("{},{}", city, country))
    }
}

/// Pick the provider query for `normalized`, falling back to the normalized
/// string itself when geocoding produced nothing usable.
pub fn select_lookup_query(result: Option<&GeocodeResult>, normalized: &str) -> String {
    result
        .and_then(GeocodeResult::lookup_query)
        .unwrap_or_else(|| normalized.to_string())
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: Option<String>,
    lon: Option<String>,
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    state: Option<String>,
    /// e.g. "US-WA"
    #[serde(rename = "ISO3166-2-lvl4")]
    iso_region: Option<String>,
    postcode: Option<String>,
    country_code: Option<String>,
}

impl From<NominatimPlace> for GeocodeResult {
    fn from(place: NominatimPlace) -> Self {
        let coordinates = match (
            place.lat.as_deref().and_then(|s| s.parse::<f64>().ok()),
            place.lon.as_deref().and_then(|s| s.parse::<f64>().ok()),
        ) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        };

        let Some(addr) = place.address else {
            return GeocodeResult {
                coordinates,
                ..Default::default()
            };
        };

        // ISO code ("US-WA" -> "WA") beats the spelled-out state name
        let region_code = addr
            .iso_region
            .as_deref()
            .and_then(|iso| iso.split_once('-'))
            .map(|(_, region)| region.to_string())
            .or(addr.state);

        GeocodeResult {
            postal_code: addr.postcode,
            coordinates,
            city: addr.city.or(addr.town).or(addr.village).or(addr.municipality),
            region_code,
            country: addr.country_code.map(|c| c.to_uppercase()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpLookupResponse {
    status: Option<String>,
    country_code: Option<String>,
}

/// Geocoding collaborator
#[derive(Debug, Clone)]
pub struct Geocoder {
    client: Client,
    base_url: String,
    ip_lookup_url: String,
}

impl Geocoder {
    pub fn new(config: &GeocodingConfig, timeout: Duration) -> Result<Self, ForecastError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| ForecastError::Configuration(format!("geocoding client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            ip_lookup_url: config.ip_lookup_url.trim_end_matches('/').to_string(),
        })
    }

    /// Search for `text`; best match first. Empty on any failure.
    #[instrument(skip(self), level = "debug")]
    pub async fn search(&self, text: &str) -> Vec<GeocodeResult> {
        let url = format!("{}/search", self.base_url);
        let response = match self
            .client
            .get(&url)
            .query(&[
                ("q", text),
                ("format", "jsonv2"),
                ("addressdetails", "1"),
                ("limit", "1"),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Geocode request failed: {}", e);
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            tracing::warn!("Geocode returned status {}", response.status());
            return Vec::new();
        }

        match response.json::<Vec<NominatimPlace>>().await {
            Ok(places) => places.into_iter().map(GeocodeResult::from).collect(),
            Err(e) => {
                tracing::warn!("Geocode parse error: {}", e);
                Vec::new()
            }
        }
    }

    /// Best single result for `text`, if any.
    pub async fn resolve(&self, text: &str) -> Option<GeocodeResult> {
        let result = self.search(text).await.into_iter().next();
        match &result {
            Some(r) => tracing::debug!("Geocoded {:?} to {:?}", text, r.lookup_query()),
            None => tracing::debug!("No geocoding result for {:?}", text),
        }
        result
    }

    /// Country code (e.g. "US") for an IP address.
    #[instrument(skip(self), level = "debug")]
    pub async fn reverse_ip(&self, ip: IpAddr) -> Option<String> {
        let url = format!("{}/json/{}", self.ip_lookup_url, ip);

        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("IP lookup request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!("IP lookup returned status {}", response.status());
            return None;
        }

        let body: IpLookupResponse = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("IP lookup parse error: {}", e);
                return None;
            }
        };

        if body.status.as_deref().is_some_and(|s| s != "success") {
            return None;
        }
        body.country_code.filter(|c| !c.is_empty())
    }
}
