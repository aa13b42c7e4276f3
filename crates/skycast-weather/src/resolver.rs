//! Address to forecast orchestration.
//!
//! ```text
//! normalize -> cache lookup -> hit: return
//!                           -> miss: rate limit -> denied: RateLimitExceeded
//!                                               -> admitted: fetch -> transform -> persist
//! ```
//!
//! Concurrent misses for the same key are collapsed: the first caller fetches,
//! the rest wait on a per-key lock and then find the fresh record in the cache.

use chrono::Utc;
use parking_lot::Mutex;
use skycast_core::{Config, ForecastError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::instrument;

use crate::cache::ForecastCache;
use crate::geocode::{select_lookup_query, Geocoder};
use crate::normalize::{extract_postal_code, is_coordinate_pair, is_postal_code, normalize};
use crate::provider::{FetchRequest, WeatherProvider};
use crate::rate_limit::RateLimiter;
use crate::types::{ForecastRecord, Freshness, Resolution, ResolutionSource};

type FlightMap = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Resolves free-form locations into forecasts.
pub struct ForecastResolver {
    provider: WeatherProvider,
    cache: Arc<ForecastCache>,
    rate_limiter: Arc<RateLimiter>,
    geocoder: Option<Geocoder>,
    in_flight: FlightMap,
}

/// How a normalized address will be looked up upstream
#[derive(Debug, Clone, PartialEq)]
struct LookupPlan {
    query: String,
    postal_code: Option<String>,
}

impl ForecastResolver {
    pub fn new(
        provider: WeatherProvider,
        cache: Arc<ForecastCache>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            provider,
            cache,
            rate_limiter,
            geocoder: None,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_geocoder(mut self, geocoder: Geocoder) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    /// Wire every collaborator from configuration.
    pub fn from_config(config: &Config) -> Result<Self, ForecastError> {
        let provider = WeatherProvider::from_config(config)?;
        let ttl = chrono::Duration::minutes(i64::from(config.cache.ttl_minutes));
        let cache = Arc::new(ForecastCache::new(config.database_path(), ttl)?);
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.max_requests_per_minute));

        let mut resolver = Self::new(provider, cache, rate_limiter);
        if config.geocoding.enabled {
            let timeout = Duration::from_secs(config.http.timeout_secs);
            resolver = resolver.with_geocoder(Geocoder::new(&config.geocoding, timeout)?);
        }

        tracing::info!(
            provider = resolver.provider.service_name(),
            geocoding = config.geocoding.enabled,
            "Forecast resolver ready"
        );
        Ok(resolver)
    }

    pub fn cache(&self) -> &Arc<ForecastCache> {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn provider(&self) -> &WeatherProvider {
        &self.provider
    }

    /// Cache key for a raw address: coordinates and addresses without a
    /// trailing postal code key on their normalized form, the rest on the
    /// postal code.
    pub fn cache_key(raw: &str) -> String {
        if is_coordinate_pair(raw) {
            return normalize(raw);
        }
        extract_postal_code(raw).unwrap_or_else(|| normalize(raw))
    }

    /// Resolve `raw` to a forecast.
    ///
    /// Surrounding whitespace is ignored for lookup, but the record keeps
    /// `raw` exactly as submitted.
    ///
    /// `Ok(None)` means the address is valid but no location matched.
    ///
    /// # Errors
    ///
    /// `Validation` for blank input, `RateLimitExceeded` when the provider
    /// budget for this minute is spent, and the provider's own classification
    /// for upstream failures. Nothing is persisted on any error.
    #[instrument(skip(self), level = "info")]
    pub async fn resolve(&self, raw: &str) -> Result<Option<Resolution>, ForecastError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ForecastError::validation("address is empty"));
        }

        let normalized = normalize(trimmed);
        let key = Self::cache_key(trimmed);

        if let Some(hit) = self.cached(&key)? {
            return Ok(Some(hit));
        }

        let _flight = self.enter_flight(&key).await;

        // Another caller may have filled the cache while we waited
        if let Some(hit) = self.cached(&key)? {
            return Ok(Some(hit));
        }

        let result = self.fetch_and_store(raw, trimmed, &normalized, &key).await;
        if result.is_err() {
            self.note_stale(&key);
        }
        result
    }

    /// [`resolve`](Self::resolve) with a caller-side deadline. On expiry the
    /// in-flight request is dropped and nothing is stored.
    pub async fn resolve_with_timeout(
        &self,
        raw: &str,
        timeout: Duration,
    ) -> Result<Option<Resolution>, ForecastError> {
        tokio::time::timeout(timeout, self.resolve(raw))
            .await
            .map_err(|_| {
                tracing::warn!("Resolving {:?} exceeded {:?}", raw, timeout);
                ForecastError::Timeout(format!("resolve exceeded {}ms", timeout.as_millis()))
            })?
    }

    fn cached(&self, key: &str) -> Result<Option<Resolution>, ForecastError> {
        let now = Utc::now();
        match self.cache.lookup_at(key, now)? {
            Some(record) => {
                let freshness = self.cache.freshness(&record, now);
                tracing::debug!("Cache hit for {:?} ({:?})", key, freshness);
                Ok(Some(Resolution {
                    record,
                    freshness,
                    source: ResolutionSource::Cache,
                }))
            }
            None => {
                tracing::debug!("Cache miss for {:?}", key);
                Ok(None)
            }
        }
    }

    async fn fetch_and_store(
        &self,
        raw: &str,
        trimmed: &str,
        normalized: &str,
        key: &str,
    ) -> Result<Option<Resolution>, ForecastError> {
        let plan = self.plan_lookup(trimmed, normalized, key).await;

        let service = self.provider.service_name();
        if !self.rate_limiter.admit(service) {
            tracing::warn!("Rate limit reached for {}", service);
            return Err(ForecastError::rate_limited(service));
        }

        let request = FetchRequest::new(plan.query, trimmed);
        let Some(weather) = self.provider.fetch(&request).await? else {
            tracing::info!("No location found for {:?}", trimmed);
            return Ok(None);
        };

        let record = ForecastRecord::from_weather(raw, key, plan.postal_code, weather, Utc::now());
        let record = match self.cache.store(&record)? {
            Some(stored) => stored,
            None => record,
        };

        tracing::info!(
            "Stored forecast for {:?} ({}°C, {})",
            key,
            record.current_temp_c,
            record.conditions
        );
        Ok(Some(Resolution {
            record,
            freshness: Freshness::Fresh,
            source: ResolutionSource::Provider,
        }))
    }

    /// Pick the provider query and the postal code to record.
    async fn plan_lookup(&self, raw: &str, normalized: &str, key: &str) -> LookupPlan {
        let postal_code = extract_postal_code(raw);

        let geocoder = match &self.geocoder {
            Some(g) if !is_postal_code(key) && !is_coordinate_pair(normalized) => g,
            _ => {
                return LookupPlan {
                    query: key.to_string(),
                    postal_code,
                }
            }
        };

        let result = geocoder.resolve(normalized).await;
        LookupPlan {
            query: select_lookup_query(result.as_ref(), normalized),
            postal_code: postal_code.or_else(|| result.and_then(|r| r.postal_code)),
        }
    }

    fn note_stale(&self, key: &str) {
        match self.cache.latest(key) {
            Ok(Some(record)) => tracing::info!(
                "Not serving stale forecast for {:?} from {}",
                key,
                record.queried_at
            ),
            Ok(None) => {}
            Err(e) => tracing::debug!("Stale lookup failed: {}", e),
        }
    }

    async fn enter_flight(&self, key: &str) -> FlightGuard<'_> {
        let lock = {
            let mut flights = self.in_flight.lock();
            sweep_idle(&mut flights);
            flights.entry(key.to_string()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        FlightGuard {
            flights: &self.in_flight,
            guard: Some(guard),
        }
    }
}

/// Holds the per-key lock; drops the map entry once nobody else wants it.
struct FlightGuard<'a> {
    flights: &'a FlightMap,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut flights = self.flights.lock();
        self.guard.take();
        sweep_idle(&mut flights);
    }
}

/// Drop entries only the map still references. A waiter cancelled while
/// queued on a lock never builds a guard, so its entry is collected here.
fn sweep_idle(flights: &mut HashMap<String, Arc<AsyncMutex<()>>>) {
    flights.retain(|_, lock| Arc::strong_count(lock) > 1);
}
