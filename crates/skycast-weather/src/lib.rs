//! Forecast resolution for SkyCast
//!
//! Turns a free-form location (postal code, city and state, street address,
//! coordinates) into a forecast from one configured upstream provider, with a
//! SQLite-backed cache in front and a per-minute request budget.

pub mod cache;
pub mod geocode;
pub mod normalize;
pub mod provider;
pub mod rate_limit;
pub mod resolver;
pub mod transform;
pub mod types;

pub use cache::ForecastCache;
pub use geocode::{GeocodeResult, Geocoder};
pub use provider::{FetchRequest, OpenWeatherClient, WeatherApiClient, WeatherProvider};
pub use rate_limit::RateLimiter;
pub use resolver::ForecastResolver;
pub use transform::{transform, ProviderPayload};
pub use types::*;
