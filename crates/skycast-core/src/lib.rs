pub mod config;
pub mod error;

pub use config::{
    CacheConfig, Config, GeocodingConfig, HttpConfig, OpenWeatherConfig, ProviderKind,
    RateLimitConfig, ValidationResult, WeatherApiConfig,
};
pub use error::{
    ConfigError, DatabaseError, ErrorKind, ForecastError, ReqwestErrorExt, RusqliteErrorExt,
};

use anyhow::Result;

/// Initialize logging for SkyCast binaries
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("SkyCast core initialized");
    Ok(())
}
