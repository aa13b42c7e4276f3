use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Which upstream weather provider the resolver talks to.
///
/// Chosen once at startup; never switched per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Single-call provider (WeatherAPI.com).
    #[default]
    WeatherApi,
    /// Two-call provider (OpenWeather geocoding + weather).
    OpenWeather,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::WeatherApi => "weatherapi",
            ProviderKind::OpenWeather => "openweather",
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weatherapi" | "weather_api" => Ok(ProviderKind::WeatherApi),
            "openweather" | "openweathermap" => Ok(ProviderKind::OpenWeather),
            other => Err(ConfigError::Invalid(format!("unknown provider: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherApiConfig {
    /// API key (can be set via WEATHERAPI_KEY)
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_weatherapi_base_url")]
    pub base_url: String,

    /// Days of forecast to request (plan dependent, free tier allows 3)
    #[serde(default = "default_forecast_days")]
    pub forecast_days: u8,
}

fn default_weatherapi_base_url() -> String {
    "https://api.weatherapi.com/v1".to_string()
}

fn default_forecast_days() -> u8 {
    3
}

impl Default for WeatherApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_weatherapi_base_url(),
            forecast_days: default_forecast_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenWeatherConfig {
    /// API key (can be set via OPENWEATHER_API_KEY)
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_openweather_base_url")]
    pub base_url: String,
}

fn default_openweather_base_url() -> String {
    "https://api.openweathermap.org".to_string()
}

impl Default for OpenWeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_openweather_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodingConfig {
    /// Consult the geocoder before calling the provider
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_geocoding_base_url")]
    pub base_url: String,

    #[serde(default = "default_ip_lookup_url")]
    pub ip_lookup_url: String,

    /// Nominatim requires an identifying user agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_geocoding_base_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_ip_lookup_url() -> String {
    "http://ip-api.com".to_string()
}

fn default_user_agent() -> String {
    "SkyCast/0.1.0".to_string()
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_geocoding_base_url(),
            ip_lookup_url: default_ip_lookup_url(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Minutes before a stored forecast is considered stale
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u32,

    /// SQLite file; defaults to `forecasts.db` in the config directory
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

fn default_ttl_minutes() -> u32 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl_minutes(),
            database_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: u32,
}

fn default_max_requests_per_minute() -> u32 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: default_max_requests_per_minute(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-call timeout for every outbound request
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    15
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory
    pub config_dir: PathBuf,

    /// Active provider
    #[serde(default)]
    pub provider: ProviderKind,

    #[serde(default)]
    pub weatherapi: WeatherApiConfig,

    #[serde(default)]
    pub openweather: OpenWeatherConfig,

    #[serde(default)]
    pub geocoding: GeocodingConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("skycast");

        Self {
            config_dir,
            provider: ProviderKind::default(),
            weatherapi: WeatherApiConfig::default(),
            openweather: OpenWeatherConfig::default(),
            geocoding: GeocodingConfig::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if missing,
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from an explicit path. A missing file yields the
    /// defaults, which are written back to that path.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Environment variables win over file values so keys never have to be
    /// written to disk.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(key) = lookup("WEATHERAPI_KEY").filter(|k| !k.is_empty()) {
            self.weatherapi.api_key = Some(key);
        }
        if let Some(key) = lookup("OPENWEATHER_API_KEY").filter(|k| !k.is_empty()) {
            self.openweather.api_key = Some(key);
        }
        if let Some(provider) = lookup("SKYCAST_PROVIDER").filter(|p| !p.is_empty()) {
            self.provider = provider.parse()?;
        }
        Ok(())
    }

    /// Path of the SQLite forecast cache.
    pub fn database_path(&self) -> PathBuf {
        self.cache
            .database_path
            .clone()
            .unwrap_or_else(|| self.config_dir.join("forecasts.db"))
    }

    /// API key of the active provider, if one is configured.
    pub fn active_api_key(&self) -> Option<&str> {
        let key = match self.provider {
            ProviderKind::WeatherApi => self.weatherapi.api_key.as_deref(),
            ProviderKind::OpenWeather => self.openweather.api_key.as_deref(),
        };
        key.filter(|k| !k.trim().is_empty())
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.active_api_key().is_none() {
            let field = match self.provider {
                ProviderKind::WeatherApi => "weatherapi.api_key",
                ProviderKind::OpenWeather => "openweather.api_key",
            };
            result.add_error(
                field,
                format!("No API key configured for active provider {}", self.provider.as_str()),
            );
        }

        self.validate_url(&self.weatherapi.base_url, "weatherapi.base_url", &mut result);
        self.validate_url(&self.openweather.base_url, "openweather.base_url", &mut result);
        if self.geocoding.enabled {
            self.validate_url(&self.geocoding.base_url, "geocoding.base_url", &mut result);
        }

        if !(1..=10).contains(&self.weatherapi.forecast_days) {
            result.add_error(
                "weatherapi.forecast_days",
                "Forecast days must be between 1 and 10",
            );
        } else if self.weatherapi.forecast_days < 3 {
            result.add_warning(
                "weatherapi.forecast_days",
                "Fewer than 3 forecast days requested",
            );
        }

        if self.cache.ttl_minutes == 0 {
            result.add_warning("cache.ttl_minutes", "Caching disabled (0 minutes)");
        } else if self.cache.ttl_minutes > 1440 {
            result.add_warning("cache.ttl_minutes", "Cache TTL is more than 24 hours");
        }

        if self.rate_limit.max_requests_per_minute == 0 {
            result.add_error(
                "rate_limit.max_requests_per_minute",
                "Rate limit of 0 would block every provider call",
            );
        }

        if self.http.timeout_secs == 0 {
            result.add_error("http.timeout_secs", "Timeout must be greater than 0");
        } else if self.http.timeout_secs > 120 {
            result.add_warning("http.timeout_secs", "Timeout is unusually long (>120s)");
        }

        result
    }

    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("skycast");

        Ok(config_dir.join("config.toml"))
    }
}
