//! Centralized error types for SkyCast.
//!
//! Every failure that can come out of a forecast resolution is expressed as a
//! [`ForecastError`]. Callers branch on [`ForecastError::kind`] instead of
//! matching message text, and use [`ErrorKind::suggested_status`] when they
//! need an HTTP-style status for presentation.

use thiserror::Error;

/// Classification of every outcome a resolution can produce besides success.
///
/// `NotFound` never appears inside a [`ForecastError`]: "no location could be
/// resolved" is a successful empty result. It is listed here so presentation
/// code can map every outcome through one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Configuration,
    Authentication,
    RateLimitExceeded,
    Upstream,
    Timeout,
    MalformedResponse,
    NotFound,
    Storage,
}

impl ErrorKind {
    /// Status a presentation layer should surface for this kind.
    pub fn suggested_status(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Configuration => 500,
            ErrorKind::Authentication => 502,
            ErrorKind::RateLimitExceeded => 429,
            ErrorKind::Upstream => 502,
            ErrorKind::Timeout => 504,
            ErrorKind::MalformedResponse => 502,
            ErrorKind::NotFound => 404,
            ErrorKind::Storage => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Timeout => "timeout",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Storage => "storage",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error for the resolve pipeline.
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{service} rejected credentials (status {status})")]
    Authentication { service: String, status: u16 },

    #[error("Rate limit exceeded for {service}")]
    RateLimitExceeded {
        service: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Upstream error: {status} - {message}")]
    Upstream { status: u16, message: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl ForecastError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    pub fn rate_limited(service: impl Into<String>) -> Self {
        Self::RateLimitExceeded {
            service: service.into(),
            retry_after_secs: None,
        }
    }

    /// Map a non-success HTTP status from `service` to the taxonomy.
    ///
    /// 401/403 are credential failures, 429 is upstream throttling, anything
    /// else in the 4xx/5xx range is reported with its status.
    pub fn from_status(
        service: &str,
        status: u16,
        retry_after_secs: Option<u64>,
        message: impl Into<String>,
    ) -> Self {
        match status {
            401 | 403 => Self::Authentication {
                service: service.to_string(),
                status,
            },
            429 => Self::RateLimitExceeded {
                service: service.to_string(),
                retry_after_secs,
            },
            _ => Self::Upstream {
                status,
                message: message.into(),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ForecastError::Validation(_) => ErrorKind::Validation,
            ForecastError::Configuration(_) => ErrorKind::Configuration,
            ForecastError::Authentication { .. } => ErrorKind::Authentication,
            ForecastError::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            ForecastError::Upstream { .. } => ErrorKind::Upstream,
            ForecastError::Timeout(_) => ErrorKind::Timeout,
            ForecastError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            ForecastError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Status for presentation. Upstream 5xx statuses surface as 502 and
    /// upstream 4xx as 502 too, since the caller did nothing wrong.
    pub fn suggested_status(&self) -> u16 {
        self.kind().suggested_status()
    }

    /// Errors that will not go away without operator action.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ForecastError::Configuration(_) | ForecastError::Authentication { .. }
        )
    }

    /// Whether a caller may reasonably try again later. Nothing in this crate
    /// retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            ForecastError::RateLimitExceeded { .. } | ForecastError::Timeout(_) => true,
            ForecastError::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns a user-friendly message suitable for display.
    pub fn user_message(&self) -> &'static str {
        match self {
            ForecastError::Validation(_) => "Please enter a city, address, or postal code.",
            ForecastError::Configuration(_) => {
                "The weather service is not configured. Check your settings."
            }
            ForecastError::Authentication { .. } => {
                "The weather provider rejected our credentials. Check your API key."
            }
            ForecastError::RateLimitExceeded { .. } => {
                "Too many weather requests. Please wait a minute and try again."
            }
            ForecastError::Upstream { status, .. } if *status >= 500 => {
                "The weather provider is experiencing issues. Please try again later."
            }
            ForecastError::Upstream { .. } => "The weather request failed. Please try again.",
            ForecastError::Timeout(_) => "The weather provider did not respond in time.",
            ForecastError::MalformedResponse(_) => {
                "Received unexpected data from the weather provider."
            }
            ForecastError::Storage(e) => e.user_message(),
        }
    }
}

impl From<ConfigError> for ForecastError {
    fn from(e: ConfigError) -> Self {
        ForecastError::Configuration(e.to_string())
    }
}

/// Database/storage errors (SQLite cache).
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Data corruption detected: {0}")]
    Corruption(String),
}

impl DatabaseError {
    pub fn user_message(&self) -> &'static str {
        match self {
            DatabaseError::ConnectionFailed(_) => "Unable to access the forecast cache.",
            DatabaseError::QueryFailed(_) => "A forecast cache operation failed. Please try again.",
            DatabaseError::Corruption(_) => {
                "The forecast cache may be corrupted. Consider clearing it."
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),
}

/// Extension trait for converting reqwest errors to our error types.
pub trait ReqwestErrorExt {
    fn into_forecast_error(self, service: &str) -> ForecastError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_forecast_error(self, service: &str) -> ForecastError {
        if self.is_timeout() || self.is_connect() {
            ForecastError::Timeout(format!("{}: {}", service, self))
        } else if let Some(status) = self.status() {
            ForecastError::from_status(service, status.as_u16(), None, self.to_string())
        } else if self.is_decode() {
            ForecastError::MalformedResponse(format!("{}: {}", service, self))
        } else {
            ForecastError::Timeout(format!("{}: {}", service, self))
        }
    }
}

/// Extension trait for converting rusqlite errors to our error types.
pub trait RusqliteErrorExt {
    fn into_database_error(self) -> DatabaseError;
}

impl RusqliteErrorExt for rusqlite::Error {
    fn into_database_error(self) -> DatabaseError {
        match &self {
            rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("corrupt") => {
                DatabaseError::Corruption(self.to_string())
            }
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::CannotOpen =>
            {
                DatabaseError::ConnectionFailed(self.to_string())
            }
            _ => DatabaseError::QueryFailed(self.to_string()),
        }
    }
}

impl From<rusqlite::Error> for ForecastError {
    fn from(e: rusqlite::Error) -> Self {
        ForecastError::Storage(e.into_database_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ForecastError::from_status("weatherapi", 401, None, "").kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            ForecastError::from_status("weatherapi", 403, None, "").kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            ForecastError::from_status("weatherapi", 429, Some(30), "").kind(),
            ErrorKind::RateLimitExceeded
        );
        assert!(matches!(
            ForecastError::from_status("openweather", 404, None, "nope"),
            ForecastError::Upstream { status: 404, .. }
        ));
        assert!(matches!(
            ForecastError::from_status("openweather", 503, None, "down"),
            ForecastError::Upstream { status: 503, .. }
        ));
    }

    #[test]
    fn test_suggested_statuses() {
        assert_eq!(ForecastError::validation("blank").suggested_status(), 400);
        assert_eq!(ForecastError::rate_limited("x").suggested_status(), 429);
        assert_eq!(ForecastError::Timeout("slow".into()).suggested_status(), 504);
        assert_eq!(ErrorKind::NotFound.suggested_status(), 404);
    }

    #[test]
    fn test_fatal_and_retryable() {
        assert!(ForecastError::Configuration("no key".into()).is_fatal());
        assert!(ForecastError::Authentication {
            service: "weatherapi".into(),
            status: 401
        }
        .is_fatal());
        assert!(!ForecastError::Timeout("x".into()).is_fatal());

        assert!(ForecastError::rate_limited("x").is_retryable());
        assert!(ForecastError::Upstream {
            status: 502,
            message: String::new()
        }
        .is_retryable());
        assert!(!ForecastError::Upstream {
            status: 400,
            message: String::new()
        }
        .is_retryable());
        assert!(!ForecastError::malformed("x").is_retryable());
    }

    #[test]
    fn test_every_kind_is_distinct() {
        let errors = vec![
            ForecastError::validation("x"),
            ForecastError::Configuration("x".into()),
            ForecastError::Authentication {
                service: "x".into(),
                status: 401,
            },
            ForecastError::rate_limited("x"),
            ForecastError::Upstream {
                status: 500,
                message: "x".into(),
            },
            ForecastError::Timeout("x".into()),
            ForecastError::malformed("x"),
            ForecastError::Storage(DatabaseError::QueryFailed("x".into())),
        ];

        let kinds: std::collections::HashSet<ErrorKind> =
            errors.iter().map(ForecastError::kind).collect();
        assert_eq!(kinds.len(), errors.len());
        assert!(!kinds.contains(&ErrorKind::NotFound));

        for e in &errors {
            assert!(!e.user_message().is_empty());
        }
    }

    #[test]
    fn test_config_error_conversion() {
        let err: ForecastError = ConfigError::Invalid("unknown provider: metoffice".into()).into();
        assert!(matches!(
            err,
            ForecastError::Configuration(ref m) if m.contains("metoffice")
        ));
    }

    #[test]
    fn test_rusqlite_conversion() {
        let err: ForecastError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(
            err,
            ForecastError::Storage(DatabaseError::QueryFailed(_))
        ));
    }
}
