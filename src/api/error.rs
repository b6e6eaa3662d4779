//! API error types shared by all external collaborator clients

use std::fmt;

/// Errors that can occur when interacting with external APIs
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 401 Unauthorized - token invalid or expired
    Unauthorized { provider: String },
    /// 403 Forbidden - token lacks required permissions
    Forbidden { provider: String },
    /// 429 Rate Limited
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },
    /// Network or timeout error
    NetworkError { provider: String, message: String },
    /// Other HTTP errors
    HttpError {
        provider: String,
        status: u16,
        message: String,
    },
    /// Provider not configured (no token in environment)
    NotConfigured { provider: String },
}

impl ApiError {
    /// Check if this is an authentication error (401 or 403)
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            ApiError::Unauthorized { .. } | ApiError::Forbidden { .. }
        )
    }

    /// Get the provider name for this error
    pub fn provider_name(&self) -> &str {
        match self {
            ApiError::Unauthorized { provider }
            | ApiError::Forbidden { provider }
            | ApiError::RateLimited { provider, .. }
            | ApiError::NetworkError { provider, .. }
            | ApiError::HttpError { provider, .. }
            | ApiError::NotConfigured { provider } => provider,
        }
    }

    /// Create an unauthorized error for a provider
    pub fn unauthorized(provider: impl Into<String>) -> Self {
        ApiError::Unauthorized {
            provider: provider.into(),
        }
    }

    /// Create a forbidden error for a provider
    pub fn forbidden(provider: impl Into<String>) -> Self {
        ApiError::Forbidden {
            provider: provider.into(),
        }
    }

    /// Create a rate limited error for a provider
    pub fn rate_limited(provider: impl Into<String>, retry_after: Option<u64>) -> Self {
        ApiError::RateLimited {
            provider: provider.into(),
            retry_after_secs: retry_after,
        }
    }

    /// Create a network error for a provider
    pub fn network(provider: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::NetworkError {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create an HTTP error for a provider
    pub fn http(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        ApiError::HttpError {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    /// Create a not configured error for a provider
    pub fn not_configured(provider: impl Into<String>) -> Self {
        ApiError::NotConfigured {
            provider: provider.into(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Unauthorized { provider } => {
                write!(f, "{}: Unauthorized (401)", provider)
            }
            ApiError::Forbidden { provider } => {
                write!(f, "{}: Forbidden (403) - insufficient permissions", provider)
            }
            ApiError::RateLimited {
                provider,
                retry_after_secs,
            } => {
                if let Some(secs) = retry_after_secs {
                    write!(f, "{}: Rate limited - retry after {}s", provider, secs)
                } else {
                    write!(f, "{}: Rate limited", provider)
                }
            }
            ApiError::NetworkError { provider, message } => {
                write!(f, "{}: Network error - {}", provider, message)
            }
            ApiError::HttpError {
                provider,
                status,
                message,
            } => {
                write!(f, "{}: HTTP {} - {}", provider, status, message)
            }
            ApiError::NotConfigured { provider } => {
                write!(f, "{}: Not configured (no API token)", provider)
            }
        }
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_auth_error() {
        assert!(ApiError::unauthorized("test").is_auth_error());
        assert!(ApiError::forbidden("test").is_auth_error());
        assert!(!ApiError::rate_limited("test", None).is_auth_error());
        assert!(!ApiError::network("test", "timeout").is_auth_error());
    }

    #[test]
    fn test_provider_name() {
        assert_eq!(
            ApiError::unauthorized("anthropic").provider_name(),
            "anthropic"
        );
        assert_eq!(ApiError::forbidden("github").provider_name(), "github");
        assert_eq!(
            ApiError::rate_limited("linear", Some(60)).provider_name(),
            "linear"
        );
    }

    #[test]
    fn test_display() {
        let err = ApiError::rate_limited("anthropic", Some(30));
        assert_eq!(err.to_string(), "anthropic: Rate limited - retry after 30s");

        let err = ApiError::not_configured("github");
        assert_eq!(err.to_string(), "github: Not configured (no API token)");
    }
}
