use std::{env, path::PathBuf, time::Duration};

use aws_config::{retry::RetryConfig, timeout::TimeoutConfig, BehaviorVersion};

/// Application environment configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    /// Production environment
    Production,
    /// Staging environment
    Staging,
    /// Development environment (uses `LocalStack`)
    Development,
}

impl Environment {
    /// Creates an Environment from the `APP_ENV` environment variable
    ///
    /// # Panics
    ///
    /// Panics if `APP_ENV` contains an invalid value
    #[must_use]
    pub fn from_env() -> Self {
        let env = env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .trim()
            .to_lowercase();

        match env.as_str() {
            "production" => Self::Production,
            "staging" => Self::Staging,
            "development" => Self::Development,
            _ => panic!("Invalid environment: {env}"),
        }
    }

    /// Returns the endpoint URL to use for AWS services
    #[must_use]
    pub const fn override_aws_endpoint_url(&self) -> Option<&str> {
        match self {
            // Regular AWS endpoints for production and staging
            Self::Production | Self::Staging => None,
            // LocalStack endpoint for development
            Self::Development => Some("http://localhost:4566"),
        }
    }

    /// AWS configuration with retry and timeout settings
    pub async fn aws_config(&self) -> aws_config::SdkConfig {
        let retry_config = RetryConfig::standard()
            .with_max_attempts(3)
            .with_initial_backoff(Duration::from_millis(50));

        let timeout_config = TimeoutConfig::builder()
            .operation_timeout(Duration::from_secs(30))
            .build();

        let mut config_builder = aws_config::load_defaults(BehaviorVersion::latest())
            .await
            .to_builder()
            .retry_config(retry_config)
            .timeout_config(timeout_config);

        if let Some(endpoint_url) = self.override_aws_endpoint_url() {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }

        config_builder.build()
    }

    /// Directory holding the self-attested custody artifacts
    ///
    /// # Panics
    ///
    /// Panics if the `ATTESTATIONS_DIRECTORY` environment variable is not set in production/staging
    #[must_use]
    pub fn attestations_directory(&self) -> PathBuf {
        match self {
            Self::Production | Self::Staging => env::var("ATTESTATIONS_DIRECTORY")
                .expect("ATTESTATIONS_DIRECTORY environment variable is not set")
                .into(),
            Self::Development => env::var("ATTESTATIONS_DIRECTORY")
                .unwrap_or_else(|_| "./attestations".to_string())
                .into(),
        }
    }

    /// Replacement for the embedded AWS Nitro Enclaves root certificate (PEM or DER)
    ///
    /// Only honoured in development, production and staging always trust the
    /// embedded root.
    #[must_use]
    pub fn nitro_root_certificate_override(&self) -> Option<PathBuf> {
        match self {
            Self::Production | Self::Staging => None,
            Self::Development => env::var("NITRO_ROOT_CERTIFICATE").ok().map(PathBuf::from),
        }
    }

    /// Port of the TCP listener
    ///
    /// # Panics
    ///
    /// Panics if `PORT` is set but is not a valid u16
    #[must_use]
    pub fn port(&self) -> u16 {
        env::var("PORT").map_or(8000, |port| {
            port.parse()
                .expect("PORT environment variable is not a valid u16")
        })
    }

    /// Whether the TCP listener is served, `TCP_LISTENER_DISABLED=true` turns it off
    #[must_use]
    pub fn tcp_listener_enabled(&self) -> bool {
        !env::var("TCP_LISTENER_DISABLED").is_ok_and(|value| is_truthy(&value))
    }

    /// Port of the optional vsock listener
    ///
    /// # Panics
    ///
    /// Panics if `VSOCK_PORT` is set but is not a valid u32
    #[must_use]
    pub fn vsock_port(&self) -> Option<u32> {
        env::var("VSOCK_PORT").ok().map(|port| {
            port.parse()
                .expect("VSOCK_PORT environment variable is not a valid u32")
        })
    }

    /// Whether to show API docs
    #[must_use]
    pub const fn show_api_docs(&self) -> bool {
        matches!(self, Self::Development | Self::Staging)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
