//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - Default values (built into the code)
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Deployment overrides: `PORT`, `SPEECH_SERVICE_KEY`, `SPEECH_SERVICE_REGION`
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment environment variables
//! 2. APP_-prefixed environment variables
//! 3. Configuration file (config.toml)
//! 4. Default values
//!
//! Configuration is loaded and validated once at startup; a missing speech
//! credential or an unusable port is a startup failure, not a runtime one.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub speech: SpeechServiceConfig,
    pub streaming: StreamingConfig,
}

/// Server-specific configuration settings.
///
/// `host = "127.0.0.1"` accepts local connections only;
/// `host = "0.0.0.0"` accepts connections from any address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Cloud speech/translation provider credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechServiceConfig {
    /// Subscription key for the speech and translator services.
    pub subscription_key: String,
    /// Service region, e.g. `japaneast`. Selects the streaming endpoint.
    pub region: String,
    /// Base URL of the text-translation REST API.
    pub translator_endpoint: String,
    /// Full WebSocket URL of the streaming speech endpoint. Unset means the
    /// region-derived public cloud endpoint; set it for sovereign clouds.
    #[serde(default)]
    pub streaming_endpoint: Option<String>,
}

/// Streaming session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Maximum number of concurrent streaming sessions.
    pub max_concurrent_sessions: usize,
    /// Audio ingress buffer bound, in chunks. At ~8 KiB per chunk this caps
    /// per-session audio memory near capacity × 8 KiB.
    pub ingress_capacity: usize,
    /// How often the idle sweeper runs, in seconds.
    pub sweep_interval_secs: u64,
    /// Sessions without audio activity for longer than this are evicted,
    /// in seconds.
    pub max_idle_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            speech: SpeechServiceConfig {
                subscription_key: String::new(),
                region: String::new(),
                translator_endpoint: "https://api.cognitive.microsofttranslator.com".to_string(),
                streaming_endpoint: None,
            },
            streaming: StreamingConfig {
                max_concurrent_sessions: 32,
                ingress_capacity: 100,
                sweep_interval_secs: 30,
                max_idle_secs: 300,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// The deployment variables don't follow the APP_ prefix convention but
    /// are the contract this service is operated with, so they are applied
    /// as explicit overrides on top of everything else.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }
        if let Ok(key) = env::var("SPEECH_SERVICE_KEY") {
            settings = settings.set_override("speech.subscription_key", key)?;
        }
        if let Ok(region) = env::var("SPEECH_SERVICE_REGION") {
            settings = settings.set_override("speech.region", region)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration is usable.
    ///
    /// Catching these at startup turns silent misconfiguration into a clear
    /// non-zero exit before any session is accepted.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.speech.subscription_key.is_empty() {
            return Err(anyhow::anyhow!(
                "Speech service subscription key is not set (SPEECH_SERVICE_KEY)"
            ));
        }

        if self.speech.region.is_empty() {
            return Err(anyhow::anyhow!(
                "Speech service region is not set (SPEECH_SERVICE_REGION)"
            ));
        }

        if self.streaming.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.streaming.ingress_capacity == 0 {
            return Err(anyhow::anyhow!("Audio ingress capacity must be greater than 0"));
        }

        if self.streaming.sweep_interval_secs == 0 || self.streaming.max_idle_secs == 0 {
            return Err(anyhow::anyhow!(
                "Sweep interval and max idle time must be greater than 0"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> AppConfig {
        let mut config = AppConfig::default();
        config.speech.subscription_key = "key".to_string();
        config.speech.region = "japaneast".to_string();
        config
    }

    #[test]
    fn test_default_config_shape() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.streaming.ingress_capacity, 100);
        assert_eq!(config.streaming.sweep_interval_secs, 30);
        assert_eq!(config.streaming.max_idle_secs, 300);
    }

    #[test]
    fn test_default_config_fails_validation_without_credentials() {
        // Credentials are mandatory; a bare default must not pass.
        assert!(AppConfig::default().validate().is_err());
        assert!(configured().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_port_zero() {
        let mut config = configured();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let mut config = configured();
        config.streaming.ingress_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = configured();
        config.streaming.max_concurrent_sessions = 0;
        assert!(config.validate().is_err());

        let mut config = configured();
        config.streaming.max_idle_secs = 0;
        assert!(config.validate().is_err());
    }
}
