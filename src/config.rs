//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "chat.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Session token configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for session tokens (32+ bytes)
    pub session_secret: String,
    /// Session max age in seconds (default: 604800 = 7 days)
    pub session_max_age: i64,
}

/// Who may pin or unpin messages in a conversation
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PinPolicy {
    /// Any active participant
    #[default]
    AnyParticipant,
    /// Conversation admins only
    AdminsOnly,
}

/// Message lifecycle rules
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Maximum text length in characters
    pub max_content_length: usize,
    /// Sender may edit for this long after creation
    pub edit_window_seconds: i64,
    /// Sender may delete for everyone for this long after creation
    pub delete_window_seconds: i64,
    /// Maximum number of media references per message
    pub max_media_per_message: usize,
    pub pin_policy: PinPolicy,
    /// Placeholder shown in place of a message deleted for everyone
    pub tombstone_text: String,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            max_content_length: 5000,
            edit_window_seconds: 15 * 60,
            delete_window_seconds: 60 * 60,
            max_media_per_message: 10,
            pin_policy: PinPolicy::AnyParticipant,
            tombstone_text: "This message was deleted".to_string(),
        }
    }
}

/// Crisis and policy classifier configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Self-harm / crisis phrases, matched case-insensitively on word boundaries
    pub crisis_keywords: Vec<String>,
    pub policy_terms: PolicyTermsConfig,
    pub thresholds: SeverityThresholds,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            crisis_keywords: default_crisis_keywords(),
            policy_terms: PolicyTermsConfig::default(),
            thresholds: SeverityThresholds::default(),
        }
    }
}

fn default_crisis_keywords() -> Vec<String> {
    [
        "suicide",
        "suicidal",
        "kill myself",
        "end my life",
        "want to die",
        "self harm",
        "hurt myself",
        "cut myself",
        "no reason to live",
        "better off dead",
        "end it all",
        "overdose",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Policy-violation terms, grouped by category
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyTermsConfig {
    pub harassment: Vec<String>,
    pub hate_speech: Vec<String>,
    pub profanity: Vec<String>,
}

impl Default for PolicyTermsConfig {
    fn default() -> Self {
        let words = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            harassment: words(&["kill you", "nobody likes you", "you deserve to suffer"]),
            hate_speech: words(&["subhuman", "vermin"]),
            profanity: words(&["fuck", "shit", "bitch", "asshole"]),
        }
    }
}

/// Distinct-keyword counts at which crisis severity escalates
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SeverityThresholds {
    pub medium_at: usize,
    pub high_at: usize,
    pub critical_at: usize,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            medium_at: 1,
            high_at: 2,
            critical_at: 3,
        }
    }
}

/// Notification bridge configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Oldest notifications are evicted beyond this many per recipient
    pub max_per_recipient: usize,
    /// How long a viewing heartbeat marks a user as actively viewing
    pub viewer_ttl_seconds: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            max_per_recipient: 100,
            viewer_ttl_seconds: 60,
        }
    }
}

/// Real-time delivery configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Upper bound for a single transport emit
    pub timeout_seconds: u64,
    /// Buffered events per connected user before slow receivers lag
    pub channel_capacity: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 5,
            channel_capacity: 256,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl LoggingConfig {
    /// Default `EnvFilter` directives when `RUST_LOG` is unset
    pub fn filter_directives(&self) -> String {
        format!("carechat={},tower_http=debug", self.level)
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (CARECHAT__*)
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.domain", "localhost")?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "data/carechat.db")?
            .set_default("auth.session_max_age", 604800)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("CARECHAT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;
        const MIN_SESSION_SECRET_BYTES: usize = 32;

        if self.auth.session_secret.len() < MIN_SESSION_SECRET_BYTES {
            return Err(AppError::Config(format!(
                "auth.session_secret must be at least {} bytes",
                MIN_SESSION_SECRET_BYTES
            )));
        }

        if self.auth.session_max_age <= 0 {
            return Err(AppError::Config(
                "auth.session_max_age must be greater than 0".to_string(),
            ));
        }

        let messaging = &self.messaging;
        if messaging.max_content_length == 0 {
            return Err(AppError::Config(
                "messaging.max_content_length must be greater than 0".to_string(),
            ));
        }
        if messaging.edit_window_seconds <= 0 || messaging.delete_window_seconds <= 0 {
            return Err(AppError::Config(
                "messaging edit/delete windows must be greater than 0".to_string(),
            ));
        }

        let t = self.safety.thresholds;
        if t.medium_at == 0 || t.medium_at > t.high_at || t.high_at > t.critical_at {
            return Err(AppError::Config(format!(
                "safety.thresholds must satisfy 1 <= medium_at <= high_at <= critical_at (got {}/{}/{})",
                t.medium_at, t.high_at, t.critical_at
            )));
        }

        if self.notifications.max_per_recipient == 0 {
            return Err(AppError::Config(
                "notifications.max_per_recipient must be greater than 0".to_string(),
            ));
        }

        if self.delivery.channel_capacity == 0 {
            return Err(AppError::Config(
                "delivery.channel_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                domain: "localhost".to_string(),
                protocol: "http".to_string(),
            },
            database: DatabaseConfig {
                path: PathBuf::from("/tmp/carechat-test.db"),
            },
            auth: AuthConfig {
                session_secret: "x".repeat(32),
                session_max_age: 604_800,
            },
            messaging: MessagingConfig::default(),
            safety: SafetyConfig::default(),
            notifications: NotificationConfig::default(),
            delivery: DeliveryConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(valid_config().validate().is_ok());
        assert_eq!(valid_config().server.base_url(), "http://localhost");
    }

    #[test]
    fn validate_rejects_short_session_secret() {
        let mut config = valid_config();
        config.auth.session_secret = "short-secret".to_string();

        let error = config
            .validate()
            .expect_err("session secret shorter than 32 bytes must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("auth.session_secret")
        ));
    }

    #[test]
    fn validate_rejects_non_monotonic_thresholds() {
        let mut config = valid_config();
        config.safety.thresholds = SeverityThresholds {
            medium_at: 2,
            high_at: 1,
            critical_at: 3,
        };

        let error = config.validate().expect_err("thresholds must be ordered");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message) if message.contains("safety.thresholds")
        ));
    }

    #[test]
    fn validate_rejects_zero_notification_cap() {
        let mut config = valid_config();
        config.notifications.max_per_recipient = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn logging_config_drives_filter_and_format() {
        let mut logging = valid_config().logging;
        assert_eq!(logging.filter_directives(), "carechat=info,tower_http=debug");
        assert!(!logging.is_json());

        logging.level = "debug".to_string();
        logging.format = "JSON".to_string();
        assert_eq!(logging.filter_directives(), "carechat=debug,tower_http=debug");
        assert!(logging.is_json());
    }

    #[test]
    fn pin_policy_deserializes_snake_case() {
        let policy: PinPolicy = serde_json::from_str("\"admins_only\"").unwrap();
        assert_eq!(policy, PinPolicy::AdminsOnly);
    }
}
