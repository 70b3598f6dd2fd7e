use parley_core::model::LanguageCode;
use parley_core::speech::CaptureLimits;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Where session state is kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    /// Firebase Realtime Database over REST.
    Firebase,
    /// Process-local; only useful for trying the binary out alone.
    Memory,
}

/// How received messages are spoken.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SynthesisMode {
    Console,
    GoogleTts,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub firebase_database_url: Option<String>,
    pub firebase_auth_token: Option<String>,
    pub default_language: LanguageCode,
    pub inbound_poll: Duration,
    pub handshake_poll: Duration,
    pub capture: CaptureLimits,
    pub handshake_timeout: Option<Duration>,
    pub synthesis: SynthesisMode,
    pub audio_player: String,
    pub log_level: Level,
}

fn parse_u64(var: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string()))
}

fn millis(var: &str, default: u64) -> Result<Duration, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => parse_u64(var, &raw).map(Duration::from_millis),
        Err(_) => Ok(Duration::from_millis(default)),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let backend_str = std::env::var("STORE_BACKEND").unwrap_or_else(|_| "firebase".to_string());
        let store_backend = match backend_str.to_lowercase().as_str() {
            "firebase" => StoreBackend::Firebase,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(ConfigError::InvalidValue(
                    "STORE_BACKEND".to_string(),
                    format!("'{other}' is not one of firebase, memory"),
                ));
            }
        };

        let firebase_database_url = std::env::var("FIREBASE_DATABASE_URL").ok();
        let firebase_auth_token = std::env::var("FIREBASE_AUTH_TOKEN").ok();
        if store_backend == StoreBackend::Firebase && firebase_database_url.is_none() {
            return Err(ConfigError::MissingVar(
                "FIREBASE_DATABASE_URL must be set for the 'firebase' backend".to_string(),
            ));
        }

        let default_language = std::env::var("DEFAULT_LANGUAGE")
            .map(|raw| LanguageCode::new(&raw))
            .unwrap_or_default();

        let inbound_poll = millis("INBOUND_POLL_MS", 100)?;
        let handshake_poll = millis("HANDSHAKE_POLL_MS", 1000)?;
        let capture = CaptureLimits {
            timeout: millis("CAPTURE_TIMEOUT_MS", 1000)?,
            phrase_limit: millis("PHRASE_LIMIT_MS", 5000)?,
        };
        let handshake_timeout = match std::env::var("HANDSHAKE_TIMEOUT_SECS") {
            Ok(raw) => Some(Duration::from_secs(parse_u64("HANDSHAKE_TIMEOUT_SECS", &raw)?)),
            Err(_) => None,
        };

        let synthesis_str = std::env::var("SYNTHESIS").unwrap_or_else(|_| "console".to_string());
        let synthesis = match synthesis_str.to_lowercase().as_str() {
            "console" => SynthesisMode::Console,
            "gtts" => SynthesisMode::GoogleTts,
            other => {
                return Err(ConfigError::InvalidValue(
                    "SYNTHESIS".to_string(),
                    format!("'{other}' is not one of console, gtts"),
                ));
            }
        };
        let audio_player = std::env::var("AUDIO_PLAYER").unwrap_or_else(|_| "mpg123".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            store_backend,
            firebase_database_url,
            firebase_auth_token,
            default_language,
            inbound_poll,
            handshake_poll,
            capture,
            handshake_timeout,
            synthesis,
            audio_player,
            log_level,
        })
    }
}
