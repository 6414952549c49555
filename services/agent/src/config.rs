use std::net::SocketAddr;
use std::path::PathBuf;
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

/// Defines the supported realtime engine providers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Gemini,
}

impl Provider {
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAI => "gpt-realtime",
            Provider::Gemini => "models/gemini-2.0-flash-exp",
        }
    }
}

/// Credentials for the room server's admin API, used for stale-room cleanup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomAdminConfig {
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub room_name: String,
    pub agent_identity: String,
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub model: String,
    pub voice: String,
    pub temperature: f32,
    pub robot_api_base: String,
    pub robot_api_timeout: Duration,
    pub participant_timeout: Option<Duration>,
    pub room_admin: Option<RoomAdminConfig>,
    pub stale_room_pattern: String,
    pub log_level: Level,
    pub prompts_path: PathBuf,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env files in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::from_filename(".env.local").ok();
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("RELAY_BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:7880".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("RELAY_BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let room_name = std::env::var("ROOM_NAME").unwrap_or_else(|_| "rumi-room".to_string());
        let agent_identity =
            std::env::var("AGENT_IDENTITY").unwrap_or_else(|_| "rumi-agent".to_string());

        let provider_str =
            std::env::var("REALTIME_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            "gemini" => Provider::Gemini,
            other => {
                return Err(ConfigError::InvalidValue(
                    "REALTIME_PROVIDER".to_string(),
                    format!("'{}' is not a supported provider", other),
                ));
            }
        };

        let openai_api_key = non_empty_var("OPENAI_API_KEY");
        let gemini_api_key = non_empty_var("GEMINI_API_KEY");

        let model = std::env::var("REALTIME_MODEL")
            .unwrap_or_else(|_| provider.default_model().to_string());
        let voice = std::env::var("REALTIME_VOICE").unwrap_or_else(|_| "shimmer".to_string());
        let temperature = parse_var("REALTIME_TEMPERATURE", 0.6_f32)?;

        let robot_api_base = std::env::var("ROBOT_API_BASE")
            .unwrap_or_else(|_| "http://localhost:8000".to_string());
        let robot_api_timeout = Duration::from_millis(parse_var("ROBOT_API_TIMEOUT_MS", 5000_u64)?);

        let participant_timeout = match non_empty_var("PARTICIPANT_TIMEOUT_SECS") {
            Some(raw) => Some(Duration::from_secs(raw.parse::<u64>().map_err(|e| {
                ConfigError::InvalidValue("PARTICIPANT_TIMEOUT_SECS".to_string(), e.to_string())
            })?)),
            None => None,
        };

        let room_admin = match (
            non_empty_var("LIVEKIT_URL"),
            non_empty_var("LIVEKIT_API_KEY"),
            non_empty_var("LIVEKIT_API_SECRET"),
        ) {
            (Some(url), Some(api_key), Some(api_secret)) => Some(RoomAdminConfig {
                url,
                api_key,
                api_secret,
            }),
            _ => None,
        };
        let stale_room_pattern =
            std::env::var("STALE_ROOM_PATTERN").unwrap_or_else(|_| "rummi".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        match provider {
            Provider::OpenAI => {
                if openai_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
                    ));
                }
            }
            Provider::Gemini => {
                if gemini_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "GEMINI_API_KEY must be set for 'gemini' provider".to_string(),
                    ));
                }
            }
        }

        Ok(Self {
            bind_address,
            room_name,
            agent_identity,
            provider,
            openai_api_key,
            gemini_api_key,
            model,
            voice,
            temperature,
            robot_api_base,
            robot_api_timeout,
            participant_timeout,
            room_admin,
            stale_room_pattern,
            log_level,
            prompts_path,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty_var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}
