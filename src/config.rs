//! Process configuration, read from the environment at startup.

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::prompt::PromptConfig;

/// Twilio credentials and sender identity.
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    pub sender_number: String,
}

/// Completion provider settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout: Duration,
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub db_path: PathBuf,
    pub twilio: TwilioConfig,
    pub llm: LlmConfig,
    pub prompts: PromptConfig,
}

impl Config {
    /// Read configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr = parse_value(
            "INTERVIEW_COACH_BIND",
            &env_or("INTERVIEW_COACH_BIND", "0.0.0.0:8000"),
        )?;
        let db_path = PathBuf::from(env_or(
            "INTERVIEW_COACH_DB_PATH",
            "./data/interview-coach.db",
        ));

        let twilio = TwilioConfig {
            account_sid: require("TWILIO_ACCOUNT_SID")?,
            auth_token: SecretString::from(require("TWILIO_AUTH_TOKEN")?),
            sender_number: require("TWILIO_NUMBER")?,
        };

        let timeout_secs: u64 = parse_value(
            "INTERVIEW_COACH_LLM_TIMEOUT_SECS",
            &env_or("INTERVIEW_COACH_LLM_TIMEOUT_SECS", "30"),
        )?;
        let llm = LlmConfig {
            api_key: SecretString::from(require("GEMINI_API_KEY")?),
            model: env_or("GEMINI_MODEL", "gemini-2.0-flash"),
            temperature: parse_value(
                "GEMINI_TEMPERATURE",
                &env_or("GEMINI_TEMPERATURE", "0.8"),
            )?,
            max_output_tokens: parse_value(
                "GEMINI_MAX_OUTPUT_TOKENS",
                &env_or("GEMINI_MAX_OUTPUT_TOKENS", "350"),
            )?,
            timeout: Duration::from_secs(timeout_secs),
        };

        Ok(Self {
            bind_addr,
            db_path,
            twilio,
            llm,
            prompts: PromptConfig::default(),
        })
    }
}

fn require(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
