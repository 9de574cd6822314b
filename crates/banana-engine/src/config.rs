use std::env;
use std::time::Duration;

use crate::error::GenerateError;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_TIMEOUT_S: u64 = 120;
const MIN_TIMEOUT_S: u64 = 15;
const MAX_TIMEOUT_S: u64 = 600;

/// Backend settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

impl GeminiConfig {
    pub fn from_env() -> Result<Self, GenerateError> {
        Self::from_lookup(non_empty_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, GenerateError> {
        let api_key = lookup("GOOGLE_API_KEY")
            .or_else(|| lookup("GEMINI_API_KEY"))
            .ok_or_else(|| {
                GenerateError::InvalidInput(
                    "GOOGLE_API_KEY is not set. Get one at https://aistudio.google.com".to_string(),
                )
            })?;
        let api_base = lookup("GEMINI_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let timeout_s = lookup("BANANA_REQUEST_TIMEOUT")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_S)
            .clamp(MIN_TIMEOUT_S, MAX_TIMEOUT_S);

        Ok(Self {
            api_base,
            api_key,
            request_timeout: Duration::from_secs(timeout_s),
        })
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
