use std::env;
use std::time::Duration;

use fitroom_contracts::policy::{CompressionPolicy, FallbackPolicy, MAX_ORIGINAL_BYTES};

use crate::errors::ConfigError;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const MIN_TIMEOUT_SECS: u64 = 5;
const MAX_TIMEOUT_SECS: u64 = 600;
const API_KEY_ENV: &str = "GEMINI_API_KEY";
const GOOGLE_KEY_ENV: &str = "GOOGLE_API_KEY";
const TIMEOUT_ENV: &str = "FITROOM_REQUEST_TIMEOUT_SECS";

#[derive(Clone)]
pub struct FitroomConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub image_model: String,
    pub request_timeout: Duration,
    pub compression: CompressionPolicy,
    pub fallback: FallbackPolicy,
    pub max_original_bytes: u64,
}

impl Default for FitroomConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            compression: CompressionPolicy::default(),
            fallback: FallbackPolicy::default(),
            max_original_bytes: MAX_ORIGINAL_BYTES,
        }
    }
}

impl FitroomConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(non_empty_env)
    }

    /// Builds the config from `lookup`, which returns trimmed, non-empty
    /// values only.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.api_key = lookup(API_KEY_ENV).or_else(|| lookup(GOOGLE_KEY_ENV));
        if let Some(base) = lookup("GEMINI_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup("FITROOM_IMAGE_MODEL") {
            config.image_model = model;
        }
        if let Some(raw) = lookup(TIMEOUT_ENV) {
            let Ok(secs) = raw.parse::<u64>() else {
                return Err(ConfigError::InvalidTimeout {
                    key: TIMEOUT_ENV,
                    value: raw,
                });
            };
            config.set_request_timeout_secs(secs);
        }
        Ok(config)
    }

    pub fn set_request_timeout_secs(&mut self, secs: u64) {
        let secs = secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS);
        self.request_timeout = Duration::from_secs(secs);
    }
}

impl std::fmt::Debug for FitroomConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FitroomConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("image_model", &self.image_model)
            .field("request_timeout", &self.request_timeout)
            .field("compression", &self.compression)
            .field("fallback", &self.fallback)
            .field("max_original_bytes", &self.max_original_bytes)
            .finish()
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
