//! Process-wide configuration
//!
//! Built once at start-up and handed to each stage's constructor.

use crate::chat::ChatConfig;
use crate::ocr::OcrConfig;
use crate::rxnorm::RxNormConfig;
use crate::validate::FallbackConfig;
use anyhow::{Context, Result};
use core_pipeline::{ConditionerConfig, IntakePolicy};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    pub intake: IntakePolicy,
    pub conditioner: ConditionerConfig,
    pub ocr: OcrConfig,
    pub chat: ChatConfig,
    pub rxnorm: RxNormConfig,
    pub fallback: FallbackConfig,
}

impl BridgeConfig {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(endpoint) = var("AZURE_ENDPOINT") {
            config.ocr.endpoint = endpoint;
        }
        if let Some(key) = var("AZURE_SUBSCRIPTION_KEY") {
            config.ocr.subscription_key = key;
        }
        if let Some(url) = var("OPENROUTER_BASE_URL") {
            config.chat.base_url = url;
        }
        if let Some(key) = var("OPENROUTER_API_KEY") {
            config.chat.api_key = key;
        }
        if let Some(model) = var("OPENROUTER_MODEL") {
            config.chat.model = model;
        }
        if let Some(url) = var("RXNORM_BASE_URL") {
            config.rxnorm.base_url = url;
        }
        if let Some(size) = parsed(&var, "MAX_FILE_SIZE")? {
            config.intake.max_file_size = size;
        }
        if let Some(dir) = var("UPLOAD_DIR") {
            config.intake.staging_dir = Some(PathBuf::from(dir));
        }
        if let Some(enabled) = parsed(&var, "FALLBACK_ENABLED")? {
            config.fallback.enabled = enabled;
        }
        if let Some(url) = var("FALLBACK_SEARCH_URL") {
            config.fallback.search_url = url;
        }
        if let Some(length) = parsed(&var, "FALLBACK_MIN_CONTENT_LENGTH")? {
            config.fallback.min_content_length = length;
        }

        Ok(config)
    }
}

fn parsed<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|v| v.trim().parse::<T>())
        .transpose()
        .with_context(|| format!("Invalid value for {}", key))
}
