//! Shared helper functions used across CLI subcommands.
//!
//! Includes tracing initialization, LLM provider resolution, store setup and
//! environment variable utilities.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tabpilot_agent::{InferenceClient, LlmClient, LlmClientConfig, LlmInferenceClient};
use tabpilot_store::{Database, KvStore, MemoryKvStore, SqliteKvStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{LlmSettings, StoreSettings};

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
///
/// With `json` set, events are written as one JSON object per line.
pub fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

/// Whether `TABPILOT_LOG_FORMAT` asks for JSON logs.
pub fn json_logs_requested(lookup: impl Fn(&str) -> Option<String>) -> bool {
    lookup("TABPILOT_LOG_FORMAT").is_some_and(|format| format.eq_ignore_ascii_case("json"))
}

// ---------------------------------------------------------------------------
// LLM provider resolution
// ---------------------------------------------------------------------------

const DEFAULT_MODEL_ANTHROPIC: &str = "claude-sonnet-4-20250514";
const DEFAULT_MODEL_OPENAI: &str = "gpt-4o";

/// Resolve which LLM provider, API key and model to use.
///
/// Resolution order:
///
/// 1. If a provider is configured (`[llm] provider` or `TABPILOT_PROVIDER`),
///    use it.
/// 2. Otherwise auto-detect from credentials:
///    `ANTHROPIC_API_KEY` -> `OPENAI_API_KEY`.
///
/// Returns `None` when inference is disabled or no key is available.
pub fn resolve_llm_config(
    settings: &LlmSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<LlmClientConfig> {
    if !settings.enabled {
        return None;
    }

    let try_anthropic = || -> Option<LlmClientConfig> {
        let key = lookup("ANTHROPIC_API_KEY")?;
        let model = settings
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL_ANTHROPIC.to_owned());
        let mut cfg = LlmClientConfig::anthropic(key, model);
        if let Some(url) = &settings.base_url {
            cfg = cfg.with_base_url(url.clone());
        }
        Some(cfg)
    };

    let try_openai = || -> Option<LlmClientConfig> {
        let key = lookup("OPENAI_API_KEY")?;
        let model = settings
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL_OPENAI.to_owned());
        Some(match &settings.base_url {
            Some(url) => LlmClientConfig::openai_compatible(key, model, url.clone()),
            None => LlmClientConfig::openai(key, model),
        })
    };

    match settings.provider.as_deref() {
        Some("anthropic") => try_anthropic(),
        Some("openai" | "openai_compatible") => try_openai(),
        Some(other) => {
            warn!(provider = other, "unknown LLM provider, falling back to auto-detection");
            try_anthropic().or_else(try_openai)
        }
        None => try_anthropic().or_else(try_openai),
    }
}

/// Build the inference client, or `None` to parse with patterns only.
pub fn build_inference(settings: &LlmSettings) -> Result<Option<Arc<dyn InferenceClient>>> {
    let Some(config) = resolve_llm_config(settings, env_non_empty) else {
        info!("no LLM credentials configured, pattern parsing only");
        return Ok(None);
    };

    let provider = config.provider.as_str();
    let client = LlmClient::new(config).context("failed to build LLM client")?;
    info!(provider, model = client.default_model(), "inference client ready");

    let mut inference = LlmInferenceClient::new(client)
        .with_temperature(settings.temperature)
        .with_max_tokens(settings.max_tokens);
    if let Some(model) = &settings.model {
        inference = inference.with_model(model.clone());
    }
    Ok(Some(Arc::new(inference)))
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Open the configured key/value store, creating its directory if needed.
pub async fn open_store(settings: &StoreSettings) -> Result<Arc<dyn KvStore>> {
    if settings.in_memory {
        info!("using in-memory store");
        return Ok(Arc::new(MemoryKvStore::new()));
    }

    if let Some(parent) = settings.path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let db = Database::open_and_migrate(settings.path.clone())
        .await
        .context("failed to open database")?;
    info!(path = %settings.path.display(), "store initialized");
    Ok(Arc::new(SqliteKvStore::new(db)))
}

// ---------------------------------------------------------------------------
// Environment and output
// ---------------------------------------------------------------------------

/// Read an environment variable, treating empty values as unset.
pub fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json(value: &impl Serialize) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabpilot_agent::LlmProvider;

    fn keys(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    #[test]
    fn anthropic_is_preferred_when_both_keys_exist() {
        let cfg = resolve_llm_config(
            &LlmSettings::default(),
            keys(&[("ANTHROPIC_API_KEY", "a"), ("OPENAI_API_KEY", "o")]),
        )
        .unwrap();
        assert_eq!(cfg.provider, LlmProvider::Anthropic);
        assert_eq!(cfg.default_model, DEFAULT_MODEL_ANTHROPIC);
    }

    #[test]
    fn explicit_provider_and_base_url() {
        let settings = LlmSettings {
            provider: Some("openai_compatible".into()),
            model: Some("local-model".into()),
            base_url: Some("http://localhost:11434/v1".into()),
            ..LlmSettings::default()
        };
        let cfg = resolve_llm_config(
            &settings,
            keys(&[("ANTHROPIC_API_KEY", "a"), ("OPENAI_API_KEY", "o")]),
        )
        .unwrap();
        assert_eq!(cfg.provider, LlmProvider::OpenAI);
        assert_eq!(cfg.base_url, "http://localhost:11434/v1");
        assert_eq!(cfg.default_model, "local-model");
    }

    #[test]
    fn disabled_or_keyless_means_no_inference() {
        let disabled = LlmSettings {
            enabled: false,
            ..LlmSettings::default()
        };
        assert!(resolve_llm_config(&disabled, keys(&[("OPENAI_API_KEY", "o")])).is_none());
        assert!(resolve_llm_config(&LlmSettings::default(), keys(&[])).is_none());
    }

    #[test]
    fn json_log_format_is_case_insensitive() {
        assert!(json_logs_requested(keys(&[("TABPILOT_LOG_FORMAT", "JSON")])));
        assert!(!json_logs_requested(keys(&[("TABPILOT_LOG_FORMAT", "compact")])));
        assert!(!json_logs_requested(keys(&[])));
    }

    #[tokio::test]
    async fn in_memory_store_needs_no_disk() {
        let settings = StoreSettings {
            in_memory: true,
            ..StoreSettings::default()
        };
        let store = open_store(&settings).await.unwrap();
        assert!(store.get("missing").await.unwrap().is_none());
    }
}
