//! Application configuration.
//!
//! Reads `config/default.toml` (`[parser]`, `[engine]`, `[llm]`, `[store]`)
//! and applies environment overrides.  Every field has a default, so a
//! missing file or section is not an error.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tabpilot_intent::{Language, ParserConfig};
use tabpilot_workflow::EngineConfig;
use tracing::{debug, warn};

use crate::helpers::env_non_empty;

/// Settings for the inference fallback.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Disable to parse with the pattern catalog only.
    pub enabled: bool,
    /// `anthropic`, `openai`, or `openai_compatible`.  Auto-detected from
    /// the available API keys when unset.
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: None,
            model: None,
            base_url: None,
            temperature: 0.0,
            max_tokens: 1024,
        }
    }
}

/// Where workflow state is persisted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub path: PathBuf,
    /// Keep state in memory only.
    pub in_memory: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/tabpilot.db"),
            in_memory: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub parser: ParserConfig,
    pub engine: EngineConfig,
    pub llm: LlmSettings,
    pub store: StoreSettings,
}

impl AppConfig {
    /// Load `path`, falling back to defaults when it does not exist, then
    /// apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("invalid configuration in {}", path.display()))?
        } else {
            debug!(path = %path.display(), "no configuration file, using defaults");
            Self::default()
        };
        config.apply_env(|key| env_non_empty(key));
        config
            .validate()
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Check the settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        Ok(())
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `TABPILOT_*` overrides looked up through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(provider) = lookup("TABPILOT_PROVIDER") {
            self.llm.provider = Some(provider);
        }
        if let Some(model) = lookup("TABPILOT_MODEL") {
            self.llm.model = Some(model);
        }
        if let Some(url) = lookup("TABPILOT_API_BASE_URL") {
            self.llm.base_url = Some(url);
        }
        if let Some(path) = lookup("TABPILOT_DB_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Some(code) = lookup("TABPILOT_LANGUAGE") {
            match Language::from_code(&code) {
                Some(language) => self.parser.fallback_language = language,
                None => warn!(code = %code, "ignoring unknown TABPILOT_LANGUAGE"),
            }
        }
        override_parsed(
            &lookup,
            "TABPILOT_MAX_CONCURRENT_WORKFLOWS",
            &mut self.engine.max_concurrent_workflows,
        );
        override_parsed(
            &lookup,
            "TABPILOT_STEP_TIMEOUT_MS",
            &mut self.engine.default_step_timeout_ms,
        );
        override_parsed(&lookup, "TABPILOT_MAX_RETRIES", &mut self.engine.retry.max_retries);
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => warn!(key, value = %raw, "ignoring unparsable override"),
        }
    }
}
