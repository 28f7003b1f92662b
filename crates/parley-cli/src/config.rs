//! Application configuration.
//!
//! Reads `[dispatch]`, `[store]` and `[llm]` from the TOML file named by
//! `--config` (default `config/default.toml`). Every key is optional: a
//! missing file, section or key falls back to its default. `PARLEY_*`
//! environment variables override the file.

use std::path::{Path, PathBuf};

use parley_kernel::DispatchConfig;
use tracing::{debug, warn};

const DEFAULT_DB_PATH: &str = "data/parley.db";
const DEFAULT_PROVIDER: &str = "anthropic";
const DEFAULT_MODEL_ANTHROPIC: &str = "claude-sonnet-4-20250514";
const DEFAULT_MODEL_OPENAI: &str = "gpt-4o";
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Settings for the language-model classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmSettings {
    pub provider: String,
    /// `None` disables the LLM tier.
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl LlmSettings {
    /// The configured model, or the provider's default.
    pub fn model_or_default(&self) -> &str {
        match (&self.model, self.provider.as_str()) {
            (Some(model), _) => model.as_str(),
            (None, "openai" | "openai_compatible" | "ollama") => DEFAULT_MODEL_OPENAI,
            (None, _) => DEFAULT_MODEL_ANTHROPIC,
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_owned(),
            api_key: None,
            model: None,
            base_url: None,
            request_timeout_secs: DEFAULT_LLM_TIMEOUT_SECS,
        }
    }
}

/// Everything the binary needs to build a dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub dispatch: DispatchConfig,
    pub db_path: PathBuf,
    pub llm: LlmSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            llm: LlmSettings::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load `path`, then apply environment overrides.
pub fn load_config(path: &Path) -> AppConfig {
    let mut config = match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "config file not read, using defaults");
            AppConfig::default()
        }
    };
    config.apply_env(env_non_empty);
    config
}

/// Parse a TOML document into an [`AppConfig`]. Invalid TOML yields the
/// defaults.
pub fn parse_config(content: &str) -> AppConfig {
    let defaults = AppConfig::default();

    let table: toml::Table = match content.parse() {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "invalid config file, using defaults");
            return defaults;
        }
    };

    let empty = toml::Table::new();
    let dispatch = section(&table, "dispatch").unwrap_or(&empty);
    let store = section(&table, "store").unwrap_or(&empty);
    let llm = section(&table, "llm").unwrap_or(&empty);
    let d = &defaults.dispatch;

    AppConfig {
        dispatch: DispatchConfig {
            context_ttl_minutes: dispatch
                .get("context_ttl_minutes")
                .and_then(|v| v.as_integer())
                .map(|v| v.max(1))
                .unwrap_or(d.context_ttl_minutes),
            classifier_timeout_ms: dispatch
                .get("classifier_timeout_ms")
                .and_then(|v| v.as_integer())
                .map(|v| v.max(1) as u64)
                .unwrap_or(d.classifier_timeout_ms),
            enricher_timeout_ms: dispatch
                .get("enricher_timeout_ms")
                .and_then(|v| v.as_integer())
                .map(|v| v.max(1) as u64)
                .unwrap_or(d.enricher_timeout_ms),
            tiered_threshold: dispatch
                .get("tiered_threshold")
                .and_then(|v| v.as_float())
                .map(|v| v.clamp(0.0, 1.0))
                .unwrap_or(d.tiered_threshold),
            history_reply_chars: dispatch
                .get("history_reply_chars")
                .and_then(|v| v.as_integer())
                .map(|v| v.max(1) as usize)
                .unwrap_or(d.history_reply_chars),
        },
        db_path: store
            .get("db_path")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path),
        llm: LlmSettings {
            provider: llm
                .get("provider")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
                .unwrap_or(defaults.llm.provider),
            api_key: None,
            model: llm.get("model").and_then(|v| v.as_str()).map(str::to_owned),
            base_url: llm
                .get("base_url")
                .and_then(|v| v.as_str())
                .map(str::to_owned),
            request_timeout_secs: llm
                .get("request_timeout_secs")
                .and_then(|v| v.as_integer())
                .map(|v| v.max(1) as u64)
                .unwrap_or(defaults.llm.request_timeout_secs),
        },
    }
}

impl AppConfig {
    /// Apply `PARLEY_*` overrides. The API key falls back to the provider's
    /// conventional variable (`ANTHROPIC_API_KEY`, `OPENAI_API_KEY`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("PARLEY_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(provider) = lookup("PARLEY_LLM_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Some(model) = lookup("PARLEY_LLM_MODEL") {
            self.llm.model = Some(model);
        }
        if let Some(url) = lookup("PARLEY_LLM_BASE_URL") {
            self.llm.base_url = Some(url);
        }

        let provider_key = match self.llm.provider.as_str() {
            "openai" | "openai_compatible" | "ollama" => "OPENAI_API_KEY",
            _ => "ANTHROPIC_API_KEY",
        };
        self.llm.api_key = lookup("PARLEY_LLM_API_KEY").or_else(|| lookup(provider_key));
    }
}

fn section<'a>(table: &'a toml::Table, name: &str) -> Option<&'a toml::Table> {
    table.get(name).and_then(toml::Value::as_table)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        assert_eq!(parse_config(""), AppConfig::default());
        assert_eq!(parse_config("not = [valid"), AppConfig::default());
    }

    #[test]
    fn keys_override_defaults_individually() {
        let config = parse_config(
            r#"
            [dispatch]
            context_ttl_minutes = 45
            tiered_threshold = 1.5

            [store]
            db_path = "/tmp/p.db"

            [llm]
            provider = "openai"
            "#,
        );
        assert_eq!(config.dispatch.context_ttl_minutes, 45);
        assert_eq!(config.dispatch.tiered_threshold, 1.0);
        assert_eq!(config.dispatch.classifier_timeout_ms, 10_000);
        assert_eq!(config.db_path, PathBuf::from("/tmp/p.db"));
        assert_eq!(config.llm.model_or_default(), DEFAULT_MODEL_OPENAI);
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PARLEY_DB_PATH", "env.db"),
            ("PARLEY_LLM_MODEL", "m"),
            ("ANTHROPIC_API_KEY", "k-anthropic"),
        ]);
        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.db_path, PathBuf::from("env.db"));
        assert_eq!(config.llm.model_or_default(), "m");
        assert_eq!(config.llm.api_key.as_deref(), Some("k-anthropic"));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml"));
        assert_eq!(config.dispatch, DispatchConfig::default());
    }
}
