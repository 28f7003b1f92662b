//! Shared helper functions used across CLI subcommands.
//!
//! Includes tracing initialization, dispatcher wiring and response
//! rendering.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parley_intent::{ContextualClassifier, IntentClassifier, KeywordClassifier, LlmClassifier, TieredClassifier};
use parley_kernel::{Dispatcher, Response, default_registry};
use parley_llm::{LlmClient, LlmClientConfig, LlmProvider};
use parley_store::{Database, SqliteSessionStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::LogFormat;
use crate::config::{AppConfig, LlmSettings};

/// Line printed when a turn fails outright.
pub const FALLBACK_REPLY: &str = "Lo siento, algo salió mal. Inténtalo de nuevo.";

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Open the store and assemble a [`Dispatcher`] from `config`.
///
/// The LLM tier is used only when an API key is configured and `offline`
/// is not set; otherwise both classifier seams get the keyword classifier.
pub async fn build_dispatcher(config: &AppConfig, offline: bool) -> Result<Dispatcher> {
    if let Some(parent) = config.db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("failed to create data directory")?;
    }

    let db = Database::open_and_migrate(config.db_path.clone())
        .await
        .context("failed to open database")?;
    let store = Arc::new(SqliteSessionStore::open(db, config.dispatch.context_ttl()).await);
    info!(path = %config.db_path.display(), "store initialized");

    let registry = Arc::new(
        default_registry(config.dispatch.enricher_timeout())
            .context("failed to build enricher registry")?,
    );

    let keyword =
        Arc::new(KeywordClassifier::new().context("failed to build keyword classifier")?);
    let tiered = llm_classifier(&config.llm, offline)?.map(|llm| {
        Arc::new(
            TieredClassifier::new(Arc::clone(&keyword), llm)
                .with_threshold(config.dispatch.tiered_threshold),
        )
    });

    let classifier: Arc<dyn IntentClassifier> = match &tiered {
        Some(t) => t.clone(),
        None => keyword.clone(),
    };
    let contextual: Arc<dyn ContextualClassifier> = match tiered {
        Some(t) => t,
        None => keyword,
    };

    Dispatcher::new(store, registry, classifier, contextual, config.dispatch.clone())
        .context("failed to build dispatcher")
}

fn llm_classifier(settings: &LlmSettings, offline: bool) -> Result<Option<Arc<LlmClassifier>>> {
    if offline {
        info!("offline mode, keyword classifier only");
        return Ok(None);
    }
    let Some(api_key) = settings.api_key.clone() else {
        info!("no LLM API key configured, keyword classifier only");
        return Ok(None);
    };

    let provider: LlmProvider = settings.provider.parse().context("invalid LLM provider")?;
    let model = settings.model_or_default().to_owned();
    let mut llm_config = match provider {
        LlmProvider::Anthropic => LlmClientConfig::anthropic(api_key, model.clone()),
        LlmProvider::OpenAI => LlmClientConfig::openai(api_key, model.clone()),
    }
    .with_timeout(Duration::from_secs(settings.request_timeout_secs));
    if let Some(url) = &settings.base_url {
        llm_config = llm_config.with_base_url(url.clone());
    }

    let client = LlmClient::new(llm_config).context("failed to create LLM client")?;
    info!(provider = provider.as_str(), model = %model, "LLM classifier ready");
    Ok(Some(Arc::new(
        LlmClassifier::new(Arc::new(client)).with_model(model),
    )))
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Plain-text rendering of a response for the terminal.
pub fn render_response(response: &Response) -> String {
    let mut out = match &response.message {
        Some(message) => message.clone(),
        None => format!("[{}] ({:.2})", response.intent, response.confidence),
    };

    if response.message.is_none()
        && let Some(enrichment) = &response.enrichment
    {
        let entities = enrichment.to_entities_map();
        if !entities.is_empty()
            && let Ok(pretty) = serde_json::to_string_pretty(&entities)
        {
            out.push('\n');
            out.push_str(&pretty);
        }
    }

    if let Some(rows) = &response.suggested_choices {
        for row in rows {
            let line = row
                .iter()
                .map(|c| format!("[{}]", c.label))
                .collect::<Vec<_>>()
                .join(" ");
            out.push('\n');
            out.push_str(&line);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use parley_intent::UserIntent;
    use parley_kernel::EnrichmentResult;
    use parley_store::Choice;

    use super::*;

    #[test]
    fn message_with_choices() {
        let response = Response::new(UserIntent::ProjectCreate, 0.9)
            .with_message("Proyecto: X")
            .with_choices(vec![vec![Choice::new("Trabajo", "project_type_trabajo")]]);
        assert_eq!(render_response(&response), "Proyecto: X\n[Trabajo]");
    }

    #[test]
    fn silent_intent_shows_enrichment() {
        let mut response = Response::new(UserIntent::DebtQuery, 0.8);
        response.enrichment = Some(EnrichmentResult {
            financial_analysis: Some(serde_json::json!({"message": "No hay deudas registradas"})),
            ..EnrichmentResult::named("FinanceEnricher")
        });
        let text = render_response(&response);
        assert!(text.starts_with("[debt_query] (0.80)"));
        assert!(text.contains("No hay deudas registradas"));
    }

    #[test]
    fn offline_skips_llm() {
        let settings = LlmSettings {
            api_key: Some("k".into()),
            ..LlmSettings::default()
        };
        assert!(llm_classifier(&settings, true).unwrap().is_none());
        assert!(llm_classifier(&LlmSettings::default(), false).unwrap().is_none());
    }

    #[tokio::test]
    async fn builds_offline_dispatcher() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            db_path: dir.path().join("nested").join("parley.db"),
            ..AppConfig::default()
        };
        let dispatcher = build_dispatcher(&config, true).await.unwrap();
        let response = dispatcher.process("ana", "hola").await.unwrap();
        assert_eq!(response.intent, UserIntent::Greeting);
        assert_eq!(dispatcher.registry().stats().total_enrichers, 5);
    }
}
