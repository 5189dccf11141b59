//! LLM provider resolution shared by the categorizer and vision OCR.

use crate::config::IngestConfig;
use crate::error::IngestError;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::sync::Arc;
use tracing::debug;

/// Model used when neither the config nor the environment names one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Resolve the LLM provider for `config`.
///
/// Order: explicit provider → `provider_name` (+ `model`) →
/// `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` → `OPENAI_API_KEY` →
/// [`ProviderFactory::from_env`].
pub fn resolve_provider(config: &IngestConfig) -> Result<Arc<dyn LLMProvider>, IngestError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    // With several provider keys present, OpenAI wins unless one was named.
    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _) =
        ProviderFactory::from_env().map_err(|e| IngestError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider auto-detected: {}\nSet OPENAI_API_KEY, pass --provider, or use --no-categorize.",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, IngestError> {
    debug!(provider = provider_name, model, "Creating LLM provider");
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        IngestError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
