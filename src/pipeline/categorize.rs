//! Merchant categorization in batches.
//!
//! The [`CategoryAssigner`] owns the batching and fallback policy; a
//! [`CategoryBackend`] owns the actual classification call. The contract
//! between them is plain text, one `merchant|category` pair per line, so any
//! chat model (or a test double) can sit behind it.
//!
//! Whatever the backend does, every requested merchant ends up with a
//! category: failed batches, omitted merchants and unknown labels all resolve
//! to [`Category::Other`].

use crate::error::CategorizeError;
use crate::model::Category;
use crate::prompts::{categorize_request, CATEGORIZE_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Classifies one batch of merchants.
#[async_trait]
pub trait CategoryBackend: Send + Sync {
    /// Return newline-delimited `merchant|category` lines for `merchants`.
    async fn classify(
        &self,
        merchants: &[String],
        taxonomy: &[Category],
    ) -> Result<String, CategorizeError>;
}

/// Read a backend answer.
///
/// Lines that do not split into exactly two `|` fields are skipped. Merchants
/// that were not requested are dropped; a merchant named in a different case
/// maps back to the requested spelling. Labels outside `taxonomy` become
/// [`Category::Other`]. The first answer for a merchant wins.
pub fn parse_category_response(
    response: &str,
    requested: &[String],
    taxonomy: &[Category],
) -> HashMap<String, Category> {
    let mut out = HashMap::new();

    for line in response.lines() {
        let fields: Vec<&str> = line.split('|').collect();
        let [name, label] = fields.as_slice() else {
            continue;
        };
        let name = name.trim();
        let Some(merchant) = requested
            .iter()
            .find(|m| m.as_str() == name)
            .or_else(|| requested.iter().find(|m| m.eq_ignore_ascii_case(name)))
        else {
            continue;
        };

        let category = label
            .trim()
            .parse::<Category>()
            .ok()
            .filter(|c| taxonomy.contains(c))
            .unwrap_or(Category::Other);
        out.entry(merchant.clone()).or_insert(category);
    }

    out
}

/// Batches merchants through a [`CategoryBackend`].
pub struct CategoryAssigner {
    backend: Arc<dyn CategoryBackend>,
    batch_size: usize,
    taxonomy: Vec<Category>,
}

impl CategoryAssigner {
    pub fn new(backend: Arc<dyn CategoryBackend>, batch_size: usize, taxonomy: Vec<Category>) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
            taxonomy,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Categorize every merchant in `merchants`.
    ///
    /// Batches are sent in sorted order, one at a time, at most `batch_size`
    /// merchants each. The result has exactly one entry per merchant.
    pub async fn assign(&self, merchants: &BTreeSet<String>) -> HashMap<String, Category> {
        let mut result = HashMap::with_capacity(merchants.len());
        let all: Vec<String> = merchants.iter().cloned().collect();

        for (n, batch) in all.chunks(self.batch_size).enumerate() {
            match self.backend.classify(batch, &self.taxonomy).await {
                Ok(answer) => {
                    let parsed = parse_category_response(&answer, batch, &self.taxonomy);
                    debug!(
                        batch = n,
                        size = batch.len(),
                        answered = parsed.len(),
                        "Categorized batch"
                    );
                    for merchant in batch {
                        let category = parsed.get(merchant).copied().unwrap_or(Category::Other);
                        result.entry(merchant.clone()).or_insert(category);
                    }
                }
                Err(e) => {
                    match e {
                        CategorizeError::Disabled => debug!(batch = n, "Categorization disabled"),
                        _ => warn!(batch = n, size = batch.len(), "Categorization failed: {}", e),
                    }
                    for merchant in batch {
                        result.entry(merchant.clone()).or_insert(Category::Other);
                    }
                }
            }
        }

        result
    }
}

/// Classification through an LLM provider.
pub struct LlmCategoryBackend {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    timeout_secs: u64,
}

impl LlmCategoryBackend {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        temperature: f32,
        max_tokens: usize,
        timeout_secs: u64,
    ) -> Self {
        Self {
            provider,
            options: CompletionOptions {
                temperature: Some(temperature),
                max_tokens: Some(max_tokens),
                ..Default::default()
            },
            timeout_secs,
        }
    }
}

#[async_trait]
impl CategoryBackend for LlmCategoryBackend {
    async fn classify(
        &self,
        merchants: &[String],
        taxonomy: &[Category],
    ) -> Result<String, CategorizeError> {
        let messages = vec![
            ChatMessage::system(CATEGORIZE_SYSTEM_PROMPT),
            ChatMessage::user(categorize_request(merchants, taxonomy)),
        ];

        let response = tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            self.provider.chat(&messages, Some(&self.options)),
        )
        .await
        .map_err(|_| CategorizeError::Timeout {
            secs: self.timeout_secs,
        })?
        .map_err(|e| CategorizeError::Backend(e.to_string()))?;

        debug!(
            input_tokens = response.prompt_tokens,
            output_tokens = response.completion_tokens,
            "Categorization answered"
        );
        Ok(response.content)
    }
}

/// Never classifies; every merchant becomes `Other`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCategoryBackend;

#[async_trait]
impl CategoryBackend for DisabledCategoryBackend {
    async fn classify(
        &self,
        _merchants: &[String],
        _taxonomy: &[Category],
    ) -> Result<String, CategorizeError> {
        Err(CategorizeError::Disabled)
    }
}
