//! The extraction-client seam and its VLM-backed implementation.
//!
//! The collector only knows [`ExtractionClient`]: one image in, named fields
//! out, or an [`ExtractionError`]. [`VisionExtractor`] is the production
//! client; tests plug in scripted clients instead.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 and timeouts are transient. Each failed attempt waits
//! `retry_backoff_ms * 2^(attempt-1)` before the next: with 500 ms base and 3
//! retries the sequence is 500 ms → 1 s → 2 s. Unreadable images and answers
//! that are not a JSON object are not retried; the same image and prompt
//! would most likely produce the same result.

use crate::config::VisionConfig;
use crate::error::{CollectError, ExtractionError};
use crate::pipeline::encode;
use crate::pipeline::enumerate::ImageRecord;
use crate::prompts::{system_prompt_for, USER_INSTRUCTION};
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Fields extracted from one image, plus usage accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub fields: BTreeMap<String, String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Attempts beyond the first that the client needed.
    pub retries: u32,
}

impl Extraction {
    pub fn new(fields: BTreeMap<String, String>) -> Self {
        Self {
            fields,
            ..Default::default()
        }
    }

    /// Build from `(name, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A synchronous-in-effect, one-shot, per-image extraction capability.
///
/// Implementations own their retry policy; the collector calls `extract`
/// exactly once per pending image and never concurrently.
pub trait ExtractionClient {
    fn extract(
        &self,
        image: &ImageRecord,
    ) -> impl Future<Output = Result<Extraction, ExtractionError>> + Send;
}

/// Extraction through a vision-capable LLM provider.
pub struct VisionExtractor {
    provider: Arc<dyn LLMProvider>,
    config: VisionConfig,
    system_prompt: String,
}

impl std::fmt::Debug for VisionExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionExtractor")
            .field("provider", &"<dyn LLMProvider>")
            .field("config", &self.config)
            .finish()
    }
}

impl VisionExtractor {
    /// Use an already-resolved provider.
    pub fn new(provider: Arc<dyn LLMProvider>, config: VisionConfig, fields: &[String]) -> Self {
        let system_prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| system_prompt_for(fields));
        Self {
            provider,
            config,
            system_prompt,
        }
    }

    /// Resolve the provider from `config` (see [`resolve_provider`]).
    pub fn from_config(config: &VisionConfig, fields: &[String]) -> Result<Self, CollectError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config.clone(), fields))
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.max_tokens),
            ..Default::default()
        }
    }
}

impl ExtractionClient for VisionExtractor {
    async fn extract(&self, image: &ImageRecord) -> Result<Extraction, ExtractionError> {
        let start = Instant::now();
        let id = image.identifier.as_str();
        let image_data = encode::load_image(image).await?;

        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(USER_INSTRUCTION, vec![image_data]),
        ];
        let options = self.options();
        let call_timeout = Duration::from_secs(self.config.api_timeout_secs);
        let max_retries = self.config.max_retries;

        let mut last_err: Option<String> = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let backoff = self
                    .config
                    .retry_backoff_ms
                    .saturating_mul(2u64.saturating_pow(attempt - 1));
                warn!("{}: retry {}/{} after {}ms", id, attempt, max_retries, backoff);
                sleep(Duration::from_millis(backoff)).await;
            }

            let response = match timeout(call_timeout, self.provider.chat(&messages, Some(&options))).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    let msg = e.to_string();
                    warn!("{}: attempt {} failed — {}", id, attempt + 1, msg);
                    last_err = Some(msg);
                    continue;
                }
                Err(_) => {
                    let msg = format!("timed out after {}s", self.config.api_timeout_secs);
                    warn!("{}: attempt {} {}", id, attempt + 1, msg);
                    last_err = Some(msg);
                    continue;
                }
            };

            debug!(
                "{}: {} input tokens, {} output tokens, {:?}",
                id,
                response.prompt_tokens,
                response.completion_tokens,
                start.elapsed()
            );

            let fields = parse_response(&response.content).map_err(|detail| {
                ExtractionError::InvalidResponse {
                    identifier: id.to_string(),
                    detail,
                }
            })?;

            return Ok(Extraction {
                fields,
                input_tokens: response.prompt_tokens as u64,
                output_tokens: response.completion_tokens as u64,
                retries: attempt,
            });
        }

        Err(ExtractionError::ApiFailed {
            identifier: id.to_string(),
            retries: max_retries,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

// ── Response parsing ─────────────────────────────────────────────────────────

static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?\s*\n(.*?)\n?```$").unwrap());

/// Turn the model's answer into named string fields.
///
/// Accepts a bare JSON object, one wrapped in a code fence, or one embedded
/// in surrounding prose. Strings are kept verbatim, `null` becomes empty,
/// numbers and booleans are printed, arrays and objects are stored as
/// compact JSON.
pub fn parse_response(raw: &str) -> Result<BTreeMap<String, String>, String> {
    let trimmed = raw.trim();
    let body = match RE_JSON_FENCE.captures(trimmed) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()).trim(),
        None => trimmed,
    };

    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(first) => {
            let embedded = body
                .find('{')
                .zip(body.rfind('}'))
                .filter(|(s, e)| s < e)
                .map(|(s, e)| &body[s..=e]);
            match embedded.map(serde_json::from_str::<Value>) {
                Some(Ok(v)) => v,
                _ => return Err(format!("not JSON ({first}): {}", snippet(body))),
            }
        }
    };

    match value {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, value_to_cell(v)))
            .collect()),
        other => Err(format!("expected a JSON object, got {}", snippet(&other.to_string()))),
    }
}

fn value_to_cell(v: Value) -> String {
    match v {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn snippet(s: &str) -> String {
    const MAX: usize = 80;
    match s.char_indices().nth(MAX) {
        Some((i, _)) => format!("{}\u{2026}", &s[..i]),
        None => s.to_string(),
    }
}

// ── Provider resolution ──────────────────────────────────────────────────────

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, CollectError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        CollectError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_provider(config: &VisionConfig) -> Result<Arc<dyn LLMProvider>, CollectError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| CollectError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
