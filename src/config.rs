//! Configuration types for a collection run.
//!
//! Two structs split the knobs by owner:
//!
//! * [`RunConfig`] — what the [`crate::collect::Collector`] needs: where the
//!   images are, where the CSV lives, how long to wait between calls, whether
//!   to start over, and which fields make up a row. Immutable for the whole
//!   run.
//! * [`VisionConfig`] — how the production [`crate::pipeline::extract::VisionExtractor`]
//!   talks to the VLM: provider, model, sampling, retries, timeouts.
//!
//! Both are built through builders that validate on `build()`.

use crate::error::CollectError;
use crate::progress::ProgressCallback;
use crate::pipeline::store::IDENTIFIER_COLUMN;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Where the images of a run come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSource {
    /// Every image file directly inside this directory.
    Directory(PathBuf),
    /// Exactly this one file, whatever its extension.
    File(PathBuf),
}

impl ImageSource {
    pub fn path(&self) -> &Path {
        match self {
            ImageSource::Directory(p) | ImageSource::File(p) => p,
        }
    }
}

impl Default for ImageSource {
    fn default() -> Self {
        ImageSource::Directory(PathBuf::from("images"))
    }
}

/// Configuration for one collection run.
///
/// # Example
/// ```rust
/// use edgequake_img2csv::{ImageSource, RunConfig};
/// use std::time::Duration;
///
/// let config = RunConfig::builder()
///     .source(ImageSource::Directory("scans".into()))
///     .store_path("scans.csv")
///     .delay(Duration::from_millis(500))
///     .fields(["title", "price"])
///     .build()
///     .unwrap();
/// assert_eq!(config.header(), vec!["identifier", "title", "price"]);
/// ```
#[derive(Clone)]
pub struct RunConfig {
    /// CSV file the results accumulate in. Default: `results.csv`.
    pub store_path: PathBuf,

    /// Directory or single image to process. Default: the `images` directory.
    pub source: ImageSource,

    /// Minimum pause between the end of one extraction call and the start of
    /// the next. Default: 1 s.
    ///
    /// Shared VLM quotas are per-minute; a fixed pause keeps a long folder
    /// run from tripping them. Images that are skipped never pay the delay.
    pub delay: Duration,

    /// Discard every prior row at run start and rebuild the store from this
    /// run's enumeration. Default: false.
    pub overwrite: bool,

    /// Extraction fields, in column order after the identifier. Default: `["text"]`.
    pub fields: Vec<String>,

    /// Optional per-image progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("results.csv"),
            source: ImageSource::default(),
            delay: Duration::from_secs(1),
            overwrite: false,
            fields: vec!["text".to_string()],
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("store_path", &self.store_path)
            .field("source", &self.source)
            .field("delay", &self.delay)
            .field("overwrite", &self.overwrite)
            .field("fields", &self.fields)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn CollectProgressCallback>"),
            )
            .finish()
    }
}

impl RunConfig {
    /// Create a new builder for `RunConfig`.
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder {
            config: Self::default(),
            delay_secs: None,
        }
    }

    /// The CSV header row: the identifier column followed by the fields.
    pub fn header(&self) -> Vec<String> {
        std::iter::once(IDENTIFIER_COLUMN.to_string())
            .chain(self.fields.iter().cloned())
            .collect()
    }
}

/// Builder for [`RunConfig`].
pub struct RunConfigBuilder {
    config: RunConfig,
    delay_secs: Option<f64>,
}

impl fmt::Debug for RunConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfigBuilder")
            .field("config", &self.config)
            .field("delay_secs", &self.delay_secs)
            .finish()
    }
}

impl RunConfigBuilder {
    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store_path = path.into();
        self
    }

    pub fn source(mut self, source: ImageSource) -> Self {
        self.config.source = source;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.config.delay = delay;
        self.delay_secs = None;
        self
    }

    /// Delay in (fractional) seconds, as typed on the command line.
    /// Validated by [`build`](Self::build).
    pub fn delay_secs(mut self, secs: f64) -> Self {
        self.delay_secs = Some(secs);
        self
    }

    pub fn overwrite(mut self, v: bool) -> Self {
        self.config.overwrite = v;
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<RunConfig, CollectError> {
        if let Some(secs) = self.delay_secs {
            self.config.delay = Duration::try_from_secs_f64(secs).map_err(|_| {
                CollectError::InvalidConfig(format!(
                    "delay must be a finite number of seconds ≥ 0, got {secs}"
                ))
            })?;
        }

        let c = &mut self.config;
        c.fields = c.fields.iter().map(|f| f.trim().to_string()).collect();
        if c.fields.is_empty() {
            return Err(CollectError::InvalidConfig(
                "at least one extraction field is required".into(),
            ));
        }
        let mut seen = HashSet::new();
        for field in &c.fields {
            if field.is_empty() {
                return Err(CollectError::InvalidConfig(
                    "extraction field names must not be empty".into(),
                ));
            }
            if field == IDENTIFIER_COLUMN {
                return Err(CollectError::InvalidConfig(format!(
                    "'{IDENTIFIER_COLUMN}' is reserved for the image column"
                )));
            }
            if !seen.insert(field.as_str()) {
                return Err(CollectError::InvalidConfig(format!(
                    "duplicate extraction field '{field}'"
                )));
            }
        }
        Ok(self.config)
    }
}

/// Configuration for the VLM-backed extraction client.
///
/// # Example
/// ```rust
/// use edgequake_img2csv::VisionConfig;
///
/// let config = VisionConfig::builder()
///     .model("gpt-4.1-nano")
///     .max_retries(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_retries, 2);
/// ```
#[derive(Clone)]
pub struct VisionConfig {
    /// LLM model identifier, e.g. "gpt-4.1-nano". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per image. Default: 1024.
    ///
    /// The answer is a single flat JSON object; long free-text fields are the
    /// only thing that gets near this.
    pub max_tokens: usize,

    /// Retry attempts on a failed API call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Custom system prompt. If None, one is generated from the field list.
    pub system_prompt: Option<String>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 1024,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            system_prompt: None,
        }
    }
}

impl fmt::Debug for VisionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .finish()
    }
}

impl VisionConfig {
    /// Create a new builder for `VisionConfig`.
    pub fn builder() -> VisionConfigBuilder {
        VisionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`VisionConfig`].
#[derive(Debug)]
pub struct VisionConfigBuilder {
    config: VisionConfig,
}

impl VisionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<VisionConfig, CollectError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(CollectError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(CollectError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
