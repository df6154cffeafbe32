use crate::error::EmbeddingError;
use crate::error::Result;
use crate::provider::Embedded;
use crate::provider::EmbeddingProvider;
use crate::provider::EmbeddingUsage;
use crate::provider::MAX_TEXTS_PER_CALL;
use crate::provider::TaskType;
use crate::text::DEFAULT_MAX_CHARS;
use crate::text::truncate_text;
use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MODEL: &str = "text-embedding-005";

/// Settings for [`VertexClient`].
#[derive(Debug, Clone)]
pub struct VertexConfig {
    /// Models collection URL; requests go to `{endpoint}/{model}:predict`.
    pub endpoint: String,
    pub model: String,
    /// Name recorded in model tags and usage, e.g. `vertex`.
    pub provider_name: String,
    pub api_key: Option<String>,
    pub dimension: usize,
    pub max_batch: usize,
    pub max_chars: usize,
    pub timeout: Duration,
}

impl Default for VertexConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            model: DEFAULT_MODEL.to_string(),
            provider_name: "vertex".to_string(),
            api_key: None,
            dimension: 768,
            max_batch: MAX_TEXTS_PER_CALL,
            max_chars: DEFAULT_MAX_CHARS,
            timeout: Duration::from_secs(60),
        }
    }
}

/// HTTP client for a Vertex-style `predict` embedding endpoint.
#[derive(Clone)]
pub struct VertexClient {
    http: reqwest::Client,
    config: VertexConfig,
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    instances: Vec<Instance<'a>>,
    parameters: Parameters,
}

#[derive(Debug, Serialize)]
struct Instance<'a> {
    task_type: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Parameters {
    output_dimensionality: usize,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
    #[serde(default)]
    metadata: ResponseMetadata,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    embeddings: PredictionEmbeddings,
}

#[derive(Debug, Deserialize)]
struct PredictionEmbeddings {
    values: Vec<f32>,
    #[serde(default)]
    statistics: Statistics,
}

#[derive(Debug, Default, Deserialize)]
struct Statistics {
    #[serde(default)]
    token_count: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseMetadata {
    #[serde(default)]
    billable_character_count: u64,
}

impl VertexClient {
    pub fn new(config: VertexConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "embedding endpoint is required".to_string(),
            ));
        }
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &VertexConfig {
        &self.config
    }

    fn predict_url(&self) -> String {
        format!(
            "{}/{}:predict",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl EmbeddingProvider for VertexClient {
    fn provider_name(&self) -> &str {
        &self.config.provider_name
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn max_batch(&self) -> usize {
        self.config.max_batch.clamp(1, MAX_TEXTS_PER_CALL)
    }

    async fn embed_texts(&self, texts: &[String], task: TaskType) -> Result<Embedded> {
        if texts.is_empty() {
            return Ok(Embedded::default());
        }
        if texts.len() > self.max_batch() {
            return Err(EmbeddingError::TooManyTexts {
                max: self.max_batch(),
                actual: texts.len(),
            });
        }

        let body = PredictRequest {
            instances: texts
                .iter()
                .map(|text| Instance {
                    task_type: task.as_str(),
                    content: truncate_text(text, self.config.max_chars),
                })
                .collect(),
            parameters: Parameters {
                output_dimensionality: self.config.dimension,
            },
        };

        let mut request = self.http.post(self.predict_url()).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: PredictResponse = resp.json().await?;
        if parsed.predictions.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: parsed.predictions.len(),
            });
        }

        let mut usage = EmbeddingUsage {
            total_tokens: 0,
            billable_characters: parsed.metadata.billable_character_count,
        };
        let vectors = parsed
            .predictions
            .into_iter()
            .map(|prediction| {
                usage.total_tokens += prediction.embeddings.statistics.token_count;
                prediction.embeddings.values
            })
            .collect();
        debug!(
            count = texts.len(),
            tokens = usage.total_tokens,
            model = %self.config.model,
            "Generated embeddings"
        );
        Ok(Embedded { vectors, usage })
    }
}
