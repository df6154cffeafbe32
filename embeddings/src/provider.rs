use crate::error::EmbeddingError;
use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use std::ops::AddAssign;
use tracing::debug;

/// Hard upper bound on texts per provider call.
pub const MAX_TEXTS_PER_CALL: usize = 250;

/// Hint sent with each text so the provider can specialise the vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
    SemanticSimilarity,
    Classification,
    Clustering,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::RetrievalDocument => "RETRIEVAL_DOCUMENT",
            TaskType::RetrievalQuery => "RETRIEVAL_QUERY",
            TaskType::SemanticSimilarity => "SEMANTIC_SIMILARITY",
            TaskType::Classification => "CLASSIFICATION",
            TaskType::Clustering => "CLUSTERING",
        }
    }
}

/// Tokens and billable characters consumed by one or more calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingUsage {
    pub total_tokens: u64,
    pub billable_characters: u64,
}

impl AddAssign for EmbeddingUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.total_tokens += rhs.total_tokens;
        self.billable_characters += rhs.billable_characters;
    }
}

/// Vectors in input order plus the usage they cost.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Embedded {
    pub vectors: Vec<Vec<f32>>,
    pub usage: EmbeddingUsage,
}

/// A text embedding backend.
///
/// `embed_texts` accepts at most [`EmbeddingProvider::max_batch`] texts and
/// returns exactly one vector per text, in order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name used in the model tag and usage records.
    fn provider_name(&self) -> &str;

    fn model(&self) -> &str;

    /// Length of every returned vector.
    fn dimension(&self) -> usize;

    fn max_batch(&self) -> usize {
        MAX_TEXTS_PER_CALL
    }

    /// `"{provider}/{model}"`, stored next to each vector.
    fn model_tag(&self) -> String {
        format!("{}/{}", self.provider_name(), self.model())
    }

    async fn embed_texts(&self, texts: &[String], task: TaskType) -> Result<Embedded>;

    async fn embed_one(&self, text: &str, task: TaskType) -> Result<(Vec<f32>, EmbeddingUsage)> {
        let embedded = self.embed_texts(&[text.to_string()], task).await?;
        let usage = embedded.usage;
        let vector = embedded
            .vectors
            .into_iter()
            .next()
            .ok_or(EmbeddingError::CountMismatch {
                expected: 1,
                actual: 0,
            })?;
        Ok((vector, usage))
    }
}

/// Embed any number of texts in sequential sub-batches of at most
/// `batch_size` (clamped to the provider cap). The first failing sub-batch
/// aborts the whole call.
pub async fn embed_in_batches(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    task: TaskType,
    batch_size: usize,
) -> Result<Embedded> {
    let cap = provider.max_batch().clamp(1, MAX_TEXTS_PER_CALL);
    let size = if batch_size == 0 { cap } else { batch_size.min(cap) };

    let mut out = Embedded {
        vectors: Vec::with_capacity(texts.len()),
        usage: EmbeddingUsage::default(),
    };
    for (index, chunk) in texts.chunks(size).enumerate() {
        let start = index * size;
        let end = start + chunk.len();
        let embedded = provider
            .embed_texts(chunk, task)
            .await
            .and_then(|embedded| {
                if embedded.vectors.len() == chunk.len() {
                    Ok(embedded)
                } else {
                    Err(EmbeddingError::CountMismatch {
                        expected: chunk.len(),
                        actual: embedded.vectors.len(),
                    })
                }
            })
            .map_err(|source| EmbeddingError::BatchFailed {
                start,
                end,
                source: Box::new(source),
            })?;
        debug!(start, end, tokens = embedded.usage.total_tokens, "Embedded sub-batch");
        out.vectors.extend(embedded.vectors);
        out.usage += embedded.usage;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct Recording {
        calls: Mutex<Vec<usize>>,
        fail_on_call: Option<usize>,
    }

    #[async_trait]
    impl EmbeddingProvider for Recording {
        fn provider_name(&self) -> &str {
            "test"
        }

        fn model(&self) -> &str {
            "fixed"
        }

        fn dimension(&self) -> usize {
            1
        }

        fn max_batch(&self) -> usize {
            4
        }

        async fn embed_texts(&self, texts: &[String], _task: TaskType) -> Result<Embedded> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(texts.len());
                calls.len() - 1
            };
            if self.fail_on_call == Some(call) {
                return Err(EmbeddingError::Api {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(Embedded {
                vectors: texts.iter().map(|t| vec![t.len() as f32]).collect(),
                usage: EmbeddingUsage {
                    total_tokens: texts.len() as u64,
                    billable_characters: 0,
                },
            })
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| "x".repeat(i + 1)).collect()
    }

    #[tokio::test]
    async fn test_batches_respect_provider_cap_and_keep_order() {
        let provider = Recording {
            calls: Mutex::new(Vec::new()),
            fail_on_call: None,
        };
        let out = embed_in_batches(&provider, &texts(10), TaskType::RetrievalDocument, 100)
            .await
            .unwrap();

        assert_eq!(*provider.calls.lock().unwrap(), vec![4, 4, 2]);
        let firsts: Vec<f32> = out.vectors.iter().map(|v| v[0]).collect();
        assert_eq!(firsts, (1..=10).map(|n| n as f32).collect::<Vec<_>>());
        assert_eq!(out.usage.total_tokens, 10);
    }

    #[tokio::test]
    async fn test_failed_sub_batch_names_its_range() {
        let provider = Recording {
            calls: Mutex::new(Vec::new()),
            fail_on_call: Some(1),
        };
        let err = embed_in_batches(&provider, &texts(7), TaskType::RetrievalDocument, 3)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "batch 3-6 failed: embedding API error: 500 - boom");
    }

    #[test]
    fn test_model_tag_joins_provider_and_model() {
        let provider = Recording {
            calls: Mutex::new(Vec::new()),
            fail_on_call: None,
        };
        assert_eq!(provider.model_tag(), "test/fixed");
    }
}
