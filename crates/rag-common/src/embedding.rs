/// Embedding gateways.
///
/// `EmbeddingGateway` turns one text into one fixed-length vector. Two backends:
/// - `FastEmbedder`: local fastembed model (nomic-embed-text-v1.5, 768 dims). `TextEmbedding`
///   is synchronous and CPU-bound, so every call goes through `tokio::task::spawn_blocking`.
/// - `OpenAiEmbedder`: an OpenAI-compatible `/embeddings` endpoint (Ollama serves
///   `nomic-embed-text` this way).
///
/// Every returned vector is checked against the gateway's declared dimension.
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CommonError;
use crate::openai::{EmbeddingRequest, OpenAiClient};

/// nomic-embed-text (both the fastembed and the Ollama flavour) produces 768-dim vectors.
pub const NOMIC_EMBED_DIM: usize = 768;

/// What the text being embedded is used for. Models with task prefixes embed documents
/// and queries differently; others ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedPurpose {
    Document,
    Query,
}

#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    async fn embed(&self, text: &str, purpose: EmbedPurpose) -> Result<Vec<f32>, CommonError>;

    /// Dimensionality of every vector this gateway returns.
    fn dimensions(&self) -> usize;
}

/// Reject vectors that are empty, of the wrong length, or carry NaN/inf.
pub fn check_embedding(vector: Vec<f32>, expected: usize) -> Result<Vec<f32>, CommonError> {
    if vector.len() != expected {
        return Err(CommonError::Model(format!(
            "embedding has dimension {}, expected {expected}",
            vector.len()
        )));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(CommonError::Model(
            "embedding contains non-finite values".to_string(),
        ));
    }
    Ok(vector)
}

/// Wraps fastembed's `TextEmbedding` model.
pub struct FastEmbedder {
    model: Arc<fastembed::TextEmbedding>,
}

impl FastEmbedder {
    /// Initialize nomic-embed-text-v1.5.
    ///
    /// This downloads the model on first run (~300MB) inside a blocking task.
    pub async fn new() -> Result<Self, CommonError> {
        let model = tokio::task::spawn_blocking(|| {
            let options = fastembed::InitOptions::new(fastembed::EmbeddingModel::NomicEmbedTextV15)
                .with_show_download_progress(true);
            fastembed::TextEmbedding::try_new(options)
        })
        .await
        .map_err(|e| CommonError::Model(format!("spawn_blocking join error: {e}")))?
        .map_err(|e| CommonError::UpstreamUnavailable(format!("model initialization failed: {e}")))?;

        Ok(Self {
            model: Arc::new(model),
        })
    }
}

#[async_trait]
impl EmbeddingGateway for FastEmbedder {
    async fn embed(&self, text: &str, purpose: EmbedPurpose) -> Result<Vec<f32>, CommonError> {
        let prefixed = match purpose {
            EmbedPurpose::Document => vec![format!("search_document: {text}")],
            EmbedPurpose::Query => vec![format!("search_query: {text}")],
        };
        let model = Arc::clone(&self.model);
        let mut results = tokio::task::spawn_blocking(move || model.embed(prefixed, None))
            .await
            .map_err(|e| CommonError::Model(format!("spawn_blocking join error: {e}")))?
            .map_err(|e| CommonError::Model(format!("embedding failed: {e}")))?;
        let vector = results
            .pop()
            .ok_or_else(|| CommonError::Model("empty embedding result".to_string()))?;
        check_embedding(vector, self.dimensions())
    }

    fn dimensions(&self) -> usize {
        NOMIC_EMBED_DIM
    }
}

/// Embeds through an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: Arc<OpenAiClient>,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(client: Arc<OpenAiClient>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            client,
            model: model.into(),
            dimensions,
        }
    }
}

#[async_trait]
impl EmbeddingGateway for OpenAiEmbedder {
    async fn embed(&self, text: &str, _purpose: EmbedPurpose) -> Result<Vec<f32>, CommonError> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: vec![text.to_string()],
        };
        let response = self.client.embeddings(&request).await?;
        let vector = response
            .data
            .into_iter()
            .min_by_key(|d| d.index)
            .map(|d| d.embedding)
            .ok_or_else(|| CommonError::Model("embedding response has no data".to_string()))?;
        check_embedding(vector, self.dimensions)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
