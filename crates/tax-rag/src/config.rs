use std::path::PathBuf;

use crate::error::AppError;
use rag_common::embedding::NOMIC_EMBED_DIM;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// Local fastembed model.
    FastEmbed,
    /// OpenAI-compatible `/embeddings` endpoint (e.g. Ollama).
    OpenAi,
}

impl std::str::FromStr for EmbeddingBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fastembed" => Ok(Self::FastEmbed),
            "openai" | "ollama" => Ok(Self::OpenAi),
            other => Err(AppError::Config(format!(
                "unknown EMBEDDING_BACKEND '{other}' (expected 'fastembed' or 'openai')"
            ))),
        }
    }
}

/// Application configuration loaded explicitly from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Filesystem path to the LanceDB data directory.
    pub lancedb_path: String,
    /// Path to the plain-text rules corpus.
    pub corpus_path: PathBuf,
    pub collection_name: String,
    pub embedding_backend: EmbeddingBackend,
    /// Model name sent to the OpenAI-compatible embedding endpoint.
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub generation_model: String,
    /// Best-hit cosine similarity below which a query is answered as "no match".
    pub min_similarity: Option<f32>,
    pub reconcile_on_start: bool,
    pub listen_addr: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `LANCEDB_PATH`: path to LanceDB data directory
    /// - `RULES_CORPUS_PATH`: path to the rules text file (created on first add if missing)
    ///
    /// Optional:
    /// - `COLLECTION_NAME` (default: "tax_rules")
    /// - `EMBEDDING_BACKEND`: "fastembed" or "openai" (default: "fastembed")
    /// - `EMBEDDING_MODEL` (default: "nomic-embed-text")
    /// - `EMBEDDING_DIM` (default: 768; fastembed always produces 768)
    /// - `GENERATION_MODEL` (default: "llama3.2")
    /// - `MIN_SIMILARITY`: float in [-1, 1]; unset disables the cutoff
    /// - `RECONCILE_ON_START` (default: false)
    /// - `LISTEN_ADDR` (default: "0.0.0.0:8000")
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let lancedb_path = lookup("LANCEDB_PATH").ok_or_else(|| {
            AppError::Config("LANCEDB_PATH environment variable is required".to_string())
        })?;

        let corpus_path = lookup("RULES_CORPUS_PATH").map(PathBuf::from).ok_or_else(|| {
            AppError::Config("RULES_CORPUS_PATH environment variable is required".to_string())
        })?;

        let embedding_backend = match lookup("EMBEDDING_BACKEND") {
            Some(s) => s.parse()?,
            None => EmbeddingBackend::FastEmbed,
        };

        let embedding_dim = match lookup("EMBEDDING_DIM") {
            Some(s) => s
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| AppError::Config(format!("invalid EMBEDDING_DIM '{s}'")))?,
            None => NOMIC_EMBED_DIM,
        };
        if embedding_backend == EmbeddingBackend::FastEmbed && embedding_dim != NOMIC_EMBED_DIM {
            return Err(AppError::Config(format!(
                "EMBEDDING_DIM={embedding_dim} is not supported by the fastembed backend ({NOMIC_EMBED_DIM})"
            )));
        }

        let min_similarity = match lookup("MIN_SIMILARITY") {
            Some(s) => Some(
                s.trim()
                    .parse::<f32>()
                    .ok()
                    .filter(|v| (-1.0..=1.0).contains(v))
                    .ok_or_else(|| AppError::Config(format!("invalid MIN_SIMILARITY '{s}'")))?,
            ),
            None => None,
        };

        let reconcile_on_start = match lookup("RECONCILE_ON_START") {
            Some(s) => parse_bool(&s)
                .ok_or_else(|| AppError::Config(format!("invalid RECONCILE_ON_START '{s}'")))?,
            None => false,
        };

        Ok(Self {
            lancedb_path,
            corpus_path,
            collection_name: lookup("COLLECTION_NAME").unwrap_or_else(|| "tax_rules".to_string()),
            embedding_backend,
            embedding_model: lookup("EMBEDDING_MODEL")
                .unwrap_or_else(|| "nomic-embed-text".to_string()),
            embedding_dim,
            generation_model: lookup("GENERATION_MODEL").unwrap_or_else(|| "llama3.2".to_string()),
            min_similarity,
            reconcile_on_start,
            listen_addr: lookup("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
        })
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
