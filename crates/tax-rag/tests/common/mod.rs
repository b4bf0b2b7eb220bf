#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use rag_common::embedding::{EmbedPurpose, EmbeddingGateway};
use rag_common::error::CommonError;
use rag_common::generation::GenerationGateway;
use rag_common::vectordb::VectorDb;
use tax_rag::corpus::CorpusFile;
use tax_rag::pipeline::Pipeline;
use tax_rag::store::RuleStore;

/// One axis per keyword plus a constant bias axis, so no text embeds to the zero vector.
pub const KEYWORDS: [&str; 5] = ["fee", "vat", "stamp", "premium", "pension"];
pub const DIM: usize = KEYWORDS.len() + 1;

pub struct KeywordEmbedder;

#[async_trait]
impl EmbeddingGateway for KeywordEmbedder {
    async fn embed(&self, text: &str, _purpose: EmbedPurpose) -> Result<Vec<f32>, CommonError> {
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = KEYWORDS
            .iter()
            .map(|k| lower.matches(k).count() as f32)
            .collect();
        v.push(0.1);
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

pub struct DownEmbedder;

#[async_trait]
impl EmbeddingGateway for DownEmbedder {
    async fn embed(&self, _text: &str, _purpose: EmbedPurpose) -> Result<Vec<f32>, CommonError> {
        Err(CommonError::UpstreamUnavailable(
            "connection refused".to_string(),
        ))
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// Returns a canned reply and records every prompt it was given.
pub struct ScriptedGenerator {
    reply: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(reply: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.into(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

#[async_trait]
impl GenerationGateway for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, CommonError> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(prompt.to_string());
        Ok(self.reply.clone())
    }
}

pub const FEE_REPLY: &str =
    r#"{"result":"Fee is $20","calculated_value":20,"explanation":"10% of 200"}"#;

pub struct Harness {
    pub dir: TempDir,
    pub generator: Arc<ScriptedGenerator>,
    pub pipeline: Arc<Pipeline>,
}

impl Harness {
    pub async fn new(reply: &str) -> Self {
        Self::with_embedder(reply, Arc::new(KeywordEmbedder)).await
    }

    pub async fn with_embedder(reply: &str, embedder: Arc<dyn EmbeddingGateway>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let generator = ScriptedGenerator::new(reply);
        let store = open_store(dir.path(), DIM).await;
        let corpus = CorpusFile::new(dir.path().join("rules.txt"));
        let pipeline = Pipeline::new(embedder, generator.clone(), store, corpus)
            .expect("pipeline");
        Self {
            dir,
            generator,
            pipeline: Arc::new(pipeline),
        }
    }

    pub fn corpus_path(&self) -> PathBuf {
        self.dir.path().join("rules.txt")
    }

    pub async fn write_corpus(&self, content: &str) {
        tokio::fs::write(self.corpus_path(), content)
            .await
            .expect("write corpus");
    }

    pub async fn read_corpus(&self) -> String {
        tokio::fs::read_to_string(self.corpus_path())
            .await
            .expect("read corpus")
    }
}

pub async fn open_store(dir: &Path, dims: usize) -> Arc<RuleStore> {
    let lance = dir.join("lancedb");
    let db = VectorDb::connect(lance.to_str().expect("utf8 path"))
        .await
        .expect("connect lancedb");
    Arc::new(RuleStore::new(Arc::new(db), "tax_rules", dims))
}
