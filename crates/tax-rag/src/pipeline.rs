/// Retrieval-augmented calculation pipeline.
///
/// Ingest: corpus file → parser → embedder → rule store.
/// Query: embedder → top-1 search → prompt → generator → response parser.
///
/// All collaborators are passed in explicitly. Writes (`ingest`, `add_rule`, `reconcile`)
/// are serialized within the process; reads run concurrently.
use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::corpus::{self, CorpusFile};
use crate::error::AppError;
use crate::model::{QueryResult, Rule, RuleRow};
use crate::normalize::{JsonSpanParser, ResponseParser};
use crate::parser;
use crate::prompt;
use crate::store::RuleStore;
use rag_common::embedding::{EmbedPurpose, EmbeddingGateway};
use rag_common::error::CommonError;
use rag_common::generation::GenerationGateway;

pub struct Pipeline {
    embedder: Arc<dyn EmbeddingGateway>,
    generator: Arc<dyn GenerationGateway>,
    store: Arc<RuleStore>,
    corpus: CorpusFile,
    parser: Arc<dyn ResponseParser>,
    min_similarity: Option<f32>,
    write_lock: Mutex<()>,
}

impl Pipeline {
    /// Fails if the embedder's dimension does not match the store's.
    pub fn new(
        embedder: Arc<dyn EmbeddingGateway>,
        generator: Arc<dyn GenerationGateway>,
        store: Arc<RuleStore>,
        corpus: CorpusFile,
    ) -> Result<Self, AppError> {
        if embedder.dimensions() != store.dimensions() {
            return Err(CommonError::SchemaMismatch {
                table: store.table_name().to_string(),
                expected: store.dimensions(),
                found: embedder.dimensions(),
            }
            .into());
        }
        Ok(Self {
            embedder,
            generator,
            store,
            corpus,
            parser: Arc::new(JsonSpanParser),
            min_similarity: None,
            write_lock: Mutex::new(()),
        })
    }

    /// Answer "no match" when the best hit scores below `threshold`.
    pub fn with_min_similarity(mut self, threshold: Option<f32>) -> Self {
        self.min_similarity = threshold;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn ResponseParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn corpus(&self) -> &CorpusFile {
        &self.corpus
    }

    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    /// Load every rule in the corpus at `path` into the store and return how many there were.
    ///
    /// With `reset`, the collection is dropped so it ends up holding exactly the corpus.
    /// Every rule is embedded before anything is dropped, so a failed read or embedding
    /// leaves the store as it was. An empty corpus is not an error.
    pub async fn ingest(&self, path: &Path, reset: bool) -> Result<usize, AppError> {
        let _guard = self.write_lock.lock().await;

        let content = corpus::read_corpus(path).await?;
        let rules = parser::parse_rules(&content);
        let rows = self.embed_rules(&rules).await?;

        if reset {
            self.store.reset().await?;
        }
        self.store.ensure().await?;

        if !rows.is_empty() {
            self.store.insert(&rows).await?;
        }

        info!(path = %path.display(), reset, count = rules.len(), "ingested rules");
        Ok(rules.len())
    }

    /// Append a rule to the corpus file and the store; returns its new id.
    pub async fn add_rule(&self, text: &str) -> Result<i64, AppError> {
        if text.trim().is_empty() {
            return Err(AppError::InvalidInput("rule text must not be empty".to_string()));
        }
        let _guard = self.write_lock.lock().await;

        let embedding = self.embedder.embed(text, EmbedPurpose::Document).await?;
        let rule_id = self.corpus.append_rule(text).await?;
        self.store
            .insert(&[RuleRow {
                rule_id,
                content: text.to_string(),
                embedding,
            }])
            .await?;

        info!(rule_id, "rule added");
        Ok(rule_id)
    }

    /// Retrieve the closest rule for `query` and have the model calculate with it.
    pub async fn calculate(&self, query: &str) -> Result<QueryResult, AppError> {
        let query_embedding = self.embedder.embed(query, EmbedPurpose::Query).await?;
        let Some(hit) = self
            .store
            .search(&query_embedding, 1)
            .await?
            .into_iter()
            .next()
        else {
            info!("no rule in collection, returning no-match");
            return Ok(QueryResult::no_match());
        };

        if let Some(threshold) = self.min_similarity {
            if hit.score < threshold {
                info!(rule_id = hit.rule_id, score = hit.score, threshold, "best rule below threshold");
                return Ok(QueryResult::no_match());
            }
        }
        debug!(rule_id = hit.rule_id, score = hit.score, "rule retrieved");

        let prompt = prompt::compose_prompt(&hit.content, query);
        let raw = self.generator.generate(&prompt).await?;
        Ok(self.parser.parse(&raw))
    }

    /// Insert corpus rules whose id is missing from the store. Returns how many were added.
    ///
    /// Repairs an `add_rule` that wrote the corpus file but not the store.
    pub async fn reconcile(&self) -> Result<usize, AppError> {
        let _guard = self.write_lock.lock().await;

        let content = self.corpus.read_or_empty().await?;
        let stored = self.store.rule_ids().await?;
        let missing: Vec<Rule> = parser::parse_rules(&content)
            .into_iter()
            .filter(|r| !stored.contains(&r.rule_id))
            .collect();
        if missing.is_empty() {
            debug!("store already holds every corpus rule");
            return Ok(0);
        }

        let rows = self.embed_rules(&missing).await?;
        self.store.insert(&rows).await?;
        info!(count = rows.len(), "reconciled missing rules into store");
        Ok(rows.len())
    }

    async fn embed_rules(&self, rules: &[Rule]) -> Result<Vec<RuleRow>, AppError> {
        let mut rows = Vec::with_capacity(rules.len());
        for rule in rules {
            let embedding = self
                .embedder
                .embed(&rule.content, EmbedPurpose::Document)
                .await?;
            rows.push(RuleRow {
                rule_id: rule.rule_id,
                content: rule.content.clone(),
                embedding,
            });
        }
        Ok(rows)
    }
}
