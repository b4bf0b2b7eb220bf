/// Rule collection on top of LanceDB.
///
/// Table schema:
/// - id: Int64 (not null) — surrogate key assigned on insert
/// - rule_id: Int64 (not null)
/// - content: Utf8 (not null) — at most 5000 characters
/// - embedding: FixedSizeList<Float32, D> (not null)
///
/// Lifecycle: `Absent` → `ensure()` → `Loaded`; `reset()` goes back to `Absent`. An existing
/// table is only adopted if its embedding dimension matches the configured one.
use std::collections::HashSet;
use std::sync::Arc;

use arrow_array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::model::{RuleHit, RuleRow, MAX_CONTENT_CHARS};
use rag_common::error::CommonError;
use rag_common::vectordb::VectorDb;

const EMBEDDING_COLUMN: &str = "embedding";
/// LanceDB cannot train IVF partitions on fewer rows than this.
const INDEX_MIN_ROWS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    Absent,
    Loaded,
}

pub struct RuleStore {
    vectordb: Arc<VectorDb>,
    table_name: String,
    dimensions: usize,
    state: Mutex<CollectionState>,
}

impl RuleStore {
    pub fn new(vectordb: Arc<VectorDb>, table_name: impl Into<String>, dimensions: usize) -> Self {
        Self {
            vectordb,
            table_name: table_name.into(),
            dimensions,
            state: Mutex::new(CollectionState::Absent),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub async fn state(&self) -> CollectionState {
        *self.state.lock().await
    }

    /// Create the table if absent, otherwise adopt it after checking its embedding dimension.
    pub async fn ensure(&self) -> Result<(), CommonError> {
        let mut state = self.state.lock().await;
        if *state == CollectionState::Loaded && self.vectordb.table_exists(&self.table_name).await? {
            return Ok(());
        }

        if self.vectordb.table_exists(&self.table_name).await? {
            let found = self
                .vectordb
                .vector_dimension(&self.table_name, EMBEDDING_COLUMN)
                .await?
                .unwrap_or(0);
            if found != self.dimensions {
                return Err(CommonError::SchemaMismatch {
                    table: self.table_name.clone(),
                    expected: self.dimensions,
                    found,
                });
            }
            debug!(table = %self.table_name, "rule table loaded");
        } else {
            self.vectordb
                .create_empty_table(&self.table_name, self.schema())
                .await?;
        }

        *state = CollectionState::Loaded;
        Ok(())
    }

    /// Drop the table if present.
    pub async fn reset(&self) -> Result<(), CommonError> {
        let mut state = self.state.lock().await;
        if self.vectordb.drop_table(&self.table_name).await? {
            info!(table = %self.table_name, "rule table reset");
        }
        *state = CollectionState::Absent;
        Ok(())
    }

    /// Append rows. Rule id uniqueness is the caller's concern.
    pub async fn insert(&self, rows: &[RuleRow]) -> Result<usize, CommonError> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.ensure().await?;

        let first_id = self.vectordb.count_rows(&self.table_name).await? as i64 + 1;
        let batch = build_record_batch(rows, first_id, self.dimensions)?;
        self.vectordb
            .add(&self.table_name, batch.schema(), vec![batch])
            .await?;

        let total = self.vectordb.count_rows(&self.table_name).await?;
        if total >= INDEX_MIN_ROWS
            && !self
                .vectordb
                .has_index(&self.table_name, EMBEDDING_COLUMN)
                .await?
        {
            if let Err(e) = self
                .vectordb
                .create_cosine_index(&self.table_name, EMBEDDING_COLUMN)
                .await
            {
                warn!(error = %e, "vector index build failed, searches stay exhaustive");
            }
        }

        debug!(table = %self.table_name, inserted = rows.len(), total, "rules inserted");
        Ok(rows.len())
    }

    /// Top-`k` rules by cosine similarity, best first. Empty when the table is absent.
    ///
    /// Once the collection is `Loaded` this goes straight to LanceDB without touching the
    /// table listing.
    pub async fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<RuleHit>, CommonError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if query_embedding.len() != self.dimensions {
            return Err(CommonError::Model(format!(
                "query embedding has dimension {}, expected {}",
                query_embedding.len(),
                self.dimensions
            )));
        }
        if self.state().await == CollectionState::Absent {
            if !self.vectordb.table_exists(&self.table_name).await? {
                return Ok(Vec::new());
            }
            self.ensure().await?;
        }

        let batches = self
            .vectordb
            .search(&self.table_name, EMBEDDING_COLUMN, query_embedding, k)
            .await?;

        let mut hits = extract_hits(&batches);
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    /// Every rule id currently stored.
    pub async fn rule_ids(&self) -> Result<HashSet<i64>, CommonError> {
        if !self.vectordb.table_exists(&self.table_name).await? {
            return Ok(HashSet::new());
        }
        let batches = self.vectordb.scan(&self.table_name, &["rule_id"]).await?;
        let mut ids = HashSet::new();
        for batch in &batches {
            if let Some(col) = get_int_column(batch, "rule_id") {
                ids.extend((0..col.len()).map(|row| col.value(row)));
            }
        }
        Ok(ids)
    }

    /// Whether the ANN index over `embedding` has been built.
    pub async fn is_indexed(&self) -> Result<bool, CommonError> {
        if !self.vectordb.table_exists(&self.table_name).await? {
            return Ok(false);
        }
        self.vectordb
            .has_index(&self.table_name, EMBEDDING_COLUMN)
            .await
    }

    pub async fn count(&self) -> Result<usize, CommonError> {
        if !self.vectordb.table_exists(&self.table_name).await? {
            return Ok(0);
        }
        self.vectordb.count_rows(&self.table_name).await
    }

    fn schema(&self) -> Arc<Schema> {
        rule_schema(self.dimensions)
    }
}

fn embedding_field() -> Arc<Field> {
    Arc::new(Field::new("item", DataType::Float32, true))
}

fn rule_schema(dimensions: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("rule_id", DataType::Int64, false),
        Field::new("content", DataType::Utf8, false),
        Field::new(
            EMBEDDING_COLUMN,
            DataType::FixedSizeList(embedding_field(), dimensions as i32),
            false,
        ),
    ]))
}

/// Build an Arrow RecordBatch from rule rows, numbering surrogate ids from `first_id`.
fn build_record_batch(
    rows: &[RuleRow],
    first_id: i64,
    dimensions: usize,
) -> Result<RecordBatch, CommonError> {
    if let Some(bad) = rows.iter().find(|r| r.embedding.len() != dimensions) {
        return Err(CommonError::Model(format!(
            "rule {} has embedding dimension {}, expected {dimensions}",
            bad.rule_id,
            bad.embedding.len()
        )));
    }

    let ids: Vec<i64> = (0..rows.len() as i64).map(|i| first_id + i).collect();
    let rule_ids: Vec<i64> = rows.iter().map(|r| r.rule_id).collect();
    let contents: Vec<String> = rows.iter().map(|r| truncate_content(&r.content)).collect();

    let id_array: ArrayRef = Arc::new(Int64Array::from(ids));
    let rule_id_array: ArrayRef = Arc::new(Int64Array::from(rule_ids));
    let content_array: ArrayRef = Arc::new(StringArray::from(contents));

    let flat_values: Vec<f32> = rows.iter().flat_map(|r| r.embedding.iter().copied()).collect();
    let embedding_array: ArrayRef = Arc::new(
        FixedSizeListArray::try_new(
            embedding_field(),
            dimensions as i32,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| CommonError::VectorDb(format!("failed to build embedding array: {e}")))?,
    );

    RecordBatch::try_new(
        rule_schema(dimensions),
        vec![id_array, rule_id_array, content_array, embedding_array],
    )
    .map_err(|e| CommonError::VectorDb(format!("failed to build record batch: {e}")))
}

fn truncate_content(content: &str) -> String {
    if content.chars().count() > MAX_CONTENT_CHARS {
        content.chars().take(MAX_CONTENT_CHARS).collect()
    } else {
        content.to_string()
    }
}

fn extract_hits(batches: &[RecordBatch]) -> Vec<RuleHit> {
    let mut hits = Vec::new();

    for batch in batches {
        let rule_id_col = get_int_column(batch, "rule_id");
        let content_col = batch
            .column_by_name("content")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let distance_col = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

        let (Some(rule_id_col), Some(content_col)) = (rule_id_col, content_col) else {
            warn!("search result batch missing expected columns");
            continue;
        };

        for row in 0..batch.num_rows() {
            let distance = distance_col.map(|c| c.value(row)).unwrap_or(0.0);
            hits.push(RuleHit {
                rule_id: rule_id_col.value(row),
                content: content_col.value(row).to_string(),
                score: 1.0 - distance,
            });
        }
    }

    hits
}

fn get_int_column<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a Int64Array> {
    batch
        .column_by_name(name)?
        .as_any()
        .downcast_ref::<Int64Array>()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store(dir: &tempfile::TempDir, dims: usize) -> RuleStore {
        let db = VectorDb::connect(dir.path().to_str().expect("utf8 path"))
            .await
            .expect("connect");
        RuleStore::new(Arc::new(db), "tax_rules", dims)
    }

    fn row(rule_id: i64, content: &str, embedding: Vec<f32>) -> RuleRow {
        RuleRow {
            rule_id,
            content: content.to_string(),
            embedding,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn search_on_absent_table_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir, 3).await;
        assert_eq!(store.state().await, CollectionState::Absent);
        assert!(store.search(&[1.0, 0.0, 0.0], 1).await.unwrap().is_empty());
        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(store.state().await, CollectionState::Absent);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn insert_then_search_returns_closest_rule() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir, 3).await;
        store.ensure().await.unwrap();
        assert_eq!(store.state().await, CollectionState::Loaded);
        assert!(store.search(&[1.0, 0.0, 0.0], 1).await.unwrap().is_empty());

        store
            .insert(&[
                row(1, "fee rule", vec![1.0, 0.0, 0.0]),
                row(2, "vat rule", vec![0.0, 1.0, 0.0]),
                row(3, "stamp duty", vec![0.0, 0.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = store.search(&[0.1, 0.9, 0.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rule_id, 2);
        assert_eq!(hits[0].content, "vat rule");
        assert!(hits[0].score > 0.9);

        let top2 = store.search(&[0.6, 0.5, 0.0], 2).await.unwrap();
        assert_eq!(top2.iter().map(|h| h.rule_id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(top2[0].score >= top2[1].score);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reset_drops_all_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir, 2).await;
        store.insert(&[row(1, "a", vec![1.0, 0.0])]).await.unwrap();
        store.insert(&[row(1, "a again", vec![1.0, 0.0])]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
        assert_eq!(store.rule_ids().await.unwrap(), HashSet::from([1]));

        store.reset().await.unwrap();
        assert_eq!(store.state().await, CollectionState::Absent);
        assert_eq!(store.count().await.unwrap(), 0);
        store.ensure().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dimension_change_is_a_schema_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        store(&dir, 3).await.ensure().await.unwrap();

        let reopened = store(&dir, 4).await;
        match reopened.ensure().await {
            Err(CommonError::SchemaMismatch {
                expected, found, ..
            }) => {
                assert_eq!(expected, 4);
                assert_eq!(found, 3);
            }
            other => panic!("expected schema mismatch, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wrong_row_dimension_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir, 3).await;
        let err = store.insert(&[row(1, "a", vec![1.0])]).await.unwrap_err();
        assert!(matches!(err, CommonError::Model(_)));
    }

    /// Unit vector along one of the first seven axes, tilted by `i`.
    fn spread(i: usize, dims: usize) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        v[i % 7] = 1.0;
        v[(i + 1) % 7] = (i % 13) as f32 / 13.0;
        v
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn index_is_built_at_threshold_and_search_stays_exact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dims = 8;
        let store = store(&dir, dims).await;

        let filler: Vec<RuleRow> = (0..INDEX_MIN_ROWS - 1)
            .map(|i| row(i as i64 + 1, "filler", spread(i, dims)))
            .collect();
        store.insert(&filler).await.unwrap();
        assert!(!store.is_indexed().await.unwrap());

        let mut target = vec![0.0; dims];
        target[7] = 1.0;
        store
            .insert(&[row(9_000, "stamp duty rule", target.clone())])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), INDEX_MIN_ROWS);
        assert!(store.is_indexed().await.unwrap());

        let hits = store.search(&target, 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rule_id, 9_000);
        assert!((hits[0].score - 1.0).abs() < 1e-4, "score {}", hits[0].score);

        let mut query = vec![0.0; dims];
        query[7] = 1.0;
        query[0] = 0.2;
        let hits = store.search(&query, 1).await.unwrap();
        assert_eq!(hits[0].rule_id, 9_000);
        let expected = 1.0 / (1.0f32 + 0.04).sqrt();
        assert!((hits[0].score - expected).abs() < 1e-4, "score {}", hits[0].score);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn loaded_store_sees_inserts_without_reensuring() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = store(&dir, 2).await;
        store.insert(&[row(1, "a", vec![1.0, 0.0])]).await.unwrap();
        assert_eq!(store.state().await, CollectionState::Loaded);

        store.insert(&[row(2, "b", vec![0.0, 1.0])]).await.unwrap();
        let hits = store.search(&[0.1, 1.0], 1).await.unwrap();
        assert_eq!(hits[0].rule_id, 2);

        store.reset().await.unwrap();
        assert!(store.search(&[0.1, 1.0], 1).await.unwrap().is_empty());
    }

    #[test]
    fn long_content_is_truncated() {
        let long = "x".repeat(MAX_CONTENT_CHARS + 10);
        assert_eq!(truncate_content(&long).chars().count(), MAX_CONTENT_CHARS);
        assert_eq!(truncate_content("short"), "short");
    }
}
