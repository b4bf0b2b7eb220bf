/// LanceDB vector database wrapper.
///
/// Thin, table-name-addressed operations over a LanceDB connection. Callers own the schema
/// and the Arrow batches; this module only knows that vectors live in a
/// `FixedSizeList<Float32, D>` column and are compared with cosine distance.
use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchIterator};
use arrow_schema::{DataType, Schema};
use lancedb::index::vector::IvfFlatIndexBuilder;
use lancedb::index::Index;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::DistanceType;
use tracing::info;

use crate::error::CommonError;

pub struct VectorDb {
    db: lancedb::Connection,
}

impl VectorDb {
    /// Connect to a LanceDB database at the given filesystem path.
    pub async fn connect(path: &str) -> Result<Self, CommonError> {
        let db = lancedb::connect(path)
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("connection failed: {e}")))?;
        Ok(Self { db })
    }

    pub async fn table_exists(&self, table_name: &str) -> Result<bool, CommonError> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("listing tables failed: {e}")))?;
        Ok(names.iter().any(|n| n == table_name))
    }

    /// Drop a table. Returns `false` if it did not exist.
    pub async fn drop_table(&self, table_name: &str) -> Result<bool, CommonError> {
        if !self.table_exists(table_name).await? {
            return Ok(false);
        }
        self.db
            .drop_table(table_name)
            .await
            .map_err(|e| CommonError::VectorDb(format!("drop table failed: {e}")))?;
        info!(table = table_name, "vector table dropped");
        Ok(true)
    }

    pub async fn create_empty_table(
        &self,
        table_name: &str,
        schema: Arc<Schema>,
    ) -> Result<(), CommonError> {
        self.db
            .create_empty_table(table_name, schema)
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("create table failed: {e}")))?;
        info!(table = table_name, "vector table created");
        Ok(())
    }

    /// Append batches to an existing table. Each `add` is a committed LanceDB version,
    /// so rows are searchable as soon as this returns.
    pub async fn add(
        &self,
        table_name: &str,
        schema: Arc<Schema>,
        batches: Vec<RecordBatch>,
    ) -> Result<(), CommonError> {
        let table = self.open_table(table_name).await?;
        let batch_iter = RecordBatchIterator::new(batches.into_iter().map(Ok), schema);
        table
            .add(Box::new(batch_iter))
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("insert failed: {e}")))?;
        Ok(())
    }

    pub async fn count_rows(&self, table_name: &str) -> Result<usize, CommonError> {
        let table = self.open_table(table_name).await?;
        table
            .count_rows(None)
            .await
            .map_err(|e| CommonError::VectorDb(format!("count rows failed: {e}")))
    }

    /// Cosine nearest-neighbour search over `column`.
    ///
    /// Returns up to `limit` rows as RecordBatches, ordered by ascending `_distance`
    /// (cosine distance, i.e. `1 - cosine_similarity`).
    pub async fn search(
        &self,
        table_name: &str,
        column: &str,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<RecordBatch>, CommonError> {
        let table = self.open_table(table_name).await?;

        let results = table
            .vector_search(query_embedding)
            .map_err(|e| CommonError::VectorDb(format!("vector search setup failed: {e}")))?
            .column(column)
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("vector search failed: {e}")))?;

        futures::TryStreamExt::try_collect(results)
            .await
            .map_err(|e| CommonError::VectorDb(format!("collecting search results failed: {e}")))
    }

    /// Read selected columns of every row.
    pub async fn scan(
        &self,
        table_name: &str,
        columns: &[&str],
    ) -> Result<Vec<RecordBatch>, CommonError> {
        let table = self.open_table(table_name).await?;
        let results = table
            .query()
            .select(Select::columns(columns))
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("scan failed: {e}")))?;

        futures::TryStreamExt::try_collect(results)
            .await
            .map_err(|e| CommonError::VectorDb(format!("collecting scan results failed: {e}")))
    }

    /// Dimension of a `FixedSizeList` vector column, or `None` if the column is missing
    /// or not a fixed-size list.
    pub async fn vector_dimension(
        &self,
        table_name: &str,
        column: &str,
    ) -> Result<Option<usize>, CommonError> {
        let table = self.open_table(table_name).await?;
        let schema = table
            .schema()
            .await
            .map_err(|e| CommonError::VectorDb(format!("reading schema failed: {e}")))?;
        let dim = schema
            .field_with_name(column)
            .ok()
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, n) => usize::try_from(*n).ok(),
                _ => None,
            });
        Ok(dim)
    }

    pub async fn has_index(&self, table_name: &str, column: &str) -> Result<bool, CommonError> {
        let table = self.open_table(table_name).await?;
        let indices = table
            .list_indices()
            .await
            .map_err(|e| CommonError::VectorDb(format!("listing indices failed: {e}")))?;
        Ok(indices
            .iter()
            .any(|idx| idx.columns.iter().any(|c| c == column)))
    }

    /// Build a cosine IVF-flat index over `column`. Vectors stay unquantized, so distances
    /// are exact. LanceDB needs at least 256 rows to train the partitions.
    pub async fn create_cosine_index(
        &self,
        table_name: &str,
        column: &str,
    ) -> Result<(), CommonError> {
        let table = self.open_table(table_name).await?;
        table
            .create_index(
                &[column],
                Index::IvfFlat(IvfFlatIndexBuilder::default().distance_type(DistanceType::Cosine)),
            )
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("create index failed: {e}")))?;
        info!(table = table_name, column, "cosine vector index built");
        Ok(())
    }

    async fn open_table(&self, table_name: &str) -> Result<lancedb::Table, CommonError> {
        self.db
            .open_table(table_name)
            .execute()
            .await
            .map_err(|e| CommonError::VectorDb(format!("open table failed: {e}")))
    }
}
