/// Error types shared by the retrieval infrastructure.
///
/// These errors describe failures of the backends the pipeline talks to (embedding model,
/// generation model, LanceDB). Application errors live in the application crate and wrap
/// `CommonError` via `#[from]`.

#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("vector db error: {0}")]
    VectorDb(String),

    #[error("schema mismatch on table {table}: expected embedding dimension {expected}, found {found}")]
    SchemaMismatch {
        table: String,
        expected: usize,
        found: usize,
    },
}
