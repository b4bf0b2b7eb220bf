/// The durable, append-only rules text file.
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::error::AppError;
use crate::parser;

#[derive(Debug, Clone)]
pub struct CorpusFile {
    path: PathBuf,
}

impl CorpusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole corpus. A missing file is an error.
    pub async fn read(&self) -> Result<String, AppError> {
        read_corpus(&self.path).await
    }

    /// Read the whole corpus, treating a missing file as empty.
    pub async fn read_or_empty(&self) -> Result<String, AppError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(AppError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Append `text` as a new rule and return the id it was given.
    ///
    /// The id is derived by re-parsing the current file, so callers must not append
    /// concurrently.
    pub async fn append_rule(&self, text: &str) -> Result<i64, AppError> {
        let existing = self.read_or_empty().await?;
        let rule_id = parser::next_rule_id(&existing);
        let block = parser::format_rule_block(&existing, rule_id, text);

        let io_err = |source: std::io::Error| AppError::Io {
            path: self.path.clone(),
            source,
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_err)?;
        file.write_all(block.as_bytes()).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;

        Ok(rule_id)
    }
}

pub async fn read_corpus(path: &Path) -> Result<String, AppError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| AppError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_to_missing_file_starts_at_one() {
        let dir = tempfile::tempdir().expect("tempdir");
        let corpus = CorpusFile::new(dir.path().join("rules.txt"));

        assert!(matches!(corpus.read().await, Err(AppError::Io { .. })));
        assert_eq!(corpus.read_or_empty().await.unwrap(), "");

        let id = corpus.append_rule("Flat fee rule: fee = 5% of amount.").await.unwrap();
        assert_eq!(id, 1);
        assert_eq!(
            corpus.read().await.unwrap(),
            "Rule_ID: 1\nFlat fee rule: fee = 5% of amount."
        );
    }

    #[tokio::test]
    async fn append_continues_after_highest_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rules.txt");
        tokio::fs::write(&path, "Rule_ID: 3\nA\n\nRule_ID: 9\nB")
            .await
            .unwrap();
        let corpus = CorpusFile::new(&path);

        assert_eq!(corpus.append_rule("  C  ").await.unwrap(), 10);
        assert_eq!(corpus.append_rule("D").await.unwrap(), 11);

        let content = corpus.read().await.unwrap();
        assert!(content.ends_with("Rule_ID: 9\nB\n\nRule_ID: 10\nC\n\nRule_ID: 11\nD"));
        let ids: Vec<i64> = parser::parse_rules(&content).iter().map(|r| r.rule_id).collect();
        assert_eq!(ids, vec![3, 9, 10, 11]);
    }
}
