use serde::{Deserialize, Serialize};

/// Maximum stored length of a rule's content, in characters.
pub const MAX_CONTENT_CHARS: usize = 5000;

/// One rule record as parsed from the corpus file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: i64,
    pub content: String,
}

/// A rule ready for insertion into the vector store.
#[derive(Debug, Clone)]
pub struct RuleRow {
    pub rule_id: i64,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// A search hit. `score` is cosine similarity (1.0 = same direction).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleHit {
    pub rule_id: i64,
    pub content: String,
    pub score: f32,
}

/// The answer returned for every `calculate` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub result: String,
    pub calculated_value: f64,
    pub explanation: String,
}

pub const NO_MATCH_MESSAGE: &str = "No relevant rule found";

impl QueryResult {
    pub fn no_match() -> Self {
        Self {
            result: NO_MATCH_MESSAGE.to_string(),
            calculated_value: 0.0,
            explanation: NO_MATCH_MESSAGE.to_string(),
        }
    }
}
