/// Turns a model reply into a `QueryResult`.
///
/// The reply is free text that usually contains a JSON object. The span from the first `{`
/// to the last `}` is parsed; anything that does not yield `result` and `calculated_value`
/// falls back to returning the raw text with a zero value. Parsing never fails.
use serde_json::{Map, Value};
use tracing::debug;

use crate::model::QueryResult;

pub const PARSE_FAILURE_EXPLANATION: &str =
    "Could not parse structured response from LLM. See raw result.";

/// Seam for swapping in stricter parsing (e.g. schema-constrained generation).
pub trait ResponseParser: Send + Sync {
    fn parse(&self, raw: &str) -> QueryResult;
}

/// Default parser: first-`{`-to-last-`}` JSON extraction with raw-text fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSpanParser;

impl ResponseParser for JsonSpanParser {
    fn parse(&self, raw: &str) -> QueryResult {
        normalize(raw)
    }
}

pub fn normalize(raw: &str) -> QueryResult {
    extract_structured(raw).unwrap_or_else(|| {
        debug!(len = raw.len(), "model reply is not structured, returning raw text");
        QueryResult {
            result: raw.to_string(),
            calculated_value: 0.0,
            explanation: PARSE_FAILURE_EXPLANATION.to_string(),
        }
    })
}

fn extract_structured(raw: &str) -> Option<QueryResult> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    let value: Value = serde_json::from_str(&raw[start..=end]).ok()?;
    from_object(value.as_object()?)
}

fn from_object(obj: &Map<String, Value>) -> Option<QueryResult> {
    let result = text_value(obj.get("result")?);
    let calculated_value = number_value(obj.get("calculated_value")?)?;
    let explanation = obj.get("explanation").map(text_value).unwrap_or_default();
    Some(QueryResult {
        result,
        calculated_value,
        explanation,
    })
}

fn text_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Numbers pass through; numeric strings like "$1,200.50" or "18%" are accepted too.
/// A comma is only read as a thousands separator; "12,5" or "1.200,50" are rejected.
fn number_value(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !c.is_whitespace() && !matches!(c, '$' | '€' | '£' | '₹' | '%'))
                .collect();
            strip_thousands(&cleaned)?.parse::<f64>().ok()?
        }
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Removes `,` grouping from the integer part. None if the commas are not 3-digit groups.
fn strip_thousands(s: &str) -> Option<String> {
    if !s.contains(',') {
        return Some(s.to_string());
    }
    let (int_part, frac_part) = match s.split_once('.') {
        Some((int_part, frac)) if !frac.contains(',') => (int_part, Some(frac)),
        Some(_) => return None,
        None => (s, None),
    };
    let digits = int_part.trim_start_matches(['-', '+']);
    let mut groups = digits.split(',');
    let lead = groups.next()?;
    if lead.is_empty() || lead.len() > 3 || !lead.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !groups.all(|g| g.len() == 3 && g.bytes().all(|b| b.is_ascii_digit())) {
        return None;
    }
    let mut out = int_part.replace(',', "");
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(frac);
    }
    Some(out)
}
