/// Parser for the plain-text rule corpus.
///
/// Each rule starts at a `Rule_ID: <integer>` marker and runs until the next marker or EOF:
///
/// ```text
/// Rule_ID: 1
/// Flat fee rule: fee = 10% of amount.
///
/// Rule_ID: 2
/// ...
/// ```
///
/// A record's content is the trimmed span *including* its marker line. Markers whose number
/// does not fit an `i64` are not markers; their text stays in the preceding record.
use regex::Regex;
use tracing::warn;

use crate::model::Rule;

const MARKER_PATTERN: &str = r"Rule_ID:\s*(\d+)";

pub fn parse_rules(content: &str) -> Vec<Rule> {
    let marker_re = Regex::new(MARKER_PATTERN).expect("valid regex");

    let markers: Vec<(usize, i64)> = marker_re
        .captures_iter(content)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            match caps[1].parse::<i64>() {
                Ok(id) => Some((whole.start(), id)),
                Err(e) => {
                    warn!(offset = whole.start(), error = %e, "rule id out of range, skipping marker");
                    None
                }
            }
        })
        .collect();

    markers
        .iter()
        .enumerate()
        .map(|(i, &(start, rule_id))| {
            let end = markers
                .get(i + 1)
                .map(|&(next, _)| next)
                .unwrap_or(content.len());
            Rule {
                rule_id,
                content: content[start..end].trim().to_string(),
            }
        })
        .collect()
}

/// Id for the next appended rule: highest existing id + 1, or 1 for an empty corpus.
pub fn next_rule_id(content: &str) -> i64 {
    parse_rules(content)
        .iter()
        .map(|r| r.rule_id)
        .max()
        .map_or(1, |max| max.saturating_add(1))
}

/// Text appended to the corpus for a new rule. A blank line separates it from any
/// existing content.
pub fn format_rule_block(existing: &str, rule_id: i64, text: &str) -> String {
    let block = format!("Rule_ID: {rule_id}\n{}", text.trim());
    if existing.trim().is_empty() || existing.ends_with("\n\n") {
        block
    } else if existing.ends_with('\n') {
        format!("\n{block}")
    } else {
        format!("\n\n{block}")
    }
}
