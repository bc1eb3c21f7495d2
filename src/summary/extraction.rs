//! Structured extraction of action items and decisions
//!
//! One `generate` call per request. The response is parsed strictly as JSON
//! first and, only if that fails, scanned line by line for `field: value`
//! markers. An empty result is always replaced by the schema's sentinel record
//! so callers can tell "nothing found" apart from "could not parse".

use crate::summary::backend::Generator;
use crate::summary::schemas::{
    load_builtin_schema, ExtractedItem, ExtractionKind, ExtractionSchema, SchemaError, TITLE_FIELD,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// `field: value` line, tolerating list markers, quotes and markdown bold
static FIELD_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(?:[-*•]+\s+|\d+[.)]\s*)?[\[{\s]*["'*]*([A-Za-z][A-Za-z _-]*?)["'*]*\s*:\s*(.*)$"#)
        .expect("field line regex is valid")
});

/// Complete `"key": value` pair inside a JSON fragment; an unterminated string never matches
static JSON_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""([A-Za-z][A-Za-z _-]*)"\s*:\s*("(?:[^"\\]|\\.)*"|-?\d+(?:\.\d+)?|true|false|null)"#)
        .expect("json pair regex is valid")
});

const PREVIEW_CHARS: usize = 200;

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

/// `"Due Date"` -> `"due_date"`
fn normalize_key(key: &str) -> String {
    key.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// Result of the strict (JSON) parse
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Parsed(Vec<ExtractedItem>),
    /// Response was not JSON; carries the parser message
    Malformed(String),
}

/// Builds the single prompt sent to the generator
pub fn build_prompt(schema: &ExtractionSchema, transcript: &str) -> String {
    format!(
        r#"{instruction}

Return ONLY a JSON array of objects, with no commentary before or after it. Each object must have exactly these fields, all string values:
{fields}
If the transcript does not state {label} explicitly, infer the most plausible {label} from what was discussed. Use an empty string for any field you cannot determine.

Example output:
{example}

Transcript:
{transcript}

If no {label} can be identified or inferred, return exactly:
{sentinel}"#,
        instruction = schema.instruction,
        fields = schema.to_field_instructions(),
        label = schema.label,
        example = schema.example_json(),
        transcript = transcript,
        sentinel = schema.sentinel_json(),
    )
}

/// Converts a JSON scalar to a field value. Nested values are dropped.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Reduces a JSON object to the schema's fields; every declared field is present
fn item_from_value(value: &Value, schema: &ExtractionSchema) -> Option<ExtractedItem> {
    let Value::Object(map) = value else {
        debug!("Skipping non-object entry in extraction response");
        return None;
    };

    let mut item = ExtractedItem::new();
    for name in schema.field_names() {
        item.set(name, "");
    }
    for (key, value) in map {
        let key = normalize_key(key);
        if !schema.has_field(&key) {
            continue;
        }
        if let Some(text) = scalar_to_string(value) {
            item.set(key, text);
        }
    }

    if item.is_empty() {
        None
    } else {
        Some(item)
    }
}

fn items_from_values(values: &[Value], schema: &ExtractionSchema) -> Vec<ExtractedItem> {
    values
        .iter()
        .filter_map(|v| item_from_value(v, schema))
        .collect()
}

/// Tier 1: JSON array between the first `[` and last `]`, else the whole
/// response as one JSON value (wrapped if it is not an array).
///
/// A bracket span that parses but yields no records (say `[1]` inside a
/// string of a bare object) does not win over the whole response.
pub fn parse_strict(response: &str, schema: &ExtractionSchema) -> ParseOutcome {
    let trimmed = response.trim();
    let mut bracketed = None;

    if let (Some(start), Some(end)) = (trimmed.find('['), trimmed.rfind(']')) {
        if start < end {
            if let Ok(Value::Array(values)) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                let items = items_from_values(&values, schema);
                if !items.is_empty() {
                    return ParseOutcome::Parsed(items);
                }
                bracketed = Some(items);
            }
        }
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(values)) => ParseOutcome::Parsed(items_from_values(&values, schema)),
        Ok(value) => ParseOutcome::Parsed(items_from_values(&[value], schema)),
        Err(e) => match bracketed {
            Some(items) => ParseOutcome::Parsed(items),
            None => ParseOutcome::Malformed(e.to_string()),
        },
    }
}

fn clean_value(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(',')
        .trim()
        .trim_matches(&['"', '*'][..])
        .trim()
        .to_string()
}

/// Decodes a matched JSON scalar; `null` is empty
fn json_pair_value(raw: &str) -> String {
    if raw == "null" {
        return String::new();
    }
    if raw.starts_with('"') {
        return serde_json::from_str::<String>(raw)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| raw.trim_matches('"').trim().to_string());
    }
    raw.to_string()
}

/// `field: value` pairs found on one line. Quoted JSON pairs win, so several
/// records on one line split cleanly; otherwise the line is one marker.
fn line_fields(line: &str) -> Vec<(String, String)> {
    let pairs: Vec<_> = JSON_PAIR
        .captures_iter(line)
        .map(|caps| (normalize_key(&caps[1]), json_pair_value(&caps[2])))
        .collect();
    if !pairs.is_empty() {
        return pairs;
    }

    FIELD_LINE
        .captures(line)
        .map(|caps| vec![(normalize_key(&caps[1]), clean_value(&caps[2]))])
        .unwrap_or_default()
}

/// Tier 2: line scan for `field: value` markers, including `"key": value`
/// pairs of broken JSON. A new title closes the open record if it already has
/// one; an open titled record is kept at the end.
pub fn parse_lenient(response: &str, schema: &ExtractionSchema) -> Vec<ExtractedItem> {
    let mut items = Vec::new();
    let mut current = ExtractedItem::new();

    let finish = |record: ExtractedItem| {
        let mut item = ExtractedItem::new();
        for name in schema.field_names() {
            item.set(name, record.get(name).unwrap_or_default());
        }
        item
    };

    for line in response.lines() {
        for (key, value) in line_fields(line) {
            if !schema.has_field(&key) {
                continue;
            }
            if key == TITLE_FIELD && current.has_title() {
                items.push(finish(std::mem::take(&mut current)));
            }
            current.set(key, value);
        }
    }

    if current.has_title() {
        items.push(finish(current));
    }
    items
}

/// Runs both parse tiers and substitutes the sentinel for an empty result
pub fn parse_items(response: &str, schema: &ExtractionSchema) -> Vec<ExtractedItem> {
    let items = match parse_strict(response, schema) {
        ParseOutcome::Parsed(items) => items,
        ParseOutcome::Malformed(reason) => {
            warn!(
                "⚠️ Could not parse {} response as JSON ({}), falling back to line scan",
                schema.label, reason
            );
            parse_lenient(response, schema)
        }
    };

    if items.is_empty() {
        info!("No {} found, returning sentinel record", schema.label);
        return vec![schema.sentinel_item()];
    }
    items
}

/// True when `items` is exactly the "nothing found" result for `schema`
pub fn is_sentinel(items: &[ExtractedItem], schema: &ExtractionSchema) -> bool {
    match items {
        [only] => only
            .title()
            .is_some_and(|t| t.trim().eq_ignore_ascii_case(schema.sentinel_title())),
        _ => false,
    }
}

/// Extracts action items and decisions through an injected [`Generator`]
pub struct StructuredExtractor {
    generator: Arc<dyn Generator>,
    action_items: ExtractionSchema,
    decisions: ExtractionSchema,
}

impl StructuredExtractor {
    /// Loads and validates both built-in schemas
    pub fn new(generator: Arc<dyn Generator>) -> Result<Self, SchemaError> {
        Ok(Self {
            generator,
            action_items: load_builtin_schema(ExtractionKind::ActionItems)?,
            decisions: load_builtin_schema(ExtractionKind::Decisions)?,
        })
    }

    pub fn schema(&self, kind: ExtractionKind) -> &ExtractionSchema {
        match kind {
            ExtractionKind::ActionItems => &self.action_items,
            ExtractionKind::Decisions => &self.decisions,
        }
    }

    /// Never fails: backend errors and empty results become the sentinel record
    pub async fn extract(&self, kind: ExtractionKind, text: &str) -> Vec<ExtractedItem> {
        let schema = self.schema(kind);
        if text.trim().is_empty() {
            return vec![schema.sentinel_item()];
        }

        let start = Instant::now();
        let prompt = build_prompt(schema, text);
        info!(
            "Extracting {} ({} chars of transcript)",
            schema.label,
            text.len()
        );

        let response = match self.generator.generate(&prompt).await {
            Ok(response) => response,
            Err(e) => {
                warn!("⚠️ {} extraction failed: {}", schema.label, e);
                return vec![schema.sentinel_item()];
            }
        };
        debug!(
            "Raw {} response ({} chars): {}",
            schema.label,
            response.len(),
            preview(&response)
        );

        let items = parse_items(&response, schema);
        info!(
            "✓ Extracted {} {} in {}ms",
            items.len(),
            schema.label,
            start.elapsed().as_millis()
        );
        items
    }

    pub async fn extract_action_items(&self, text: &str) -> Vec<ExtractedItem> {
        self.extract(ExtractionKind::ActionItems, text).await
    }

    pub async fn extract_decisions(&self, text: &str) -> Vec<ExtractedItem> {
        self.extract(ExtractionKind::Decisions, text).await
    }

    pub fn is_sentinel(&self, items: &[ExtractedItem], kind: ExtractionKind) -> bool {
        is_sentinel(items, self.schema(kind))
    }
}
