use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of fields every extraction record carries
pub const FIELD_COUNT: usize = 4;

/// Field every record starts with; the sentinel is recognised by it
pub const TITLE_FIELD: &str = "title";

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to parse schema '{id}': {source}")]
    Parse {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Schema '{id}' is invalid: {reason}")]
    Invalid { id: String, reason: String },
}

/// Which kind of record an extraction call produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionKind {
    ActionItems,
    Decisions,
}

impl ExtractionKind {
    pub fn id(&self) -> &'static str {
        match self {
            ExtractionKind::ActionItems => "action_items",
            ExtractionKind::Decisions => "decisions",
        }
    }
}

impl fmt::Display for ExtractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for ExtractionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "actions" | "action_items" | "action-items" => Ok(ExtractionKind::ActionItems),
            "decisions" => Ok(ExtractionKind::Decisions),
            other => Err(format!(
                "Unknown extraction kind '{}'. Expected 'actions' or 'decisions'",
                other
            )),
        }
    }
}

/// One named field of a record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Shown to the model next to the field name
    pub description: String,
}

/// A flat string-to-string record produced by extraction.
///
/// Serializes as a plain JSON object, e.g. `{"title": "...", "assignee": "..."}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractedItem(BTreeMap<String, String>);

impl ExtractedItem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.get(TITLE_FIELD)
    }

    pub fn has_title(&self) -> bool {
        self.title().is_some_and(|t| !t.is_empty())
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|v| v.is_empty())
    }
}

impl From<BTreeMap<String, String>> for ExtractedItem {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

/// Field set, example record and "nothing found" sentinel for one extraction kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSchema {
    pub kind: ExtractionKind,

    /// Plural noun used in prompts, e.g. "action items"
    pub label: String,

    /// Task instruction placed at the top of the prompt
    pub instruction: String,

    pub fields: Vec<FieldSpec>,

    /// Canonical example record shown to the model
    pub example: BTreeMap<String, String>,

    /// Record returned when nothing could be extracted
    pub sentinel: BTreeMap<String, String>,
}

impl ExtractionSchema {
    /// Parses and validates a schema definition
    pub fn from_json(id: &str, json: &str) -> Result<Self, SchemaError> {
        let schema: ExtractionSchema =
            serde_json::from_str(json).map_err(|source| SchemaError::Parse {
                id: id.to_string(),
                source,
            })?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        let invalid = |reason: String| SchemaError::Invalid {
            id: self.kind.id().to_string(),
            reason,
        };

        if self.label.trim().is_empty() {
            return Err(invalid("label cannot be empty".to_string()));
        }
        if self.instruction.trim().is_empty() {
            return Err(invalid("instruction cannot be empty".to_string()));
        }
        if self.fields.len() != FIELD_COUNT {
            return Err(invalid(format!(
                "expected {} fields, found {}",
                FIELD_COUNT,
                self.fields.len()
            )));
        }
        if self.fields[0].name != TITLE_FIELD {
            return Err(invalid(format!(
                "first field must be '{}', found '{}'",
                TITLE_FIELD, self.fields[0].name
            )));
        }

        let mut seen = BTreeSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(invalid("field names cannot be empty".to_string()));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(invalid(format!("duplicate field '{}'", field.name)));
            }
        }

        for (record_name, record) in [("example", &self.example), ("sentinel", &self.sentinel)] {
            if let Some(unknown) = record.keys().find(|k| !seen.contains(k.as_str())) {
                return Err(invalid(format!(
                    "{} uses undeclared field '{}'",
                    record_name, unknown
                )));
            }
            if record.get(TITLE_FIELD).map_or(true, |t| t.is_empty()) {
                return Err(invalid(format!("{} must have a title", record_name)));
            }
        }

        Ok(())
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Bullet list of fields and their meaning for the prompt
    pub fn to_field_instructions(&self) -> String {
        self.fields
            .iter()
            .map(|f| format!("- \"{}\": {}\n", f.name, f.description))
            .collect()
    }

    /// Sentinel as a full record, with every declared field present
    pub fn sentinel_item(&self) -> ExtractedItem {
        let mut item = ExtractedItem::new();
        for name in self.field_names() {
            item.set(name, self.sentinel.get(name).cloned().unwrap_or_default());
        }
        item
    }

    pub fn example_json(&self) -> String {
        serde_json::to_string(&[&self.example]).unwrap_or_default()
    }

    pub fn sentinel_json(&self) -> String {
        serde_json::to_string(&[&self.sentinel]).unwrap_or_default()
    }

    pub fn sentinel_title(&self) -> &str {
        self.sentinel
            .get(TITLE_FIELD)
            .map(String::as_str)
            .unwrap_or_default()
    }
}
