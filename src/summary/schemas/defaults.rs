/// Extraction schemas bundled into the binary at compile time
use super::types::{ExtractionKind, ExtractionSchema, SchemaError};

pub const ACTION_ITEMS: &str = include_str!("../../../schemas/action_items.json");

pub const DECISIONS: &str = include_str!("../../../schemas/decisions.json");

/// Raw JSON for the built-in schema of `kind`
pub fn builtin_schema_json(kind: ExtractionKind) -> &'static str {
    match kind {
        ExtractionKind::ActionItems => ACTION_ITEMS,
        ExtractionKind::Decisions => DECISIONS,
    }
}

/// Parses and validates the built-in schema of `kind`
pub fn load_builtin_schema(kind: ExtractionKind) -> Result<ExtractionSchema, SchemaError> {
    let schema = ExtractionSchema::from_json(kind.id(), builtin_schema_json(kind))?;
    if schema.kind != kind {
        return Err(SchemaError::Invalid {
            id: kind.id().to_string(),
            reason: format!("declares kind '{}'", schema.kind),
        });
    }
    Ok(schema)
}
