pub mod defaults;
pub mod types;

pub use defaults::load_builtin_schema;
pub use types::{ExtractedItem, ExtractionKind, ExtractionSchema, FieldSpec, SchemaError, TITLE_FIELD};
