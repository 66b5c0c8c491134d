//! Error types for the schema registry, query planner, and response
//! accumulator. Each variant carries the stable wire code from `spec.md`
//! §7; callers must not re-derive or renumber these strings.

use thiserror::Error;

/// Failures raised by the schema registry, planner, or accumulator.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no active unified schema is loaded")]
    SchemaUnavailable,

    #[error("failed to parse unified schema: {0}")]
    SchemaParseError(String),

    #[error("field not found in active schema: {path}")]
    SchemaFieldNotFound { path: String },

    #[error("query document declares more than one operation")]
    MultipleOperations,

    /// A syntactically malformed query document. Not named in `spec.md`
    /// §7's taxonomy, which enumerates planner-rejection codes assuming a
    /// well-formed document; this falls back to the taxonomy's
    /// designated catch-all.
    #[error("failed to parse query document: {0}")]
    QueryParseError(String),

    #[error("argument references variable `{name}` with no matching variable definition")]
    UnboundVariable { name: String },

    #[error("provider `{provider_key}` value at `{provider_field}` does not match the schema-declared type for `{selection_path}`")]
    AccumulationTypeMismatch {
        provider_key: String,
        provider_field: String,
        selection_path: String,
    },
}

impl Error {
    /// The stable `extensions.code` string for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            Error::SchemaUnavailable => "SCHEMA_UNAVAILABLE",
            Error::SchemaParseError(_) => "SCHEMA_PARSE_ERROR",
            Error::SchemaFieldNotFound { .. } => "SCHEMA_FIELD_NOT_FOUND",
            Error::MultipleOperations => "MULTIPLE_OPERATIONS",
            Error::QueryParseError(_) => "INTERNAL_ERROR",
            Error::UnboundVariable { .. } => "UNBOUND_VARIABLE",
            Error::AccumulationTypeMismatch { .. } => "ACCUMULATION_TYPE_MISMATCH",
        }
    }
}
