use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Storage I/O failed for key {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode {schema}: {source}")]
    Encode {
        schema: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode {schema}: {source}")]
    Decode {
        schema: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported {schema} version {found} (this build reads up to {supported})")]
    UnsupportedVersion {
        schema: &'static str,
        found: u32,
        supported: u32,
    },

    #[error("Schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch {
        expected: &'static str,
        found: String,
    },

    #[error("Invalid {schema} data: {reason}")]
    Invalid { schema: &'static str, reason: String },

    #[error("Invalid storage key: {0:?}")]
    InvalidKey(String),
}

impl PersistenceError {
    pub(crate) fn invalid(schema: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            schema,
            reason: reason.into(),
        }
    }
}
