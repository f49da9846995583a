/// Errors raised while converting records between structured, binary and
/// columnar forms, or while registering codecs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Bytes or a structured form do not match the declared schema.
    /// Local to one record: callers skip it and carry on.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// No codec is registered for the encoded type tag.
    #[error("no codec registered for type '{0}'")]
    UnknownType(String),

    /// A record was handed to a codec of another type.
    #[error("codec for '{expected}' cannot handle record of type '{actual}'")]
    TypeMismatch { expected: String, actual: String },

    /// Schema and structured-form accessors disagree. A programming error,
    /// reported when the codec is registered.
    #[error("schema mismatch for '{type_key}': {reason}")]
    SchemaMismatch { type_key: String, reason: String },

    #[error("codec for type '{0}' is already registered")]
    DuplicateType(String),
}

impl CodecError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        CodecError::MalformedPayload(msg.into())
    }

    pub fn schema_mismatch(type_key: impl Into<String>, reason: impl Into<String>) -> Self {
        CodecError::SchemaMismatch {
            type_key: type_key.into(),
            reason: reason.into(),
        }
    }

    /// Add context to the error, preserving the variant.
    ///
    /// Produces: `"context: original message"` for message-carrying variants.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            CodecError::MalformedPayload(msg) => CodecError::MalformedPayload(format!("{ctx}: {msg}")),
            CodecError::SchemaMismatch { type_key, reason } => CodecError::SchemaMismatch {
                type_key,
                reason: format!("{ctx}: {reason}"),
            },
            other => other,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, CodecError::MalformedPayload(_))
    }
}

impl From<std::str::Utf8Error> for CodecError {
    fn from(e: std::str::Utf8Error) -> Self {
        CodecError::MalformedPayload(e.to_string())
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        CodecError::MalformedPayload(e.to_string())
    }
}

impl From<arrow_schema::ArrowError> for CodecError {
    fn from(e: arrow_schema::ArrowError) -> Self {
        CodecError::MalformedPayload(format!("arrow: {e}"))
    }
}
