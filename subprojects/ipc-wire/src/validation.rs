//! Wire-level validation failures.
//!
//! Kept as a real enum rather than bare strings so internal `match`es stay
//! exhaustiveness-checked, but `Display` renders the exact
//! `VALIDATION_ERROR_*` token each variant stands for, since that token is
//! the part of the contract callers outside this crate actually compare
//! against.

/// One of the archive format's defined validation failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorCode {
    DifferentSizedArraysInMap,
    IllegalHandle,
    IllegalMemoryRange,
    IllegalPointer,
    MessageHeaderInvalidFlags,
    MessageHeaderMissingRequestId,
    MessageHeaderUnknownMethod,
    MisalignedObject,
    UnexpectedArrayHeader,
    UnexpectedInvalidHandle,
    UnexpectedNullPointer,
    UnexpectedNullUnion,
    UnexpectedStructHeader,
}

impl ValidationErrorCode {
    /// The exact `VALIDATION_ERROR_*` token for this code.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DifferentSizedArraysInMap => "VALIDATION_ERROR_DIFFERENT_SIZED_ARRAYS_IN_MAP",
            Self::IllegalHandle => "VALIDATION_ERROR_ILLEGAL_HANDLE",
            Self::IllegalMemoryRange => "VALIDATION_ERROR_ILLEGAL_MEMORY_RANGE",
            Self::IllegalPointer => "VALIDATION_ERROR_ILLEGAL_POINTER",
            Self::MessageHeaderInvalidFlags => "VALIDATION_ERROR_MESSAGE_HEADER_INVALID_FLAGS",
            Self::MessageHeaderMissingRequestId => "VALIDATION_ERROR_MESSAGE_HEADER_MISSING_REQUEST_ID",
            Self::MessageHeaderUnknownMethod => "VALIDATION_ERROR_MESSAGE_HEADER_UNKNOWN_METHOD",
            Self::MisalignedObject => "VALIDATION_ERROR_MISALIGNED_OBJECT",
            Self::UnexpectedArrayHeader => "VALIDATION_ERROR_UNEXPECTED_ARRAY_HEADER",
            Self::UnexpectedInvalidHandle => "VALIDATION_ERROR_UNEXPECTED_INVALID_HANDLE",
            Self::UnexpectedNullPointer => "VALIDATION_ERROR_UNEXPECTED_NULL_POINTER",
            Self::UnexpectedNullUnion => "VALIDATION_ERROR_UNEXPECTED_NULL_UNION",
            Self::UnexpectedStructHeader => "VALIDATION_ERROR_UNEXPECTED_STRUCT_HEADER",
        }
    }
}

impl std::fmt::Display for ValidationErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message or value failed to decode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ValidationError {
    pub code: ValidationErrorCode,
    pub message: String,
}

impl ValidationError {
    pub fn new(code: ValidationErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Internal encode/decode failures that aren't wire-format validation
/// errors: a caller-side contract violation (writing past a declared
/// element count, finishing with the frame stack unbalanced).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("empty encoding state stack")]
    EmptyStateStack,
    #[error("buffer size limit exceeded")]
    LimitExceeded,
    #[error("can't process more elements than declared in header ({declared})")]
    TooManyElements { declared: u32 },
    #[error("unexpected element count: declared {declared}, processed {processed}")]
    ElementCountMismatch { declared: u32, processed: u32 },
    #[error("can't produce data while the encoder state stack is non-empty")]
    UnfinishedValue,
    #[error(transparent)]
    Validation(#[from] ValidationError),
}
