use thiserror::Error;

/// An error raised when validation of a [`Signature`] fails.
///
/// [`Signature`]: crate::Signature
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}")]
pub struct SignatureError {
    pub(crate) kind: SignatureErrorKind,
}

impl SignatureError {
    #[inline]
    pub(crate) fn new(kind: SignatureErrorKind) -> Self {
        Self { kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum SignatureErrorKind {
    #[error("unknown type code {0}")]
    UnknownTypeCode(u8),
    #[error("signature is longer than 255 bytes")]
    SignatureTooLong,
    #[error("array is missing an element type")]
    MissingArrayElementType,
    #[error("struct ended but was not started")]
    StructEndedButNotStarted,
    #[error("dict entry ended but was not started")]
    DictEndedButNotStarted,
    #[error("struct started but was not ended")]
    StructStartedButNotEnded,
    #[error("dict entry started but was not ended")]
    DictStartedButNotEnded,
    #[error("struct has no fields")]
    StructHasNoFields,
    #[error("dict entry key must be a basic type")]
    DictKeyMustBeBasicType,
    #[error("dict entry has no fields")]
    DictEntryHasNoFields,
    #[error("dict entry has only one field")]
    DictEntryHasOnlyOneField,
    #[error("dict entry has too many fields")]
    DictEntryHasTooManyFields,
    #[error("dict entry must be an array element")]
    DictEntryNotInsideArray,
    #[error("exceeded maximum array nesting depth")]
    ExceededMaximumArrayRecursion,
    #[error("exceeded maximum struct nesting depth")]
    ExceededMaximumStructRecursion,
}
