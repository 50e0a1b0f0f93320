//! D-Bus type signatures.
//!
//! A [`Signature`] is a validated sequence of type codes. Parsing a
//! signature produces a tree of [`CompleteType`] values which drives the
//! codec.

#[cfg(test)]
mod tests;

pub use self::complete_type::CompleteType;
mod complete_type;

pub use self::signature::Signature;
mod signature;

pub use self::signature_error::SignatureError;
pub(crate) use self::signature_error::SignatureErrorKind;
mod signature_error;

pub(crate) use self::parse::parse;
mod parse;

/// The maximum length in bytes of a signature.
pub(crate) const MAX_SIGNATURE: usize = 255;

/// The maximum nesting depth of arrays and of structs, each counted
/// separately.
pub(crate) const MAX_CONTAINER_DEPTH: usize = 32;
