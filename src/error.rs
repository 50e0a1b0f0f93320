use std::io;
use std::str::Utf8Error;

use thiserror::Error;

use crate::org_freedesktop_dbus::error_name;
use crate::{ObjectPathError, SignatureError};

/// Result alias using an [`Error`] as the error type by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error raised by this crate.
///
/// Errors which originate from an `ERROR` reply on the wire preserve the
/// D-Bus error name, available through [`Error::name`]. Local failures
/// which correspond to a standard error name report that name as well.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    #[inline]
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self { kind }
    }

    /// Construct an error from an `ERROR` reply received on the wire.
    pub(crate) fn from_reply(name: &str, message: Option<&str>) -> Self {
        Self::new(ErrorKind::Reply {
            name: name.into(),
            message: message.map(Box::from),
        })
    }

    #[inline]
    pub(crate) fn signature_mismatch(
        expected: &dyn core::fmt::Display,
        actual: &dyn core::fmt::Display,
    ) -> Self {
        Self::new(ErrorKind::SignatureMismatch {
            expected: expected.to_string().into(),
            actual: actual.to_string().into(),
        })
    }

    #[inline]
    pub(crate) fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// The D-Bus error name associated with this error, if any.
    ///
    /// For errors received over the wire this is the name from the
    /// `ERROR_NAME` header. Local failures with a standard equivalent
    /// (timeouts, disconnects, authentication failures) report the
    /// corresponding `org.freedesktop.DBus.Error` name.
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            ErrorKind::Reply { name, .. } => Some(name),
            ErrorKind::Timeout => Some(error_name::TIMEOUT),
            ErrorKind::ConnectTimeout => Some(error_name::TIMEOUT),
            ErrorKind::Disconnected | ErrorKind::Closed => Some(error_name::DISCONNECTED),
            ErrorKind::AuthFailed(..) => Some(error_name::AUTH_FAILED),
            ErrorKind::SignatureMismatch { .. } => Some(error_name::INVALID_SIGNATURE),
            ErrorKind::InconsistentMessage => Some(error_name::INCONSISTENT_MESSAGE),
            ErrorKind::InvalidAddress(..) => Some(error_name::BAD_ADDRESS),
            ErrorKind::ArrayTooLong(..) | ErrorKind::MessageTooLong(..) => {
                Some(error_name::LIMITS_EXCEEDED)
            }
            _ => None,
        }
    }

    /// The human readable message carried by an `ERROR` reply, if any.
    pub fn message(&self) -> Option<&str> {
        match &self.kind {
            ErrorKind::Reply { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    /// Test if the error is a method call timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout | ErrorKind::ConnectTimeout)
    }

    /// Test if the error indicates the connection was lost while waiting.
    pub fn is_disconnected(&self) -> bool {
        matches!(self.kind, ErrorKind::Disconnected)
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(error: io::Error) -> Self {
        Self::new(ErrorKind::Io(error))
    }
}

impl From<SignatureError> for Error {
    #[inline]
    fn from(error: SignatureError) -> Self {
        Self::new(ErrorKind::Signature(error))
    }
}

impl From<ObjectPathError> for Error {
    #[inline]
    fn from(error: ObjectPathError) -> Self {
        Self::new(ErrorKind::ObjectPath(error))
    }
}

impl From<Utf8Error> for Error {
    #[inline]
    fn from(error: Utf8Error) -> Self {
        Self::new(ErrorKind::Utf8(error))
    }
}

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

#[derive(Debug, Error)]
pub(crate) enum ErrorKind {
    #[error("I/O error")]
    Io(#[source] io::Error),
    #[error(transparent)]
    Signature(SignatureError),
    #[error(transparent)]
    ObjectPath(ObjectPathError),
    #[error("string is not valid UTF-8")]
    Utf8(#[source] Utf8Error),
    #[error("buffer underflow while decoding")]
    BufferUnderflow,
    #[error("string is not null terminated")]
    NotNullTerminated,
    #[error("boolean wire value {0} is neither 0 nor 1")]
    InvalidBoolean(u32),
    #[error("array of length {0} is too long (max is 67108864)")]
    ArrayTooLong(u32),
    #[error("message of length {0} is too long (max is 134217728)")]
    MessageTooLong(usize),
    #[error("unsupported protocol version {0}")]
    InvalidProtocolVersion(u8),
    #[error("invalid endianness marker {0}")]
    InvalidEndianness(u8),
    #[error("invalid message type {0}")]
    InvalidMessageType(u8),
    #[error("zero in header serial")]
    ZeroSerial,
    #[error("zero REPLY_SERIAL header")]
    ZeroReplySerial,
    #[error("variant signature {0:?} is not a single complete type")]
    InvalidVariant(Box<str>),
    #[error("body does not match signature: expected {expected:?}, got {actual:?}")]
    SignatureMismatch {
        expected: Box<str>,
        actual: Box<str>,
    },
    #[error("message body is inconsistent with its signature header")]
    InconsistentMessage,
    #[error("missing required PATH header")]
    MissingPath,
    #[error("missing required MEMBER header")]
    MissingMember,
    #[error("missing required INTERFACE header")]
    MissingInterface,
    #[error("missing required REPLY_SERIAL header")]
    MissingReplySerial,
    #[error("missing required ERROR_NAME header")]
    MissingErrorName,
    #[error("a handler named {0:?} is already registered")]
    DuplicateHandler(Box<str>),
    #[error("no handler named {0:?} is registered")]
    UnknownHandler(Box<str>),
    #[error("missing bus to connect to")]
    MissingBus,
    #[error("invalid d-bus address {0:?}")]
    InvalidAddress(Box<str>),
    #[error("SASL line is longer than 2048 bytes")]
    SaslLineTooLong,
    #[error("invalid SASL message")]
    InvalidSasl,
    #[error("authentication failed: {0}")]
    AuthFailed(Box<str>),
    #[error("connecting timed out")]
    ConnectTimeout,
    #[error("method call timed out")]
    Timeout,
    #[error("connection lost while waiting")]
    Disconnected,
    #[error("connection closed")]
    Closed,
    #[error("connection is not established")]
    NotConnected,
    #[error("{name}: {}", .message.as_deref().unwrap_or("unknown error"))]
    Reply {
        name: Box<str>,
        message: Option<Box<str>>,
    },
}
