//! D-Bus messages and their header fields.

use core::fmt;
use std::num::NonZeroU32;

use crate::error::{ErrorKind, Result};
use crate::proto::{Flags, HeaderField, MessageType};
use crate::value::Value;
use crate::{ObjectPath, Signature};

/// A borrowed view over the identifying header fields of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageKind<'a> {
    /// Method call. This message type may prompt a reply.
    MethodCall {
        /// The path being called.
        path: &'a str,
        /// The member being called.
        member: &'a str,
    },
    /// Method reply with returned data.
    MethodReturn {
        /// The serial this is a reply to.
        reply_serial: NonZeroU32,
    },
    /// Error reply. If the first argument exists and is a string, it is an
    /// error message.
    Error {
        /// The name of the error.
        error_name: &'a str,
        /// The serial this is a reply to.
        reply_serial: NonZeroU32,
    },
    /// Signal emission.
    Signal {
        /// The path the signal is emitted from.
        path: &'a str,
        /// The interface the signal belongs to.
        interface: &'a str,
        /// The member being signalled.
        member: &'a str,
    },
}

/// A single D-Bus message.
///
/// A message is its type, flags, serial, a mapping from header field codes
/// to values, and a typed body. Which header fields are required depends on
/// the message type and is enforced by [`Message::validate`] before a
/// message is put on the wire and after one is taken off it.
///
/// # Examples
///
/// ```
/// use tokio_dbus_client::{Message, ObjectPath};
///
/// let m = Message::method_call(ObjectPath::new("/org/freedesktop/DBus")?, "GetId")
///     .with_interface("org.freedesktop.DBus")
///     .with_destination("org.freedesktop.DBus");
///
/// assert_eq!(m.member(), Some("GetId"));
/// # Ok::<_, tokio_dbus_client::ObjectPathError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub(crate) message_type: MessageType,
    pub(crate) flags: Flags,
    pub(crate) serial: Option<NonZeroU32>,
    pub(crate) fields: Vec<(HeaderField, Value)>,
    pub(crate) body: Vec<Value>,
}

impl Message {
    fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            flags: Flags::EMPTY,
            serial: None,
            fields: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Construct a method call message.
    pub fn method_call(path: ObjectPath, member: &str) -> Self {
        let mut m = Self::new(MessageType::METHOD_CALL);
        m.set_field(HeaderField::PATH, Value::ObjectPath(path));
        m.set_field(HeaderField::MEMBER, Value::String(member.into()));
        m
    }

    /// Construct a method return message replying to the given serial.
    pub fn method_return(reply_serial: NonZeroU32) -> Self {
        let mut m = Self::new(MessageType::METHOD_RETURN);
        m.set_field(
            HeaderField::REPLY_SERIAL,
            Value::Uint32(reply_serial.get()),
        );
        m
    }

    /// Construct an error message replying to the given serial.
    pub fn error(error_name: &str, reply_serial: NonZeroU32) -> Self {
        let mut m = Self::new(MessageType::ERROR);
        m.set_field(HeaderField::ERROR_NAME, Value::String(error_name.into()));
        m.set_field(
            HeaderField::REPLY_SERIAL,
            Value::Uint32(reply_serial.get()),
        );
        m
    }

    /// Construct a signal message.
    pub fn signal(path: ObjectPath, interface: &str, member: &str) -> Self {
        let mut m = Self::new(MessageType::SIGNAL);
        m.set_field(HeaderField::PATH, Value::ObjectPath(path));
        m.set_field(HeaderField::INTERFACE, Value::String(interface.into()));
        m.set_field(HeaderField::MEMBER, Value::String(member.into()));
        m
    }

    /// Construct a method return replying to this message, addressed back
    /// to its sender.
    ///
    /// # Errors
    ///
    /// Errors if this message carries no serial to reply to.
    pub fn reply(&self) -> Result<Message> {
        let Some(serial) = self.serial else {
            return Err(ErrorKind::ZeroReplySerial.into());
        };

        let mut m = Message::method_return(serial);

        if let Some(sender) = self.sender() {
            m.set_field(HeaderField::DESTINATION, Value::String(sender.into()));
        }

        Ok(m)
    }

    /// Construct an error replying to this message, addressed back to its
    /// sender, with the human readable text as the body.
    ///
    /// # Errors
    ///
    /// Errors if this message carries no serial to reply to.
    pub fn error_reply(&self, error_name: &str, message: &str) -> Result<Message> {
        let Some(serial) = self.serial else {
            return Err(ErrorKind::ZeroReplySerial.into());
        };

        let mut m = Message::error(error_name, serial);

        if let Some(sender) = self.sender() {
            m.set_field(HeaderField::DESTINATION, Value::String(sender.into()));
        }

        Ok(m.with_body(vec![Value::String(message.into())]))
    }

    /// Set the interface of the message.
    #[must_use]
    pub fn with_interface(mut self, interface: &str) -> Self {
        self.set_field(HeaderField::INTERFACE, Value::String(interface.into()));
        self
    }

    /// Set the destination of the message.
    #[must_use]
    pub fn with_destination(mut self, destination: &str) -> Self {
        self.set_field(HeaderField::DESTINATION, Value::String(destination.into()));
        self
    }

    /// Set the sender of the message.
    #[must_use]
    pub fn with_sender(mut self, sender: &str) -> Self {
        self.set_field(HeaderField::SENDER, Value::String(sender.into()));
        self
    }

    /// Set the flags of the message.
    #[must_use]
    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the body of the message.
    ///
    /// The signature header is kept in sync with the body.
    #[must_use]
    pub fn with_body(mut self, body: Vec<Value>) -> Self {
        self.body = body;
        let signature = self.body_signature();

        if signature.is_empty() {
            self.remove_field(HeaderField::SIGNATURE);
        } else {
            self.set_field(HeaderField::SIGNATURE, Value::Signature(signature));
        }

        self
    }

    /// Set the serial of the message.
    #[must_use]
    pub(crate) fn with_serial(mut self, serial: NonZeroU32) -> Self {
        self.serial = Some(serial);
        self
    }

    /// The type of the message.
    #[inline]
    pub(crate) fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// The flags of the message.
    #[inline]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// The serial of the message, if one has been assigned.
    #[inline]
    pub fn serial(&self) -> Option<NonZeroU32> {
        self.serial
    }

    /// The body of the message.
    #[inline]
    pub fn body(&self) -> &[Value] {
        &self.body
    }

    /// The header fields of the message in wire order.
    #[inline]
    pub fn fields(&self) -> &[(HeaderField, Value)] {
        &self.fields
    }

    /// The signature describing the body.
    pub fn body_signature(&self) -> Signature {
        let types = self
            .body
            .iter()
            .map(Value::complete_type)
            .collect::<Vec<_>>();

        Signature::from_types(&types)
    }

    /// Look up a header field by code.
    pub fn field(&self, field: HeaderField) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(code, _)| *code == field)
            .map(|(_, value)| value)
    }

    /// Remove a header field by code.
    pub(crate) fn remove_field(&mut self, field: HeaderField) {
        self.fields.retain(|(code, _)| *code != field);
    }

    /// Set a header field, replacing any existing value for the same code.
    pub(crate) fn set_field(&mut self, field: HeaderField, value: Value) {
        if let Some(existing) = self
            .fields
            .iter_mut()
            .find(|(code, _)| *code == field)
        {
            existing.1 = value;
            return;
        }

        self.fields.push((field, value));
    }

    fn string_field(&self, field: HeaderField) -> Option<&str> {
        match self.field(field)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The `PATH` header, if present.
    pub fn path(&self) -> Option<&str> {
        match self.field(HeaderField::PATH)? {
            Value::ObjectPath(path) => Some(path.as_str()),
            _ => None,
        }
    }

    /// The `INTERFACE` header, if present.
    pub fn interface(&self) -> Option<&str> {
        self.string_field(HeaderField::INTERFACE)
    }

    /// The `MEMBER` header, if present.
    pub fn member(&self) -> Option<&str> {
        self.string_field(HeaderField::MEMBER)
    }

    /// The `ERROR_NAME` header, if present.
    pub fn error_name(&self) -> Option<&str> {
        self.string_field(HeaderField::ERROR_NAME)
    }

    /// The `DESTINATION` header, if present.
    pub fn destination(&self) -> Option<&str> {
        self.string_field(HeaderField::DESTINATION)
    }

    /// The `SENDER` header, if present.
    pub fn sender(&self) -> Option<&str> {
        self.string_field(HeaderField::SENDER)
    }

    /// The `REPLY_SERIAL` header, if present.
    pub fn reply_serial(&self) -> Option<NonZeroU32> {
        match self.field(HeaderField::REPLY_SERIAL)? {
            Value::Uint32(serial) => NonZeroU32::new(*serial),
            _ => None,
        }
    }

    /// Test if the message is a method call which expects a reply.
    pub fn expects_reply(&self) -> bool {
        self.message_type == MessageType::METHOD_CALL
            && !(self.flags & Flags::NO_REPLY_EXPECTED)
    }

    /// A borrowed view over the identifying header fields, if the message
    /// carries the fields its type requires.
    pub fn kind(&self) -> Option<MessageKind<'_>> {
        let kind = match self.message_type {
            MessageType::METHOD_CALL => MessageKind::MethodCall {
                path: self.path()?,
                member: self.member()?,
            },
            MessageType::METHOD_RETURN => MessageKind::MethodReturn {
                reply_serial: self.reply_serial()?,
            },
            MessageType::ERROR => MessageKind::Error {
                error_name: self.error_name()?,
                reply_serial: self.reply_serial()?,
            },
            MessageType::SIGNAL => MessageKind::Signal {
                path: self.path()?,
                interface: self.interface()?,
                member: self.member()?,
            },
            _ => return None,
        };

        Some(kind)
    }

    /// Validate that the message carries the header fields its type
    /// requires.
    pub fn validate(&self) -> Result<()> {
        match self.message_type {
            MessageType::METHOD_CALL => {
                if self.path().is_none() {
                    return Err(ErrorKind::MissingPath.into());
                }

                if self.member().is_none() {
                    return Err(ErrorKind::MissingMember.into());
                }
            }
            MessageType::METHOD_RETURN => {
                if self.reply_serial().is_none() {
                    return Err(ErrorKind::MissingReplySerial.into());
                }
            }
            MessageType::ERROR => {
                if self.error_name().is_none() {
                    return Err(ErrorKind::MissingErrorName.into());
                }

                if self.reply_serial().is_none() {
                    return Err(ErrorKind::MissingReplySerial.into());
                }
            }
            MessageType::SIGNAL => {
                if self.path().is_none() {
                    return Err(ErrorKind::MissingPath.into());
                }

                if self.interface().is_none() {
                    return Err(ErrorKind::MissingInterface.into());
                }

                if self.member().is_none() {
                    return Err(ErrorKind::MissingMember.into());
                }
            }
            other => return Err(ErrorKind::InvalidMessageType(other.get()).into()),
        }

        Ok(())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(MessageKind::MethodCall { path, member }) => {
                write!(f, "method call {path} {member}")
            }
            Some(MessageKind::MethodReturn { reply_serial }) => {
                write!(f, "method return to {reply_serial}")
            }
            Some(MessageKind::Error {
                error_name,
                reply_serial,
            }) => write!(f, "error {error_name} to {reply_serial}"),
            Some(MessageKind::Signal { member, .. }) => write!(f, "signal {member}"),
            None => write!(f, "incomplete {:?} message", self.message_type),
        }
    }
}
