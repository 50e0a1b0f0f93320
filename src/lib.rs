//! An asynchronous client-side D-Bus connection engine for the Tokio
//! ecosystem.
//!
//! The crate speaks the D-Bus wire protocol over Unix domain sockets or
//! TCP, authenticates via SASL (EXTERNAL, DBUS_COOKIE_SHA1, ANONYMOUS),
//! marshals typed messages in either endianness, and dispatches them
//! through an ordered bidirectional handler [`Pipeline`] with
//! request/response correlation, automatic reconnection and health
//! monitoring.
//!
//! # Examples
//!
//! ```no_run
//! use tokio_dbus_client::{ConnectionBuilder, Message, ObjectPath};
//!
//! # #[tokio::main] async fn main() -> tokio_dbus_client::Result<()> {
//! let connection = ConnectionBuilder::new().session_bus().connect().await?;
//!
//! let call = Message::method_call(ObjectPath::new("/org/freedesktop/DBus")?, "ListNames")
//!     .with_interface("org.freedesktop.DBus")
//!     .with_destination("org.freedesktop.DBus");
//!
//! let reply = connection.send_request(call).await?;
//! println!("{:?}", reply.body());
//! connection.close().await;
//! # Ok(()) }
//! ```

#![deny(missing_docs)]
#![allow(clippy::module_inception)]

#[macro_use]
mod macros;

#[doc(inline)]
pub use self::proto::{Endianness, Flags, HeaderField};
mod proto;

pub mod org_freedesktop_dbus;

#[doc(inline)]
pub use self::error::{Error, Result};
mod error;

#[doc(inline)]
pub use self::signature::{CompleteType, Signature, SignatureError};
mod signature;

#[doc(inline)]
pub use self::object_path::{ObjectPath, ObjectPathError};
mod object_path;

#[doc(inline)]
pub use self::value::{Array, Value};
mod value;

pub(crate) mod codec;

mod frame;

#[doc(inline)]
pub use self::message::{Message, MessageKind};
mod message;

mod sasl;

#[doc(inline)]
pub use self::pipeline::{Handler, HandlerContext, Pipeline, UserEvent};
mod pipeline;

#[doc(inline)]
pub use self::connection::{
    AuthMechanism, Connection, ConnectionBuilder, ConnectionEvent, ConnectionEventListener,
    ConnectionHandle, ConnectionState,
};
mod connection;

#[doc(inline)]
pub use self::service::{
    ArgDescriptor, InterfaceDescriptor, MethodCallback, MethodDescriptor, MethodError,
    ObjectDescriptor, PropertyAccess, PropertyDescriptor, PropertyGetter, PropertySetter,
    ServiceHandler, SignalDescriptor,
};
mod service;
