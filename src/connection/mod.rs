//! The connection controller: transport lifecycle, SASL, reconnection,
//! health checks, correlation and dispatch.

#[cfg(test)]
mod tests;

pub use self::builder::{AuthMechanism, ConnectionBuilder};
mod builder;

pub use self::connection::Connection;
mod connection;

pub use self::handle::ConnectionHandle;
pub(crate) use self::handle::Command;
mod handle;

pub(crate) use self::serial::SerialCounter;
mod serial;

mod transport;

mod driver;

/// The lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionState {
    /// No transport is open.
    Disconnected,
    /// The transport is being opened.
    Connecting,
    /// The SASL dialogue is in progress.
    Authenticating,
    /// Authenticated; the `Hello()` exchange is in progress.
    Connected,
    /// The unique bus name is held and requests can be sent.
    Ready,
    /// The connection was lost and a new attempt is pending.
    Reconnecting,
    /// Terminally failed.
    Failed,
    /// Closed by the user.
    Closed,
}

/// A lifecycle event published to [`ConnectionEventListener`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionEvent {
    /// A connection attempt started.
    Connecting,
    /// Authentication completed.
    Connected,
    /// The connection is ready for requests.
    Ready,
    /// The connection was lost or closed.
    Disconnected,
    /// A reconnection attempt is pending.
    Reconnecting,
    /// A reconnection attempt succeeded.
    Reconnected,
    /// The connection failed terminally.
    Failed,
}

/// An observer of connection lifecycle events.
///
/// Listeners are registered on the [`ConnectionBuilder`] and invoked from
/// the connection driver; callbacks must not block.
pub trait ConnectionEventListener: Send + Sync + 'static {
    /// A lifecycle event occurred.
    fn on_event(&self, event: ConnectionEvent);
}

impl<F> ConnectionEventListener for F
where
    F: Fn(ConnectionEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: ConnectionEvent) {
        self(event)
    }
}
