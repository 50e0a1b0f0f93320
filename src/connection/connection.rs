use core::fmt;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, watch};

use crate::error::{ErrorKind, Result};
use crate::message::Message;
use crate::pipeline::Pipeline;

use super::driver::{self, DriverSetup};
use super::handle::{Command, ConnectionHandle};
use super::ConnectionState;

/// A client connection to a D-Bus server.
///
/// Constructed through a [`ConnectionBuilder`]. The connection owns one
/// transport, one serial counter, one pipeline and one pending-reply table;
/// dropping it or calling [`close`] releases everything and fails pending
/// replies with a disconnect error.
///
/// [`ConnectionBuilder`]: crate::ConnectionBuilder
/// [`close`]: Connection::close
///
/// # Examples
///
/// ```no_run
/// use tokio_dbus_client::{ConnectionBuilder, Message, ObjectPath};
///
/// # async fn example() -> tokio_dbus_client::Result<()> {
/// let connection = ConnectionBuilder::new().session_bus().connect().await?;
///
/// let call = Message::method_call(ObjectPath::new("/org/freedesktop/DBus")?, "GetId")
///     .with_interface("org.freedesktop.DBus")
///     .with_destination("org.freedesktop.DBus");
///
/// let reply = connection.send_request(call).await?;
/// println!("{:?}", reply.body());
/// # Ok(()) }
/// ```
pub struct Connection {
    handle: ConnectionHandle,
    pipeline: Arc<Pipeline>,
    state: watch::Receiver<ConnectionState>,
    unique_name: watch::Receiver<Option<String>>,
    launch: Mutex<Launch>,
}

struct Launch {
    setup: Option<DriverSetup>,
    ready: Option<oneshot::Receiver<Result<()>>>,
}

impl Connection {
    pub(crate) fn new(
        handle: ConnectionHandle,
        pipeline: Arc<Pipeline>,
        state: watch::Receiver<ConnectionState>,
        unique_name: watch::Receiver<Option<String>>,
        setup: DriverSetup,
        ready: oneshot::Receiver<Result<()>>,
    ) -> Self {
        Self {
            handle,
            pipeline,
            state,
            unique_name,
            launch: Mutex::new(Launch {
                setup: Some(setup),
                ready: Some(ready),
            }),
        }
    }

    /// Connect to the bus: open the transport, authenticate, acquire the
    /// unique name and transition to `Ready`.
    ///
    /// The first call drives the connection; subsequent calls await
    /// readiness.
    pub async fn connect(&self) -> Result<()> {
        let (setup, ready) = {
            let mut launch = self.launch.lock().expect("launch lock poisoned");
            (launch.setup.take(), launch.ready.take())
        };

        if let Some(setup) = setup {
            tokio::spawn(driver::run(setup));
        }

        if let Some(ready) = ready {
            return match ready.await {
                Ok(result) => result,
                Err(..) => Err(ErrorKind::Closed.into()),
            };
        }

        // Another caller started the driver; follow the state.
        let mut state = self.state.clone();

        loop {
            match *state.borrow_and_update() {
                ConnectionState::Ready => return Ok(()),
                ConnectionState::Failed => return Err(ErrorKind::NotConnected.into()),
                ConnectionState::Closed => return Err(ErrorKind::Closed.into()),
                _ => {}
            }

            if state.changed().await.is_err() {
                return Err(ErrorKind::Closed.into());
            }
        }
    }

    /// Test if the connection is ready for requests.
    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Ready
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// The unique bus name acquired by `Hello()`, if connected.
    pub fn unique_name(&self) -> Option<String> {
        self.unique_name.borrow().clone()
    }

    /// Allocate the next message serial.
    pub fn next_serial(&self) -> NonZeroU32 {
        self.handle.next_serial()
    }

    /// The pipeline attached to this connection.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// A cheap handle usable from pipeline handlers and other tasks.
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Send a method call and await its reply.
    ///
    /// A serial is allocated if the message does not carry one. The future
    /// fails with a timeout error after the configured method call
    /// timeout, and with a disconnect error if the connection is lost
    /// while waiting. An `ERROR` reply fails the future with the D-Bus
    /// error name preserved.
    pub async fn send_request(&self, message: Message) -> Result<Message> {
        let message = self.handle.stamp(message);
        let (reply_tx, reply_rx) = oneshot::channel();

        self.handle.command(Command::Call {
            message,
            reply: reply_tx,
        })?;

        match reply_rx.await {
            Ok(result) => result,
            Err(..) => Err(ErrorKind::Disconnected.into()),
        }
    }

    /// Send a message without expecting a reply.
    ///
    /// The returned future resolves once the bytes are committed to the
    /// transport.
    pub async fn send_and_forget(&self, message: Message) -> Result<()> {
        let message = self.handle.stamp(message);
        let (completion_tx, completion_rx) = oneshot::channel();

        self.handle.command(Command::Send {
            message,
            completion: Some(completion_tx),
        })?;

        match completion_rx.await {
            Ok(result) => result,
            Err(..) => Err(ErrorKind::Disconnected.into()),
        }
    }

    /// Close the connection.
    ///
    /// Stops accepting requests, flushes queued writes up to the shutdown
    /// grace, closes the transport and fails every pending reply with a
    /// disconnect error. Close is final.
    pub async fn close(&self) {
        let (done_tx, done_rx) = oneshot::channel();

        if self.handle.command(Command::Close { done: done_tx }).is_ok() {
            let _ = done_rx.await;
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
