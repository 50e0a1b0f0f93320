use core::fmt;
use std::num::NonZeroU32;

use tokio::sync::{mpsc, oneshot};

use crate::error::{ErrorKind, Result};
use crate::message::Message;

use super::SerialCounter;

/// Work submitted to the connection driver.
pub(crate) enum Command {
    /// Write a message to the transport.
    Send {
        message: Message,
        /// Resolved once the bytes are committed to the transport.
        completion: Option<oneshot::Sender<Result<()>>>,
    },
    /// Write a method call and correlate its reply.
    Call {
        message: Message,
        reply: oneshot::Sender<Result<Message>>,
    },
    /// Shut the connection down.
    Close { done: oneshot::Sender<()> },
}

/// A cheap handle onto a connection.
///
/// The handle enqueues work onto the connection driver without waiting for
/// it, which makes it safe to use from inside pipeline handlers.
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    serials: SerialCounter,
}

impl ConnectionHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<Command>,
        serials: SerialCounter,
    ) -> Self {
        Self { commands, serials }
    }

    /// Allocate the next message serial on this connection.
    pub fn next_serial(&self) -> NonZeroU32 {
        self.serials.next()
    }

    pub(crate) fn serials(&self) -> &SerialCounter {
        &self.serials
    }

    /// Enqueue a message for sending without waiting for the write.
    ///
    /// A serial is allocated if the message does not carry one.
    ///
    /// # Errors
    ///
    /// Errors if the connection has been closed.
    pub fn send(&self, message: Message) -> Result<()> {
        let message = self.stamp(message);

        self.command(Command::Send {
            message,
            completion: None,
        })
    }

    /// Assign a serial if the message has none.
    pub(crate) fn stamp(&self, message: Message) -> Message {
        if message.serial().is_some() {
            return message;
        }

        let serial = self.serials.next();
        message.with_serial(serial)
    }

    pub(crate) fn command(&self, command: Command) -> Result<()> {
        if self.commands.send(command).is_err() {
            return Err(ErrorKind::Closed.into());
        }

        Ok(())
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle").finish_non_exhaustive()
    }
}
