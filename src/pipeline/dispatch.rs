//! Traversal of a pipeline snapshot by the connection driver.

use tracing::debug;

use crate::connection::ConnectionHandle;
use crate::error::Result;
use crate::message::Message;
use crate::Error;

use super::{Entry, UserEvent};

/// Drive an inbound message head to tail.
///
/// Returns the message if no handler consumed it, for the tail fallback. A
/// handler error is converted into an inbound failure offered to the
/// remaining handlers; a failure nobody recovers is returned.
pub(crate) async fn dispatch_inbound(
    entries: &[Entry],
    handle: &ConnectionHandle,
    mut message: Message,
) -> Result<Option<Message>, Error> {
    let mut iter = entries.iter();

    while let Some(entry) = iter.next() {
        let ctx = entry.context(handle);

        match entry.handler.on_inbound_message(&ctx, message).await {
            Ok(Some(next)) => message = next,
            Ok(None) => return Ok(None),
            Err(error) => {
                let mut failure = error;

                for entry in iter.by_ref() {
                    let ctx = entry.context(handle);

                    match entry.handler.on_inbound_failure(&ctx, failure).await {
                        Some(next) => failure = next,
                        None => return Ok(None),
                    }
                }

                return Err(failure);
            }
        }
    }

    Ok(Some(message))
}

/// Drive an outbound message tail to head.
///
/// Returns the message to put on the wire, or `None` if a handler consumed
/// it. A handler error fails the write.
pub(crate) async fn dispatch_outbound(
    entries: &[Entry],
    handle: &ConnectionHandle,
    mut message: Message,
) -> Result<Option<Message>> {
    for entry in entries.iter().rev() {
        let ctx = entry.context(handle);

        match entry.handler.on_outbound_message(&ctx, message).await? {
            Some(next) => message = next,
            None => return Ok(None),
        }
    }

    Ok(Some(message))
}

/// Announce connection activation head to tail.
pub(crate) async fn dispatch_active(entries: &[Entry], handle: &ConnectionHandle) {
    for entry in entries {
        let ctx = entry.context(handle);
        entry.handler.on_connection_active(&ctx).await;
    }
}

/// Announce connection deactivation head to tail.
pub(crate) async fn dispatch_inactive(entries: &[Entry], handle: &ConnectionHandle) {
    for entry in entries {
        let ctx = entry.context(handle);
        entry.handler.on_connection_inactive(&ctx).await;
    }
}

/// Drive a user event head to tail.
pub(crate) async fn dispatch_user_event(
    entries: &[Entry],
    handle: &ConnectionHandle,
    mut event: UserEvent,
) {
    for entry in entries {
        let ctx = entry.context(handle);

        match entry.handler.on_user_event(&ctx, event).await {
            Some(next) => event = next,
            None => return,
        }
    }

    debug!(?event, "user event reached the tail unhandled");
}
