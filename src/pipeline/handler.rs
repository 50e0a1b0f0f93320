use core::fmt;
use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::connection::ConnectionHandle;
use crate::error::Result;
use crate::message::Message;
use crate::Error;

/// An application-level event travelling the pipeline alongside messages.
#[derive(Clone)]
#[non_exhaustive]
pub enum UserEvent {
    /// SASL authentication completed; carries the server GUID.
    SaslAuthComplete {
        /// The GUID the server reported.
        guid: String,
    },
    /// SASL authentication failed terminally.
    SaslAuthFailed,
    /// The `Hello()` exchange completed and the unique bus name was
    /// acquired.
    MandatoryNameAcquired {
        /// The unique name assigned by the bus.
        name: String,
    },
    /// An event published by user code.
    Custom(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for UserEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserEvent::SaslAuthComplete { guid } => {
                f.debug_struct("SaslAuthComplete").field("guid", guid).finish()
            }
            UserEvent::SaslAuthFailed => f.write_str("SaslAuthFailed"),
            UserEvent::MandatoryNameAcquired { name } => f
                .debug_struct("MandatoryNameAcquired")
                .field("name", name)
                .finish(),
            UserEvent::Custom(..) => f.write_str("Custom(..)"),
        }
    }
}

/// The view a handler has of its place in the pipeline.
#[derive(Clone)]
pub struct HandlerContext {
    pub(crate) name: Arc<str>,
    pub(crate) handle: ConnectionHandle,
}

impl HandlerContext {
    /// The name this handler was registered under.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A handle to the connection this pipeline belongs to.
    ///
    /// The handle enqueues work without waiting for it, so it is safe to
    /// use from inside handler callbacks.
    #[inline]
    pub fn connection(&self) -> &ConnectionHandle {
        &self.handle
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A named participant in the message pipeline.
///
/// Every method has a default implementation which propagates the event
/// unchanged. Inbound events traverse handlers head to tail, outbound
/// messages tail to head. Returning `None` from a propagating method
/// consumes the event.
///
/// A handler never observes two events concurrently and events of one
/// direction are delivered in FIFO order, but callbacks may run on any
/// runtime worker.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// An inbound message arrived from the transport side.
    async fn on_inbound_message(
        &self,
        ctx: &HandlerContext,
        message: Message,
    ) -> Result<Option<Message>> {
        let _ = ctx;
        Ok(Some(message))
    }

    /// Decoding or a preceding handler failed on the inbound path.
    ///
    /// Returning `None` marks the failure as recovered.
    async fn on_inbound_failure(&self, ctx: &HandlerContext, error: Error) -> Option<Error> {
        let _ = ctx;
        Some(error)
    }

    /// An outbound message is on its way to the transport.
    async fn on_outbound_message(
        &self,
        ctx: &HandlerContext,
        message: Message,
    ) -> Result<Option<Message>> {
        let _ = ctx;
        Ok(Some(message))
    }

    /// The connection became active (reached `READY`).
    async fn on_connection_active(&self, ctx: &HandlerContext) {
        let _ = ctx;
    }

    /// The connection became inactive.
    async fn on_connection_inactive(&self, ctx: &HandlerContext) {
        let _ = ctx;
    }

    /// A user event is travelling the pipeline.
    async fn on_user_event(&self, ctx: &HandlerContext, event: UserEvent) -> Option<UserEvent> {
        let _ = ctx;
        Some(event)
    }

    /// The handler was added to a pipeline.
    fn on_handler_added(&self, ctx: &HandlerContext) {
        let _ = ctx;
    }

    /// The handler was removed from a pipeline.
    fn on_handler_removed(&self, ctx: &HandlerContext) {
        let _ = ctx;
    }
}
