//! The ordered, bidirectional handler pipeline.
//!
//! Inbound messages traverse registered handlers head to tail, outbound
//! messages tail to head, with the transport adjacent to the head. The
//! chain is snapshotted when an event enters, so concurrent additions and
//! removals only affect subsequent events.

#[cfg(test)]
mod tests;

pub use self::handler::{Handler, HandlerContext, UserEvent};
mod handler;

pub(crate) use self::dispatch::{
    dispatch_active, dispatch_inactive, dispatch_inbound, dispatch_outbound,
    dispatch_user_event,
};
mod dispatch;

use std::sync::{Arc, Mutex};

use crate::connection::ConnectionHandle;
use crate::error::{ErrorKind, Result};

#[derive(Clone)]
pub(crate) struct Entry {
    pub(crate) name: Arc<str>,
    pub(crate) handler: Arc<dyn Handler>,
}

impl Entry {
    pub(crate) fn context(&self, handle: &ConnectionHandle) -> HandlerContext {
        HandlerContext {
            name: self.name.clone(),
            handle: handle.clone(),
        }
    }
}

/// The ordered chain of named handlers attached to a connection.
///
/// # Examples
///
/// ```no_run
/// use tokio_dbus_client::{Connection, Handler};
///
/// struct Logger;
/// impl Handler for Logger {}
///
/// # async fn example(connection: &Connection) -> tokio_dbus_client::Result<()> {
/// connection.pipeline().add_last("logger", Logger)?;
/// # Ok(()) }
/// ```
pub struct Pipeline {
    entries: Mutex<Vec<Entry>>,
    handle: ConnectionHandle,
}

impl Pipeline {
    pub(crate) fn new(handle: ConnectionHandle) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            handle,
        }
    }

    /// Add a handler adjacent to the head, before every existing handler.
    pub fn add_first(&self, name: &str, handler: impl Handler) -> Result<()> {
        self.insert(name, Arc::new(handler), Position::First)
    }

    /// Add a handler adjacent to the tail, after every existing handler.
    pub fn add_last(&self, name: &str, handler: impl Handler) -> Result<()> {
        self.insert(name, Arc::new(handler), Position::Last)
    }

    /// Add a handler directly before the named one.
    pub fn add_before(&self, anchor: &str, name: &str, handler: impl Handler) -> Result<()> {
        self.insert(name, Arc::new(handler), Position::Before(anchor))
    }

    /// Add a handler directly after the named one.
    pub fn add_after(&self, anchor: &str, name: &str, handler: impl Handler) -> Result<()> {
        self.insert(name, Arc::new(handler), Position::After(anchor))
    }

    /// Remove the named handler.
    ///
    /// Events already traversing the chain are not affected.
    pub fn remove(&self, name: &str) -> Result<()> {
        let removed = {
            let mut entries = self.entries.lock().expect("pipeline lock poisoned");

            let Some(index) = entries.iter().position(|e| &*e.name == name) else {
                return Err(ErrorKind::UnknownHandler(name.into()).into());
            };

            entries.remove(index)
        };

        removed
            .handler
            .on_handler_removed(&removed.context(&self.handle));

        Ok(())
    }

    /// Test if a handler with the given name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .lock()
            .expect("pipeline lock poisoned")
            .iter()
            .any(|e| &*e.name == name)
    }

    /// The names of the registered handlers, head to tail.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .lock()
            .expect("pipeline lock poisoned")
            .iter()
            .map(|e| e.name.to_string())
            .collect()
    }

    /// Snapshot the chain for one traversal.
    pub(crate) fn snapshot(&self) -> Vec<Entry> {
        self.entries.lock().expect("pipeline lock poisoned").clone()
    }

    fn insert(&self, name: &str, handler: Arc<dyn Handler>, position: Position<'_>) -> Result<()> {
        let entry = Entry {
            name: name.into(),
            handler,
        };

        {
            let mut entries = self.entries.lock().expect("pipeline lock poisoned");

            if entries.iter().any(|e| e.name == entry.name) {
                return Err(ErrorKind::DuplicateHandler(name.into()).into());
            }

            let index = match position {
                Position::First => 0,
                Position::Last => entries.len(),
                Position::Before(anchor) => {
                    let Some(index) = entries.iter().position(|e| &*e.name == anchor) else {
                        return Err(ErrorKind::UnknownHandler(anchor.into()).into());
                    };

                    index
                }
                Position::After(anchor) => {
                    let Some(index) = entries.iter().position(|e| &*e.name == anchor) else {
                        return Err(ErrorKind::UnknownHandler(anchor.into()).into());
                    };

                    index + 1
                }
            };

            entries.insert(index, entry.clone());
        }

        entry.handler.on_handler_added(&entry.context(&self.handle));
        Ok(())
    }
}

enum Position<'a> {
    First,
    Last,
    Before(&'a str),
    After(&'a str),
}
