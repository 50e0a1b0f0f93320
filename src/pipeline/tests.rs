use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::connection::{ConnectionHandle, SerialCounter};
use crate::error::{ErrorKind, Result};
use crate::message::Message;
use crate::value::Value;
use crate::{Error, ObjectPath};

use super::{
    dispatch_inbound, dispatch_outbound, dispatch_user_event, Handler, HandlerContext,
    Pipeline, UserEvent,
};

type Log = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
struct Recorder {
    log: Log,
    consume_inbound: bool,
    fail_inbound: bool,
    recover: bool,
    consume_event: bool,
}

impl Recorder {
    fn new(log: &Log) -> Self {
        Self {
            log: log.clone(),
            ..Self::default()
        }
    }

    fn push(&self, ctx: &HandlerContext, what: &str) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{what}", ctx.name()));
    }
}

#[async_trait]
impl Handler for Recorder {
    async fn on_inbound_message(
        &self,
        ctx: &HandlerContext,
        message: Message,
    ) -> Result<Option<Message>> {
        self.push(ctx, "in");

        if self.fail_inbound {
            return Err(ErrorKind::InconsistentMessage.into());
        }

        if self.consume_inbound {
            return Ok(None);
        }

        Ok(Some(message))
    }

    async fn on_inbound_failure(&self, ctx: &HandlerContext, error: Error) -> Option<Error> {
        self.push(ctx, "failure");

        if self.recover {
            return None;
        }

        Some(error)
    }

    async fn on_outbound_message(
        &self,
        ctx: &HandlerContext,
        message: Message,
    ) -> Result<Option<Message>> {
        self.push(ctx, "out");
        Ok(Some(message))
    }

    async fn on_user_event(&self, ctx: &HandlerContext, event: UserEvent) -> Option<UserEvent> {
        self.push(ctx, "event");

        if self.consume_event {
            return None;
        }

        Some(event)
    }

    fn on_handler_added(&self, ctx: &HandlerContext) {
        self.push(ctx, "added");
    }

    fn on_handler_removed(&self, ctx: &HandlerContext) {
        self.push(ctx, "removed");
    }
}

fn handle() -> ConnectionHandle {
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    std::mem::forget(_rx);
    ConnectionHandle::new(tx, SerialCounter::new())
}

fn message() -> Message {
    Message::method_call(ObjectPath::root(), "Test")
        .with_body(vec![Value::Uint32(1)])
        .with_serial(NonZeroU32::new(1).unwrap())
}

fn taken(log: &Log) -> Vec<String> {
    std::mem::take(&mut *log.lock().unwrap())
}

#[tokio::test]
async fn inbound_traverses_head_to_tail() {
    let log = Log::default();
    let handle = handle();
    let pipeline = Pipeline::new(handle.clone());

    pipeline.add_last("a", Recorder::new(&log)).unwrap();
    pipeline.add_last("b", Recorder::new(&log)).unwrap();
    pipeline.add_last("c", Recorder::new(&log)).unwrap();
    taken(&log);

    let result = dispatch_inbound(&pipeline.snapshot(), &handle, message())
        .await
        .unwrap();

    assert!(result.is_some(), "nothing consumed the message");
    assert_eq!(taken(&log), ["a:in", "b:in", "c:in"]);
}

#[tokio::test]
async fn outbound_traverses_tail_to_head() {
    let log = Log::default();
    let handle = handle();
    let pipeline = Pipeline::new(handle.clone());

    pipeline.add_last("a", Recorder::new(&log)).unwrap();
    pipeline.add_last("b", Recorder::new(&log)).unwrap();
    taken(&log);

    let result = dispatch_outbound(&pipeline.snapshot(), &handle, message())
        .await
        .unwrap();

    assert!(result.is_some());
    assert_eq!(taken(&log), ["b:out", "a:out"]);
}

#[tokio::test]
async fn consuming_stops_propagation() {
    let log = Log::default();
    let handle = handle();
    let pipeline = Pipeline::new(handle.clone());

    pipeline.add_last("a", Recorder::new(&log)).unwrap();
    pipeline
        .add_last(
            "b",
            Recorder {
                consume_inbound: true,
                ..Recorder::new(&log)
            },
        )
        .unwrap();
    pipeline.add_last("c", Recorder::new(&log)).unwrap();
    taken(&log);

    let result = dispatch_inbound(&pipeline.snapshot(), &handle, message())
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(taken(&log), ["a:in", "b:in"]);
}

#[tokio::test]
async fn failures_are_offered_to_later_handlers() {
    let log = Log::default();
    let handle = handle();
    let pipeline = Pipeline::new(handle.clone());

    pipeline
        .add_last(
            "a",
            Recorder {
                fail_inbound: true,
                ..Recorder::new(&log)
            },
        )
        .unwrap();
    pipeline.add_last("b", Recorder::new(&log)).unwrap();
    pipeline.add_last("c", Recorder::new(&log)).unwrap();
    taken(&log);

    let result = dispatch_inbound(&pipeline.snapshot(), &handle, message()).await;

    assert!(result.is_err(), "no handler recovered the failure");
    assert_eq!(taken(&log), ["a:in", "b:failure", "c:failure"]);
}

#[tokio::test]
async fn a_handler_can_recover_a_failure() {
    let log = Log::default();
    let handle = handle();
    let pipeline = Pipeline::new(handle.clone());

    pipeline
        .add_last(
            "a",
            Recorder {
                fail_inbound: true,
                ..Recorder::new(&log)
            },
        )
        .unwrap();
    pipeline
        .add_last(
            "b",
            Recorder {
                recover: true,
                ..Recorder::new(&log)
            },
        )
        .unwrap();
    pipeline.add_last("c", Recorder::new(&log)).unwrap();
    taken(&log);

    let result = dispatch_inbound(&pipeline.snapshot(), &handle, message())
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(taken(&log), ["a:in", "b:failure"]);
}

#[tokio::test]
async fn user_events_can_be_consumed() {
    let log = Log::default();
    let handle = handle();
    let pipeline = Pipeline::new(handle.clone());

    pipeline
        .add_last(
            "a",
            Recorder {
                consume_event: true,
                ..Recorder::new(&log)
            },
        )
        .unwrap();
    pipeline.add_last("b", Recorder::new(&log)).unwrap();
    taken(&log);

    dispatch_user_event(
        &pipeline.snapshot(),
        &handle,
        UserEvent::SaslAuthComplete {
            guid: "abc".into(),
        },
    )
    .await;

    assert_eq!(taken(&log), ["a:event"]);
}

#[tokio::test]
async fn registration_order_and_anchors() {
    let log = Log::default();
    let handle = handle();
    let pipeline = Pipeline::new(handle);

    pipeline.add_last("b", Recorder::new(&log)).unwrap();
    pipeline.add_first("a", Recorder::new(&log)).unwrap();
    pipeline.add_after("b", "d", Recorder::new(&log)).unwrap();
    pipeline.add_before("d", "c", Recorder::new(&log)).unwrap();

    assert_eq!(pipeline.names(), ["a", "b", "c", "d"]);
    assert!(pipeline.contains("c"));

    pipeline.remove("b").unwrap();
    assert_eq!(pipeline.names(), ["a", "c", "d"]);

    assert!(pipeline.remove("b").is_err());
    assert!(pipeline.add_before("nope", "x", Recorder::new(&log)).is_err());
    assert!(pipeline.add_last("a", Recorder::new(&log)).is_err());

    let events = taken(&log);
    assert!(events.contains(&"a:added".to_owned()));
    assert!(events.contains(&"b:removed".to_owned()));
}

#[tokio::test]
async fn snapshots_are_isolated_from_mutation() {
    let log = Log::default();
    let handle = handle();
    let pipeline = Pipeline::new(handle.clone());

    pipeline.add_last("a", Recorder::new(&log)).unwrap();
    pipeline.add_last("b", Recorder::new(&log)).unwrap();
    taken(&log);

    let snapshot = pipeline.snapshot();
    pipeline.remove("b").unwrap();
    taken(&log);

    // The in-flight traversal still sees the removed handler.
    dispatch_inbound(&snapshot, &handle, message()).await.unwrap();
    assert_eq!(taken(&log), ["a:in", "b:in"]);

    // New traversals do not.
    dispatch_inbound(&pipeline.snapshot(), &handle, message())
        .await
        .unwrap();
    assert_eq!(taken(&log), ["a:in"]);
}
