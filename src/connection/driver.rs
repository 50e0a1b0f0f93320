//! The connection driver task.
//!
//! One driver runs per connection. It owns the reconnect loop, the SASL
//! and `Hello()` session setup, the pending-reply table and all pipeline
//! dispatch. Each established session additionally runs one socket reader
//! and one socket writer task, so slow pipeline handlers never stall the
//! transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::frame::{encode_message, FrameDecoder};
use crate::message::Message;
use crate::org_freedesktop_dbus::{error_name, DESTINATION, INTERFACE, PATH, PEER_INTERFACE};
use crate::pipeline::{
    dispatch_active, dispatch_inactive, dispatch_inbound, dispatch_outbound,
    dispatch_user_event, Pipeline, UserEvent,
};
use crate::proto::MessageType;
use crate::sasl::{SaslClient, SaslContext, SaslStep};
use crate::value::Value;
use crate::ObjectPath;

use super::builder::{BusKind, Config};
use super::handle::{Command, ConnectionHandle};
use super::transport::{
    session_bus_address, system_bus_address, Address, LineStream, ReadHalf, Transport,
    WriteHalf,
};
use super::{ConnectionEvent, ConnectionEventListener, ConnectionState};

/// Everything the driver needs, assembled by the builder.
pub(crate) struct DriverSetup {
    pub(crate) bus: BusKind,
    pub(crate) config: Config,
    pub(crate) listeners: Vec<Arc<dyn ConnectionEventListener>>,
    pub(crate) pipeline: Arc<Pipeline>,
    pub(crate) handle: ConnectionHandle,
    pub(crate) commands: mpsc::UnboundedReceiver<Command>,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) unique_name: watch::Sender<Option<String>>,
    pub(crate) ready: oneshot::Sender<Result<()>>,
}

/// Run the connection driver to completion.
pub(crate) async fn run(setup: DriverSetup) {
    let ready = setup.ready;

    let driver = Driver {
        bus: setup.bus,
        config: setup.config,
        listeners: setup.listeners,
        pipeline: setup.pipeline,
        handle: setup.handle,
        commands: setup.commands,
        state: setup.state,
        unique_name: setup.unique_name,
        pending: HashMap::new(),
    };

    driver.run(ready).await
}

struct Pending {
    deadline: Instant,
    kind: PendingKind,
}

enum PendingKind {
    /// A user request awaiting its reply.
    User(oneshot::Sender<Result<Message>>),
    /// An outstanding health check ping.
    Health,
}

enum SessionEvent {
    Inbound(Message),
    Fatal(Error),
}

struct WriteOp {
    bytes: Vec<u8>,
    completion: Option<oneshot::Sender<Result<()>>>,
}

/// How an established session ended.
enum SessionEnd {
    /// `close()` was called.
    Closed(oneshot::Sender<()>),
    /// Every connection handle was dropped.
    Shutdown,
    /// The transport or a health check failed.
    Lost(Error),
}

struct Session {
    events: mpsc::UnboundedReceiver<SessionEvent>,
    writes: Option<mpsc::UnboundedSender<WriteOp>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Session {
    /// Hand bytes to the writer task.
    fn write(&self, bytes: Vec<u8>, completion: Option<oneshot::Sender<Result<()>>>) -> Result<()> {
        let op = WriteOp { bytes, completion };

        let Some(writes) = &self.writes else {
            fail_completion(op.completion);
            return Err(ErrorKind::Disconnected.into());
        };

        if let Err(error) = writes.send(op) {
            fail_completion(error.0.completion);
            return Err(ErrorKind::Disconnected.into());
        }

        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

fn fail_completion(completion: Option<oneshot::Sender<Result<()>>>) {
    if let Some(completion) = completion {
        let _ = completion.send(Err(ErrorKind::Disconnected.into()));
    }
}

struct Driver {
    bus: BusKind,
    config: Config,
    listeners: Vec<Arc<dyn ConnectionEventListener>>,
    pipeline: Arc<Pipeline>,
    handle: ConnectionHandle,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    unique_name: watch::Sender<Option<String>>,
    pending: HashMap<u32, Pending>,
}

impl Driver {
    async fn run(mut self, ready: oneshot::Sender<Result<()>>) {
        let mut ready = Some(ready);
        let mut reconnecting = false;
        let mut attempts: u32 = 0;
        let mut delay = self.config.reconnect_initial_delay;

        loop {
            self.set_state(ConnectionState::Connecting);
            self.emit(ConnectionEvent::Connecting);

            let established = match timeout(self.config.connect_timeout, self.establish()).await
            {
                Ok(result) => result,
                Err(..) => Err(Error::from(ErrorKind::ConnectTimeout)),
            };

            match established {
                Ok(mut session) => {
                    attempts = 0;
                    delay = self.config.reconnect_initial_delay;

                    self.set_state(ConnectionState::Ready);
                    self.emit(ConnectionEvent::Ready);

                    if reconnecting {
                        self.emit(ConnectionEvent::Reconnected);
                    }

                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Ok(()));
                    }

                    let snapshot = self.pipeline.snapshot();
                    dispatch_active(&snapshot, &self.handle).await;

                    let end = self.session_loop(&mut session).await;
                    drop(session);

                    self.fail_pending();

                    let snapshot = self.pipeline.snapshot();
                    dispatch_inactive(&snapshot, &self.handle).await;

                    self.unique_name.send_replace(None);
                    self.set_state(ConnectionState::Disconnected);
                    self.emit(ConnectionEvent::Disconnected);

                    match end {
                        SessionEnd::Closed(done) => {
                            self.set_state(ConnectionState::Closed);
                            let _ = done.send(());
                            self.drain_commands();
                            return;
                        }
                        SessionEnd::Shutdown => {
                            self.set_state(ConnectionState::Closed);
                            return;
                        }
                        SessionEnd::Lost(error) => {
                            warn!(%error, "connection lost");

                            if !self.config.auto_reconnect {
                                self.set_state(ConnectionState::Failed);
                                self.emit(ConnectionEvent::Failed);
                                self.drain_commands();
                                return;
                            }

                            reconnecting = true;
                        }
                    }
                }
                Err(error) => {
                    // The first connect reports its failure instead of
                    // retrying.
                    if let Some(tx) = ready.take() {
                        self.set_state(ConnectionState::Failed);
                        self.emit(ConnectionEvent::Failed);
                        let _ = tx.send(Err(error));
                        self.drain_commands();
                        return;
                    }

                    warn!(%error, "reconnect attempt failed");
                    attempts += 1;

                    if self.config.max_reconnect_attempts != 0
                        && attempts >= self.config.max_reconnect_attempts
                    {
                        self.set_state(ConnectionState::Failed);
                        self.emit(ConnectionEvent::Failed);
                        self.drain_commands();
                        return;
                    }
                }
            }

            self.set_state(ConnectionState::Reconnecting);
            self.emit(ConnectionEvent::Reconnecting);

            let wait = jitter(delay);
            delay = delay
                .mul_f64(self.config.reconnect_backoff_multiplier)
                .min(self.config.reconnect_max_delay);

            if self.backoff(wait).await {
                return;
            }
        }
    }

    /// Open the transport, run the SASL dialogue and the `Hello()`
    /// exchange.
    async fn establish(&mut self) -> Result<Session> {
        self.handle.serials().reset();

        let address = match &self.bus {
            BusKind::Session => session_bus_address()?,
            BusKind::System => system_bus_address(),
            BusKind::Address(address) => address.clone(),
        };

        let address = Address::parse(&address)?;
        let transport = Transport::connect(&address).await?;

        self.set_state(ConnectionState::Authenticating);

        let mut stream = LineStream::new(transport);
        stream.write_all(b"\0").await?;

        let mut sasl = SaslClient::new(
            SaslContext::from_env(),
            self.config
                .mechanisms
                .iter()
                .map(|m| m.instantiate())
                .collect(),
        );

        let line = sasl.initial_auth();
        stream.write_all(&line).await?;

        let guid = loop {
            let line = stream.read_line().await?;

            match sasl.advance(&line) {
                Ok(SaslStep::Send(out)) => stream.write_all(&out).await?,
                Ok(SaslStep::Wait) => {}
                Ok(SaslStep::Authenticated { guid, line }) => {
                    stream.write_all(&line).await?;
                    break guid;
                }
                Err(error) => {
                    let snapshot = self.pipeline.snapshot();
                    dispatch_user_event(&snapshot, &self.handle, UserEvent::SaslAuthFailed)
                        .await;
                    return Err(error);
                }
            }
        };

        self.set_state(ConnectionState::Connected);
        self.emit(ConnectionEvent::Connected);

        let snapshot = self.pipeline.snapshot();
        dispatch_user_event(&snapshot, &self.handle, UserEvent::SaslAuthComplete { guid })
            .await;

        let (transport, leftover) = stream.into_parts();
        let (read_half, write_half) = transport.into_split();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (writes_tx, writes_rx) = mpsc::unbounded_channel();

        let mut session = Session {
            events: events_rx,
            writes: Some(writes_tx),
            reader: tokio::spawn(read_loop(read_half, leftover, events_tx.clone())),
            writer: tokio::spawn(write_loop(write_half, writes_rx, events_tx)),
        };

        let name = self.hello(&mut session).await?;
        self.unique_name.send_replace(Some(name.clone()));

        let snapshot = self.pipeline.snapshot();
        dispatch_user_event(
            &snapshot,
            &self.handle,
            UserEvent::MandatoryNameAcquired { name },
        )
        .await;

        Ok(session)
    }

    /// Acquire the unique bus name.
    async fn hello(&mut self, session: &mut Session) -> Result<String> {
        let serial = self.handle.serials().next();

        let message = Message::method_call(ObjectPath::new(PATH)?, "Hello")
            .with_interface(INTERFACE)
            .with_destination(DESTINATION)
            .with_serial(serial);

        session.write(encode_message(&message)?, None)?;

        loop {
            match session.events.recv().await {
                Some(SessionEvent::Inbound(reply)) if reply.reply_serial() == Some(serial) => {
                    if reply.message_type() == MessageType::METHOD_RETURN {
                        let Some(Value::String(name)) = reply.body().first() else {
                            return Err(ErrorKind::InconsistentMessage.into());
                        };

                        return Ok(name.clone());
                    }

                    let name = reply.error_name().unwrap_or(error_name::FAILED);
                    let message = reply.body().first().and_then(Value::as_str);
                    return Err(Error::from_reply(name, message));
                }
                Some(SessionEvent::Inbound(other)) => {
                    debug!(message = %other, "inbound message before Hello completed");
                }
                Some(SessionEvent::Fatal(error)) => return Err(error),
                None => return Err(ErrorKind::Disconnected.into()),
            }
        }
    }

    /// Service one established session until it ends.
    async fn session_loop(&mut self, session: &mut Session) -> SessionEnd {
        let mut health = if self.config.health_check_enabled {
            let mut ticker = interval_at(
                Instant::now() + self.config.health_check_interval,
                self.config.health_check_interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(ticker)
        } else {
            None
        };

        loop {
            let next_deadline = self.pending.values().map(|p| p.deadline).min();
            let health_enabled = health.is_some();

            tokio::select! {
                event = session.events.recv() => match event {
                    Some(SessionEvent::Inbound(message)) => {
                        self.handle_inbound(session, message).await;
                    }
                    Some(SessionEvent::Fatal(error)) => return SessionEnd::Lost(error),
                    None => return SessionEnd::Lost(ErrorKind::Disconnected.into()),
                },
                command = self.commands.recv() => match command {
                    Some(Command::Call { message, reply }) => {
                        self.handle_call(session, message, reply).await;
                    }
                    Some(Command::Send { message, completion }) => {
                        self.handle_send(session, message, completion).await;
                    }
                    Some(Command::Close { done }) => {
                        self.flush(session).await;
                        return SessionEnd::Closed(done);
                    }
                    None => {
                        self.flush(session).await;
                        return SessionEnd::Shutdown;
                    }
                },
                _ = sleep_until(next_deadline.unwrap_or_else(Instant::now)),
                    if next_deadline.is_some() =>
                {
                    if let Some(end) = self.expire_pending() {
                        return end;
                    }
                },
                _ = tick(&mut health), if health_enabled => {
                    if let Err(error) = self.send_health_ping(session) {
                        return SessionEnd::Lost(error);
                    }
                },
            }
        }
    }

    /// Let the writer drain queued writes, bounded by the shutdown grace.
    async fn flush(&mut self, session: &mut Session) {
        session.writes.take();
        let _ = timeout(self.config.shutdown_grace, &mut session.writer).await;
    }

    async fn handle_inbound(&mut self, session: &mut Session, message: Message) {
        let snapshot = self.pipeline.snapshot();

        match dispatch_inbound(&snapshot, &self.handle, message).await {
            Ok(Some(message)) => {
                if let Some(message) = self.correlate(message) {
                    self.tail(session, message).await;
                }
            }
            Ok(None) => {}
            Err(error) => warn!(%error, "inbound failure reached the tail unhandled"),
        }
    }

    /// Complete the pending request a reply correlates with, if any.
    fn correlate(&mut self, message: Message) -> Option<Message> {
        if !matches!(
            message.message_type(),
            MessageType::METHOD_RETURN | MessageType::ERROR
        ) {
            return Some(message);
        }

        let Some(reply_serial) = message.reply_serial() else {
            return Some(message);
        };

        let Some(pending) = self.pending.remove(&reply_serial.get()) else {
            return Some(message);
        };

        match pending.kind {
            PendingKind::User(tx) => {
                let result = if message.message_type() == MessageType::ERROR {
                    let name = message.error_name().unwrap_or(error_name::FAILED);
                    let detail = message.body().first().and_then(Value::as_str);
                    Err(Error::from_reply(name, detail))
                } else {
                    Ok(message)
                };

                if tx.send(result).is_err() {
                    debug!(%reply_serial, "dropping reply for a cancelled request");
                }
            }
            PendingKind::Health => {
                debug!("health check reply received");
            }
        }

        None
    }

    /// The fixed tail of the pipeline.
    async fn tail(&mut self, session: &mut Session, message: Message) {
        match message.message_type() {
            MessageType::METHOD_CALL if message.expects_reply() => {
                let reply = message
                    .error_reply(error_name::FAILED, "No handler was able to process the request.");

                match reply {
                    Ok(reply) => {
                        let reply = self.handle.stamp(reply);
                        self.handle_send(session, reply, None).await;
                    }
                    Err(error) => debug!(%error, "cannot synthesize a fallback error"),
                }
            }
            MessageType::METHOD_CALL => {
                debug!(message = %message, "unhandled method call without reply expectation");
            }
            MessageType::METHOD_RETURN | MessageType::ERROR => {
                debug!(message = %message, "unhandled reply");
            }
            _ => {
                // Signals are silently discarded.
            }
        }
    }

    async fn handle_call(
        &mut self,
        session: &mut Session,
        message: Message,
        reply: oneshot::Sender<Result<Message>>,
    ) {
        let Some(serial) = message.serial() else {
            let _ = reply.send(Err(ErrorKind::ZeroSerial.into()));
            return;
        };

        // Register before offering the message to the pipeline so a reply
        // can never race the registration.
        self.pending.insert(
            serial.get(),
            Pending {
                deadline: Instant::now() + self.config.method_call_timeout,
                kind: PendingKind::User(reply),
            },
        );

        if let Err(error) = self.write_outbound(session, message).await {
            if let Some(pending) = self.pending.remove(&serial.get()) {
                if let PendingKind::User(tx) = pending.kind {
                    let _ = tx.send(Err(error));
                }
            }
        }
    }

    async fn handle_send(
        &mut self,
        session: &mut Session,
        message: Message,
        completion: Option<oneshot::Sender<Result<()>>>,
    ) {
        let snapshot = self.pipeline.snapshot();

        let message = match dispatch_outbound(&snapshot, &self.handle, message).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                // Consumed by a handler; the write is complete as far as
                // the caller is concerned.
                if let Some(completion) = completion {
                    let _ = completion.send(Ok(()));
                }

                return;
            }
            Err(error) => {
                if let Some(completion) = completion {
                    let _ = completion.send(Err(error));
                }

                return;
            }
        };

        match encode_message(&message) {
            Ok(bytes) => {
                let _ = session.write(bytes, completion);
            }
            Err(error) => {
                if let Some(completion) = completion {
                    let _ = completion.send(Err(error));
                }
            }
        }
    }

    /// Drive an outbound message through the pipeline and onto the wire.
    async fn write_outbound(&mut self, session: &mut Session, message: Message) -> Result<()> {
        let snapshot = self.pipeline.snapshot();

        let Some(message) = dispatch_outbound(&snapshot, &self.handle, message).await? else {
            return Ok(());
        };

        let bytes = encode_message(&message)?;
        session.write(bytes, None)
    }

    /// Fail expired pending entries and prune cancelled ones.
    fn expire_pending(&mut self) -> Option<SessionEnd> {
        let now = Instant::now();
        let mut lost = None;

        let expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(serial, _)| *serial)
            .collect();

        for serial in expired {
            let Some(pending) = self.pending.remove(&serial) else {
                continue;
            };

            match pending.kind {
                PendingKind::User(tx) => {
                    debug!(serial, "method call timed out");
                    let _ = tx.send(Err(ErrorKind::Timeout.into()));
                }
                PendingKind::Health => {
                    warn!("health check timed out");
                    lost = Some(SessionEnd::Lost(ErrorKind::Timeout.into()));
                }
            }
        }

        self.pending.retain(|serial, pending| match &pending.kind {
            PendingKind::User(tx) if tx.is_closed() => {
                debug!(serial = *serial, "pending reply cancelled by the caller");
                false
            }
            _ => true,
        });

        lost
    }

    fn send_health_ping(&mut self, session: &mut Session) -> Result<()> {
        let serial = self.handle.serials().next();

        let message = Message::method_call(ObjectPath::new(PATH)?, "Ping")
            .with_interface(PEER_INTERFACE)
            .with_destination(DESTINATION)
            .with_serial(serial);

        let bytes = encode_message(&message)?;

        self.pending.insert(
            serial.get(),
            Pending {
                deadline: Instant::now() + self.config.health_check_timeout,
                kind: PendingKind::Health,
            },
        );

        session.write(bytes, None)
    }

    /// Fail every pending entry with a disconnect error.
    fn fail_pending(&mut self) {
        for (_, pending) in self.pending.drain() {
            if let PendingKind::User(tx) = pending.kind {
                let _ = tx.send(Err(ErrorKind::Disconnected.into()));
            }
        }
    }

    /// Wait out the reconnect delay while answering commands. Returns true
    /// if the driver should exit.
    async fn backoff(&mut self, wait: Duration) -> bool {
        let sleep = sleep(wait);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                command = self.commands.recv() => match command {
                    Some(Command::Close { done }) => {
                        self.set_state(ConnectionState::Closed);
                        let _ = done.send(());
                        return true;
                    }
                    Some(Command::Call { reply, .. }) => {
                        let _ = reply.send(Err(ErrorKind::Disconnected.into()));
                    }
                    Some(Command::Send { completion, .. }) => {
                        fail_completion(completion);
                    }
                    None => return true,
                },
            }
        }
    }

    /// Answer any queued commands after reaching a terminal state.
    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Close { done } => {
                    let _ = done.send(());
                }
                Command::Call { reply, .. } => {
                    let _ = reply.send(Err(ErrorKind::Disconnected.into()));
                }
                Command::Send { completion, .. } => {
                    fail_completion(completion);
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: ConnectionEvent) {
        for listener in &self.listeners {
            listener.on_event(event);
        }
    }
}

/// Await the next health tick. Only polled when a ticker exists.
async fn tick(health: &mut Option<tokio::time::Interval>) {
    match health {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Apply ±20% jitter to a reconnect delay.
fn jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..=1.2);
    delay.mul_f64(factor)
}

/// The session's socket reader: feeds decoded messages to the driver.
async fn read_loop(
    mut read: ReadHalf,
    leftover: Vec<u8>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut decoder = FrameDecoder::new();
    decoder.extend(&leftover);

    let mut buf = [0u8; 8192];

    loop {
        loop {
            match decoder.next_message() {
                Ok(Some(message)) => {
                    if events.send(SessionEvent::Inbound(message)).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    // Alignment cannot be recovered mid-stream.
                    let _ = events.send(SessionEvent::Fatal(error));
                    return;
                }
            }
        }

        match read.read(&mut buf).await {
            Ok(0) => {
                let _ = events.send(SessionEvent::Fatal(ErrorKind::Disconnected.into()));
                return;
            }
            Ok(n) => decoder.extend(&buf[..n]),
            Err(error) => {
                let _ = events.send(SessionEvent::Fatal(error.into()));
                return;
            }
        }
    }
}

/// The session's socket writer: commits queued writes in order.
async fn write_loop(
    mut write: WriteHalf,
    mut ops: mpsc::UnboundedReceiver<WriteOp>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    while let Some(op) = ops.recv().await {
        match write.write_all(&op.bytes).await {
            Ok(()) => {
                if let Some(completion) = op.completion {
                    let _ = completion.send(Ok(()));
                }
            }
            Err(error) => {
                let kind = error.kind();

                if let Some(completion) = op.completion {
                    let _ = completion.send(Err(std::io::Error::from(kind).into()));
                }

                let _ = events.send(SessionEvent::Fatal(error.into()));
                return;
            }
        }
    }

    // The driver dropped its sender; flush is complete.
    let _ = write.shutdown().await;
}
