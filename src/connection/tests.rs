use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

use crate::frame::{encode_message, FrameDecoder};
use crate::message::Message;
use crate::org_freedesktop_dbus::error_name;
use crate::proto::{Flags, MessageType};
use crate::signature::CompleteType;
use crate::value::{Array, Value};
use crate::{
    ConnectionBuilder, ConnectionEvent, ConnectionState, ObjectPath, ServiceHandler,
};

fn socket_path(tag: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    std::env::temp_dir().join(format!(
        "dbus-client-test-{tag}-{}-{}.sock",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ))
}

fn address(path: &PathBuf) -> String {
    format!("unix:path={}", path.display())
}

/// A scripted server side of one accepted connection.
struct ServerConn {
    stream: UnixStream,
    carry: Vec<u8>,
    decoder: FrameDecoder,
    next_serial: u32,
}

impl ServerConn {
    /// Accept a connection and drive it through SASL and `Hello()`.
    async fn handshake(listener: &UnixListener, unique: &str) -> Self {
        let (stream, _) = listener.accept().await.unwrap();

        let mut conn = Self {
            stream,
            carry: Vec::new(),
            decoder: FrameDecoder::new(),
            next_serial: 1,
        };

        let mut nul = [0u8; 1];
        conn.stream.read_exact(&mut nul).await.unwrap();
        assert_eq!(nul[0], 0, "expected the leading NUL byte");

        assert_eq!(conn.read_line().await, b"AUTH");
        conn.stream.write_all(b"REJECTED EXTERNAL\r\n").await.unwrap();

        let line = conn.read_line().await;
        assert!(line.starts_with(b"AUTH EXTERNAL"), "{line:?}");
        conn.stream.write_all(b"OK 1234deadbeefguid\r\n").await.unwrap();

        assert_eq!(conn.read_line().await, b"BEGIN");

        let carry = std::mem::take(&mut conn.carry);
        conn.decoder.extend(&carry);

        let hello = conn.read_message().await;
        assert_eq!(hello.member(), Some("Hello"));
        assert_eq!(
            hello.serial().map(|s| s.get()),
            Some(1),
            "the serial counter starts at 1 on every session"
        );

        let reply = conn
            .reply_to(&hello)
            .with_body(vec![Value::String(unique.into())]);
        conn.send(reply).await;

        conn
    }

    async fn read_line(&mut self) -> Vec<u8> {
        loop {
            if let Some(at) = self.carry.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.carry.drain(..at + 1).collect();
                line.pop();

                if line.last() == Some(&b'\r') {
                    line.pop();
                }

                return line;
            }

            let mut chunk = [0u8; 1024];
            let n = self.stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed during SASL");
            self.carry.extend_from_slice(&chunk[..n]);
        }
    }

    async fn read_message(&mut self) -> Message {
        loop {
            if let Some(message) = self.decoder.next_message().unwrap() {
                return message;
            }

            let mut chunk = [0u8; 8192];
            let n = self.stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed the connection");
            self.decoder.extend(&chunk[..n]);
        }
    }

    /// Read until the client closes the connection, ignoring messages.
    async fn closed(&mut self) {
        let mut chunk = [0u8; 8192];

        loop {
            match self.stream.read(&mut chunk).await {
                Ok(0) | Err(..) => return,
                Ok(..) => {}
            }
        }
    }

    fn serial(&mut self) -> NonZeroU32 {
        let serial = self.next_serial;
        self.next_serial += 1;
        NonZeroU32::new(serial).unwrap()
    }

    fn reply_to(&mut self, call: &Message) -> Message {
        let serial = self.serial();

        let mut reply = Message::method_return(call.serial().unwrap()).with_serial(serial);

        if let Some(sender) = call.sender() {
            reply = reply.with_destination(sender);
        }

        reply.with_sender("org.freedesktop.DBus")
    }

    fn error_to(&mut self, call: &Message, name: &str, text: &str) -> Message {
        let serial = self.serial();

        Message::error(name, call.serial().unwrap())
            .with_serial(serial)
            .with_sender("org.freedesktop.DBus")
            .with_body(vec![Value::String(text.into())])
    }

    async fn send(&mut self, message: Message) {
        let bytes = encode_message(&message).unwrap();
        self.stream.write_all(&bytes).await.unwrap();
    }
}

fn get_id_call() -> Message {
    Message::method_call(ObjectPath::new("/org/freedesktop/DBus").unwrap(), "GetId")
        .with_interface("org.freedesktop.DBus")
        .with_destination("org.freedesktop.DBus")
}

async fn wait_for_state(connection: &crate::Connection, state: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if connection.state() == state {
                return;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("connection never reached {state:?}"));
}

#[tokio::test]
async fn connects_and_reaches_ready() {
    let path = socket_path("ready");
    let listener = UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let mut conn = ServerConn::handshake(&listener, ":1.0").await;
        conn.closed().await;
    });

    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = events.clone();

    let connection = ConnectionBuilder::new()
        .address(&address(&path))
        .listener(move |event| seen.lock().unwrap().push(event))
        .connect()
        .await
        .unwrap();

    assert!(connection.is_connected());
    assert_eq!(connection.unique_name().as_deref(), Some(":1.0"));

    assert_eq!(
        events.lock().unwrap().clone(),
        [
            ConnectionEvent::Connecting,
            ConnectionEvent::Connected,
            ConnectionEvent::Ready,
        ]
    );

    connection.close().await;
    assert_eq!(connection.state(), ConnectionState::Closed);

    server.await.unwrap();
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn method_calls_round_trip() -> anyhow::Result<()> {
    let path = socket_path("call");
    let listener = UnixListener::bind(&path)?;

    let server = tokio::spawn(async move {
        let mut conn = ServerConn::handshake(&listener, ":1.7").await;

        let call = conn.read_message().await;
        assert_eq!(call.member(), Some("GetId"));
        assert_eq!(call.destination(), Some("org.freedesktop.DBus"));

        let reply = conn
            .reply_to(&call)
            .with_body(vec![Value::String("89ab89ab89ab89ab89ab89ab".into())]);
        conn.send(reply).await;

        let call = conn.read_message().await;
        assert_eq!(call.member(), Some("ListNames"));

        let names = Array::from_values(
            CompleteType::String,
            vec![
                Value::String("org.freedesktop.DBus".into()),
                Value::String(":1.7".into()),
            ],
        )
        .unwrap();

        let reply = conn.reply_to(&call).with_body(vec![Value::Array(names)]);
        conn.send(reply).await;
        conn.closed().await;
    });

    let connection = ConnectionBuilder::new()
        .address(&address(&path))
        .connect()
        .await?;

    let reply = connection.send_request(get_id_call()).await?;
    assert_eq!(reply.body_signature().as_str(), "s");
    assert_eq!(
        reply.body().first().and_then(Value::as_str),
        Some("89ab89ab89ab89ab89ab89ab")
    );

    let list = Message::method_call(ObjectPath::new("/org/freedesktop/DBus")?, "ListNames")
        .with_interface("org.freedesktop.DBus")
        .with_destination("org.freedesktop.DBus");

    let reply = connection.send_request(list).await?;
    assert_eq!(reply.body_signature().as_str(), "as");

    let Some(Value::Array(names)) = reply.body().first() else {
        panic!("expected an array of names: {:?}", reply.body());
    };

    let names: Vec<&str> = names.values().iter().filter_map(Value::as_str).collect();
    assert!(names.contains(&"org.freedesktop.DBus"));

    let well_known = names.iter().filter(|n| !n.starts_with(':')).count();
    let unique = names.iter().filter(|n| n.starts_with(':')).count();
    assert_eq!(well_known + unique, names.len());

    connection.close().await;
    server.await?;
    std::fs::remove_file(&path).ok();
    Ok(())
}

#[tokio::test]
async fn error_replies_preserve_the_name() {
    let path = socket_path("error");
    let listener = UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let mut conn = ServerConn::handshake(&listener, ":1.2").await;

        let call = conn.read_message().await;
        let error = conn.error_to(
            &call,
            error_name::SERVICE_UNKNOWN,
            "The name com.example.NoSuch was not provided by any .service files",
        );
        conn.send(error).await;
        conn.closed().await;
    });

    let connection = ConnectionBuilder::new()
        .address(&address(&path))
        .connect()
        .await
        .unwrap();

    let call = Message::method_call(ObjectPath::root(), "Whatever")
        .with_destination("com.example.NoSuch");

    let error = connection.send_request(call).await.unwrap_err();
    assert_eq!(error.name(), Some(error_name::SERVICE_UNKNOWN));
    assert!(error.message().unwrap().contains("com.example.NoSuch"));

    connection.close().await;
    server.await.unwrap();
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn slow_replies_time_out_and_late_replies_are_dropped() {
    let path = socket_path("timeout");
    let listener = UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let mut conn = ServerConn::handshake(&listener, ":1.3").await;

        // Sit on the first call past the client's deadline.
        let slow = conn.read_message().await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        let late = conn.reply_to(&slow).with_body(vec![Value::String("late".into())]);
        conn.send(late).await;

        // The connection is still usable afterwards.
        let quick = conn.read_message().await;
        let reply = conn.reply_to(&quick).with_body(vec![Value::String("quick".into())]);
        conn.send(reply).await;
        conn.closed().await;
    });

    let connection = ConnectionBuilder::new()
        .address(&address(&path))
        .method_call_timeout(Duration::from_millis(200))
        .connect()
        .await
        .unwrap();

    let error = connection.send_request(get_id_call()).await.unwrap_err();
    assert!(error.is_timeout());

    let reply = connection.send_request(get_id_call()).await.unwrap();
    assert_eq!(reply.body().first().and_then(Value::as_str), Some("quick"));

    connection.close().await;
    server.await.unwrap();
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn cancelled_requests_drop_their_replies() {
    use futures::FutureExt;

    let path = socket_path("cancel");
    let listener = UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let mut conn = ServerConn::handshake(&listener, ":1.11").await;

        // Reply to the cancelled call; the client only logs it.
        let cancelled = conn.read_message().await;
        let reply = conn
            .reply_to(&cancelled)
            .with_body(vec![Value::String("ignored".into())]);
        conn.send(reply).await;

        let live = conn.read_message().await;
        let reply = conn
            .reply_to(&live)
            .with_body(vec![Value::String("delivered".into())]);
        conn.send(reply).await;
        conn.closed().await;
    });

    let connection = ConnectionBuilder::new()
        .address(&address(&path))
        .connect()
        .await
        .unwrap();

    // Poll the request future once and drop it, cancelling the call after
    // the message is already on its way.
    assert!(connection.send_request(get_id_call()).now_or_never().is_none());

    let reply = connection.send_request(get_id_call()).await.unwrap();
    assert_eq!(
        reply.body().first().and_then(Value::as_str),
        Some("delivered")
    );

    connection.close().await;
    server.await.unwrap();
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn disconnect_fails_pending_requests() {
    let path = socket_path("disconnect");
    let listener = UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let mut conn = ServerConn::handshake(&listener, ":1.4").await;

        // Receive the call, then drop the transport without replying.
        let _ = conn.read_message().await;
    });

    let connection = ConnectionBuilder::new()
        .address(&address(&path))
        .connect()
        .await
        .unwrap();

    let error = connection.send_request(get_id_call()).await.unwrap_err();
    assert!(error.is_disconnected());

    wait_for_state(&connection, ConnectionState::Failed).await;

    server.await.unwrap();
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn reconnects_with_a_fresh_session() {
    let path = socket_path("reconnect");
    let listener = UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        // First session is dropped immediately after it becomes ready.
        let conn = ServerConn::handshake(&listener, ":1.0").await;
        drop(conn);

        // The client comes back on its own; serve the second session.
        let mut conn = ServerConn::handshake(&listener, ":1.1").await;

        let call = conn.read_message().await;
        assert_eq!(call.member(), Some("GetId"));
        let reply = conn.reply_to(&call).with_body(vec![Value::String("fresh".into())]);
        conn.send(reply).await;
        conn.closed().await;
    });

    let events = Arc::new(Mutex::new(Vec::new()));
    let seen = events.clone();

    let connection = ConnectionBuilder::new()
        .address(&address(&path))
        .auto_reconnect(true)
        .reconnect_initial_delay(Duration::from_millis(50))
        .listener(move |event| seen.lock().unwrap().push(event))
        .connect()
        .await
        .unwrap();

    // Without user intervention the connection comes back with a new
    // unique name and a reset serial counter (asserted by the server).
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if connection.unique_name().as_deref() == Some(":1.1") {
                return;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("never reacquired a unique name");

    wait_for_state(&connection, ConnectionState::Ready).await;

    let reply = connection.send_request(get_id_call()).await.unwrap();
    assert_eq!(reply.body().first().and_then(Value::as_str), Some("fresh"));

    {
        let events = events.lock().unwrap();
        assert!(events.contains(&ConnectionEvent::Disconnected));
        assert!(events.contains(&ConnectionEvent::Reconnecting));
        assert!(events.contains(&ConnectionEvent::Reconnected));
    }

    connection.close().await;
    server.await.unwrap();
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn tail_synthesizes_an_error_for_unhandled_calls() {
    let path = socket_path("tail");
    let listener = UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let mut conn = ServerConn::handshake(&listener, ":1.5").await;

        let serial = conn.serial();
        let call = Message::method_call(ObjectPath::new("/nowhere").unwrap(), "Nope")
            .with_interface("com.example.Missing")
            .with_sender(":1.99")
            .with_serial(serial);
        conn.send(call).await;

        let reply = conn.read_message().await;
        assert_eq!(reply.message_type(), MessageType::ERROR);
        assert_eq!(reply.reply_serial(), Some(serial));
        assert_eq!(reply.error_name(), Some(error_name::FAILED));
        assert_eq!(
            reply.body().first().and_then(Value::as_str),
            Some("No handler was able to process the request.")
        );
    });

    let connection = ConnectionBuilder::new()
        .address(&address(&path))
        .connect()
        .await
        .unwrap();

    server.await.unwrap();
    connection.close().await;
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn registered_services_answer_calls() {
    let path = socket_path("service");
    let listener = UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let mut conn = ServerConn::handshake(&listener, ":1.6").await;

        let serial = conn.serial();
        let call = Message::method_call(ObjectPath::new("/com/example/Echo").unwrap(), "Echo")
            .with_interface("com.example.Echo")
            .with_sender(":1.42")
            .with_serial(serial)
            .with_body(vec![Value::String("marco".into())]);
        conn.send(call).await;

        let reply = conn.read_message().await;
        assert_eq!(reply.message_type(), MessageType::METHOD_RETURN);
        assert_eq!(reply.reply_serial(), Some(serial));
        assert_eq!(reply.destination(), Some(":1.42"));
        assert_eq!(reply.body().first().and_then(Value::as_str), Some("marco"));
    });

    // Register the service before connecting so the scripted call cannot
    // race the registration.
    let connection = ConnectionBuilder::new().address(&address(&path)).build();

    let service = ServiceHandler::new();
    service.register(
        crate::ObjectDescriptor::new(ObjectPath::new("/com/example/Echo").unwrap())
            .with_interface(
                crate::InterfaceDescriptor::new("com.example.Echo").with_method(
                    crate::MethodDescriptor::new(
                        "Echo",
                        vec![crate::ArgDescriptor::new(
                            "input",
                            crate::Signature::new("s").unwrap(),
                        )],
                        vec![crate::ArgDescriptor::new(
                            "output",
                            crate::Signature::new("s").unwrap(),
                        )],
                        Arc::new(|body| Ok(body.to_vec())),
                    ),
                ),
            ),
    );

    connection.pipeline().add_last("service", service).unwrap();
    connection.connect().await.unwrap();

    server.await.unwrap();
    connection.close().await;
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn send_and_forget_resolves_on_commit() {
    let path = socket_path("forget");
    let listener = UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let mut conn = ServerConn::handshake(&listener, ":1.8").await;

        let signal = conn.read_message().await;
        assert_eq!(signal.message_type(), MessageType::SIGNAL);
        assert_eq!(signal.member(), Some("Changed"));

        conn.closed().await;
    });

    let connection = ConnectionBuilder::new()
        .address(&address(&path))
        .connect()
        .await
        .unwrap();

    let signal = Message::signal(
        ObjectPath::new("/com/example").unwrap(),
        "com.example.Iface",
        "Changed",
    )
    .with_flags(Flags::NO_REPLY_EXPECTED);

    connection.send_and_forget(signal).await.unwrap();

    connection.close().await;
    server.await.unwrap();
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn failed_health_checks_tear_the_session_down() {
    let path = socket_path("health");
    let listener = UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let mut conn = ServerConn::handshake(&listener, ":1.9").await;

        // Answer the first ping, then go silent while keeping the
        // transport open.
        let ping = conn.read_message().await;
        assert_eq!(ping.member(), Some("Ping"));
        assert_eq!(ping.interface(), Some("org.freedesktop.DBus.Peer"));

        let reply = conn.reply_to(&ping);
        conn.send(reply).await;

        conn.closed().await;
    });

    let connection = ConnectionBuilder::new()
        .address(&address(&path))
        .health_check(true)
        .health_check_interval(Duration::from_millis(100))
        .health_check_timeout(Duration::from_millis(200))
        .connect()
        .await
        .unwrap();

    // The unanswered second ping takes the connection down.
    wait_for_state(&connection, ConnectionState::Failed).await;

    server.await.unwrap();
    std::fs::remove_file(&path).ok();
}

#[tokio::test]
async fn rejected_authentication_fails_connect() {
    let path = socket_path("authfail");
    let listener = UnixListener::bind(&path).unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut buf = [0u8; 1024];
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0);

        stream.write_all(b"REJECTED KERBEROS_V4\r\n").await.unwrap();

        // Hold the socket open while the client gives up.
        let _ = stream.read(&mut buf).await;
    });

    let error = ConnectionBuilder::new()
        .address(&address(&path))
        .connect()
        .await
        .unwrap_err();

    assert_eq!(error.name(), Some(error_name::AUTH_FAILED));

    server.await.unwrap();
    std::fs::remove_file(&path).ok();
}
