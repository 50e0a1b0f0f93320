//! Server-side support for the standard D-Bus interfaces.
//!
//! Rust has no runtime annotations, so exported objects are described with
//! descriptor metadata instead: an [`ObjectDescriptor`] names a path and
//! the interfaces it implements, with callbacks for methods and property
//! accessors. A [`ServiceHandler`] registered on the pipeline answers
//! `Introspectable`, `Properties` and `Peer` for every registered object
//! and dispatches method calls to the descriptors.

use std::fs;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Message;
use crate::org_freedesktop_dbus::{
    error_name, INTROSPECTABLE_INTERFACE, PEER_INTERFACE, PROPERTIES_INTERFACE,
};
use crate::pipeline::{Handler, HandlerContext};
use crate::proto::MessageType;
use crate::signature::CompleteType;
use crate::value::{Array, Value};
use crate::{ObjectPath, Signature};

/// An error returned by a method callback or property setter, carried back
/// to the caller as a D-Bus `ERROR` reply.
#[derive(Debug, Clone)]
pub struct MethodError {
    name: String,
    message: String,
}

impl MethodError {
    /// Construct an error with an explicit D-Bus error name.
    pub fn new(name: &str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            message: message.to_owned(),
        }
    }

    /// Construct a generic `org.freedesktop.DBus.Error.Failed`.
    pub fn failed(message: &str) -> Self {
        Self::new(error_name::FAILED, message)
    }
}

/// A method callback: receives the decoded body, produces the reply body.
pub type MethodCallback =
    Arc<dyn Fn(&[Value]) -> Result<Vec<Value>, MethodError> + Send + Sync>;

/// A property getter.
pub type PropertyGetter = Arc<dyn Fn() -> Value + Send + Sync>;

/// A property setter.
pub type PropertySetter = Arc<dyn Fn(Value) -> Result<(), MethodError> + Send + Sync>;

/// The access mode of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyAccess {
    /// The property can only be read.
    Read,
    /// The property can only be written.
    Write,
    /// The property can be read and written.
    ReadWrite,
}

impl PropertyAccess {
    fn as_str(self) -> &'static str {
        match self {
            PropertyAccess::Read => "read",
            PropertyAccess::Write => "write",
            PropertyAccess::ReadWrite => "readwrite",
        }
    }

    fn readable(self) -> bool {
        matches!(self, PropertyAccess::Read | PropertyAccess::ReadWrite)
    }

    fn writable(self) -> bool {
        matches!(self, PropertyAccess::Write | PropertyAccess::ReadWrite)
    }
}

/// A named, typed argument of a method or signal.
#[derive(Clone)]
pub struct ArgDescriptor {
    name: String,
    signature: Signature,
}

impl ArgDescriptor {
    /// Construct an argument descriptor.
    pub fn new(name: &str, signature: Signature) -> Self {
        Self {
            name: name.to_owned(),
            signature,
        }
    }
}

/// A method exposed on an interface.
#[derive(Clone)]
pub struct MethodDescriptor {
    name: String,
    inputs: Vec<ArgDescriptor>,
    outputs: Vec<ArgDescriptor>,
    callback: MethodCallback,
}

impl MethodDescriptor {
    /// Construct a method descriptor.
    pub fn new(
        name: &str,
        inputs: Vec<ArgDescriptor>,
        outputs: Vec<ArgDescriptor>,
        callback: MethodCallback,
    ) -> Self {
        Self {
            name: name.to_owned(),
            inputs,
            outputs,
            callback,
        }
    }

    fn input_signature(&self) -> String {
        self.inputs
            .iter()
            .map(|a| a.signature.as_str())
            .collect::<String>()
    }
}

/// A property exposed on an interface.
#[derive(Clone)]
pub struct PropertyDescriptor {
    name: String,
    signature: Signature,
    access: PropertyAccess,
    get: Option<PropertyGetter>,
    set: Option<PropertySetter>,
}

impl PropertyDescriptor {
    /// Construct a property descriptor.
    pub fn new(
        name: &str,
        signature: Signature,
        access: PropertyAccess,
        get: Option<PropertyGetter>,
        set: Option<PropertySetter>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            signature,
            access,
            get,
            set,
        }
    }
}

/// A signal declared on an interface, for introspection.
#[derive(Clone)]
pub struct SignalDescriptor {
    name: String,
    args: Vec<ArgDescriptor>,
}

impl SignalDescriptor {
    /// Construct a signal descriptor.
    pub fn new(name: &str, args: Vec<ArgDescriptor>) -> Self {
        Self {
            name: name.to_owned(),
            args,
        }
    }
}

/// One interface implemented by an exported object.
#[derive(Clone, Default)]
pub struct InterfaceDescriptor {
    name: String,
    methods: Vec<MethodDescriptor>,
    properties: Vec<PropertyDescriptor>,
    signals: Vec<SignalDescriptor>,
}

impl InterfaceDescriptor {
    /// Construct an empty interface descriptor.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    /// Add a method.
    #[must_use]
    pub fn with_method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    /// Add a property.
    #[must_use]
    pub fn with_property(mut self, property: PropertyDescriptor) -> Self {
        self.properties.push(property);
        self
    }

    /// Add a signal.
    #[must_use]
    pub fn with_signal(mut self, signal: SignalDescriptor) -> Self {
        self.signals.push(signal);
        self
    }
}

/// An object exported at a path.
#[derive(Clone)]
pub struct ObjectDescriptor {
    path: ObjectPath,
    interfaces: Vec<InterfaceDescriptor>,
}

impl ObjectDescriptor {
    /// Construct an object descriptor at the given path.
    pub fn new(path: ObjectPath) -> Self {
        Self {
            path,
            interfaces: Vec::new(),
        }
    }

    /// Add an interface.
    #[must_use]
    pub fn with_interface(mut self, interface: InterfaceDescriptor) -> Self {
        self.interfaces.push(interface);
        self
    }
}

/// A pipeline handler answering the standard interfaces for registered
/// objects.
///
/// Register it adjacent to the tail so application handlers run first:
///
/// ```no_run
/// use tokio_dbus_client::{Connection, ServiceHandler};
///
/// # fn example(connection: &Connection) -> tokio_dbus_client::Result<()> {
/// let service = ServiceHandler::new();
/// connection.pipeline().add_last("service", service)?;
/// # Ok(()) }
/// ```
#[derive(Default)]
pub struct ServiceHandler {
    objects: Mutex<Vec<ObjectDescriptor>>,
}

impl ServiceHandler {
    /// Construct a handler with no registered objects.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object.
    pub fn register(&self, object: ObjectDescriptor) {
        self.objects.lock().expect("service lock poisoned").push(object);
    }

    /// Unregister the object at the given path.
    pub fn unregister(&self, path: &ObjectPath) {
        self.objects
            .lock()
            .expect("service lock poisoned")
            .retain(|o| o.path != *path);
    }

    fn respond(&self, ctx: &HandlerContext, call: &Message, body: Vec<Value>) {
        if !call.expects_reply() {
            return;
        }

        if let Ok(reply) = call.reply() {
            let _ = ctx.connection().send(reply.with_body(body));
        }
    }

    fn respond_error(&self, ctx: &HandlerContext, call: &Message, name: &str, text: &str) {
        if !call.expects_reply() {
            return;
        }

        if let Ok(reply) = call.error_reply(name, text) {
            let _ = ctx.connection().send(reply);
        }
    }

    fn handle_call(&self, ctx: &HandlerContext, message: &Message) -> bool {
        let Some(path) = message.path() else {
            return false;
        };

        let objects = self.objects.lock().expect("service lock poisoned");

        let Some(object) = objects.iter().find(|o| o.path.as_str() == path) else {
            // A call below a registered subtree names an object we know
            // does not exist; anything else is not ours.
            let related = objects
                .iter()
                .any(|o| is_parent(o.path.as_str(), path) || is_parent(path, o.path.as_str()));

            if related {
                self.respond_error(
                    ctx,
                    message,
                    error_name::UNKNOWN_OBJECT,
                    &format!("no object exported at {path}"),
                );
                return true;
            }

            return false;
        };

        let member = message.member().unwrap_or_default();

        match message.interface() {
            Some(PEER_INTERFACE) => self.peer(ctx, message, member),
            Some(INTROSPECTABLE_INTERFACE) => {
                self.introspect(ctx, message, object, &objects, member)
            }
            Some(PROPERTIES_INTERFACE) => self.properties(ctx, message, object, member),
            _ => self.user_method(ctx, message, object, member),
        }

        true
    }

    fn peer(&self, ctx: &HandlerContext, message: &Message, member: &str) {
        match member {
            "Ping" => self.respond(ctx, message, Vec::new()),
            "GetMachineId" => match machine_id() {
                Some(id) => self.respond(ctx, message, vec![Value::String(id)]),
                None => self.respond_error(
                    ctx,
                    message,
                    error_name::FAILED,
                    "machine id is not available",
                ),
            },
            _ => self.unknown_method(ctx, message, member),
        }
    }

    fn introspect(
        &self,
        ctx: &HandlerContext,
        message: &Message,
        object: &ObjectDescriptor,
        objects: &[ObjectDescriptor],
        member: &str,
    ) {
        if member != "Introspect" {
            self.unknown_method(ctx, message, member);
            return;
        }

        let xml = introspection_xml(object, objects);
        self.respond(ctx, message, vec![Value::String(xml)]);
    }

    fn properties(
        &self,
        ctx: &HandlerContext,
        message: &Message,
        object: &ObjectDescriptor,
        member: &str,
    ) {
        match member {
            "Get" => {
                let [Value::String(interface), Value::String(name)] = message.body() else {
                    self.respond_error(
                        ctx,
                        message,
                        error_name::INVALID_ARGS,
                        "expected (ss)",
                    );
                    return;
                };

                match find_property(object, interface, name) {
                    Ok(property) => match (&property.get, property.access.readable()) {
                        (Some(get), true) => {
                            let value = Value::Variant(Box::new(get()));
                            self.respond(ctx, message, vec![value]);
                        }
                        _ => self.respond_error(
                            ctx,
                            message,
                            error_name::ACCESS_DENIED,
                            &format!("property {name} is not readable"),
                        ),
                    },
                    Err((name, text)) => self.respond_error(ctx, message, name, &text),
                }
            }
            "Set" => {
                let [Value::String(interface), Value::String(name), Value::Variant(value)] =
                    message.body()
                else {
                    self.respond_error(
                        ctx,
                        message,
                        error_name::INVALID_ARGS,
                        "expected (ssv)",
                    );
                    return;
                };

                match find_property(object, interface, name) {
                    Ok(property) => match (&property.set, property.access.writable()) {
                        (Some(set), true) => {
                            let expected = property.signature.types();

                            if expected.len() != 1 || expected[0] != value.complete_type() {
                                self.respond_error(
                                    ctx,
                                    message,
                                    error_name::INVALID_ARGS,
                                    &format!("property {name} has type {}", property.signature),
                                );
                                return;
                            }

                            match set((**value).clone()) {
                                Ok(()) => self.respond(ctx, message, Vec::new()),
                                Err(error) => self.respond_error(
                                    ctx,
                                    message,
                                    &error.name,
                                    &error.message,
                                ),
                            }
                        }
                        _ => self.respond_error(
                            ctx,
                            message,
                            error_name::PROPERTY_READ_ONLY,
                            &format!("property {name} is not writable"),
                        ),
                    },
                    Err((name, text)) => self.respond_error(ctx, message, name, &text),
                }
            }
            "GetAll" => {
                let [Value::String(interface)] = message.body() else {
                    self.respond_error(ctx, message, error_name::INVALID_ARGS, "expected (s)");
                    return;
                };

                let Some(interface) = object.interfaces.iter().find(|i| i.name == *interface)
                else {
                    self.respond_error(
                        ctx,
                        message,
                        error_name::UNKNOWN_INTERFACE,
                        &format!("no interface {interface}"),
                    );
                    return;
                };

                let entry_type = CompleteType::DictEntry(
                    Box::new(CompleteType::String),
                    Box::new(CompleteType::Variant),
                );

                let mut dict = Array::new(entry_type);

                for property in &interface.properties {
                    if let (Some(get), true) = (&property.get, property.access.readable()) {
                        let entry = Value::DictEntry(
                            Box::new(Value::String(property.name.clone())),
                            Box::new(Value::Variant(Box::new(get()))),
                        );

                        // Entries match the element type by construction.
                        let _ = dict.push(entry);
                    }
                }

                self.respond(ctx, message, vec![Value::Array(dict)]);
            }
            _ => self.unknown_method(ctx, message, member),
        }
    }

    fn user_method(
        &self,
        ctx: &HandlerContext,
        message: &Message,
        object: &ObjectDescriptor,
        member: &str,
    ) {
        let interfaces: Vec<&InterfaceDescriptor> = match message.interface() {
            Some(name) => {
                let Some(interface) = object.interfaces.iter().find(|i| i.name == name) else {
                    self.respond_error(
                        ctx,
                        message,
                        error_name::UNKNOWN_INTERFACE,
                        &format!("no interface {name}"),
                    );
                    return;
                };

                vec![interface]
            }
            None => object.interfaces.iter().collect(),
        };

        let Some(method) = interfaces
            .iter()
            .flat_map(|i| i.methods.iter())
            .find(|m| m.name == member)
        else {
            self.unknown_method(ctx, message, member);
            return;
        };

        if message.body_signature().as_str() != method.input_signature() {
            self.respond_error(
                ctx,
                message,
                error_name::INVALID_ARGS,
                &format!("expected signature {:?}", method.input_signature()),
            );
            return;
        }

        match (method.callback)(message.body()) {
            Ok(body) => self.respond(ctx, message, body),
            Err(error) => self.respond_error(ctx, message, &error.name, &error.message),
        }
    }

    fn unknown_method(&self, ctx: &HandlerContext, message: &Message, member: &str) {
        self.respond_error(
            ctx,
            message,
            error_name::UNKNOWN_METHOD,
            &format!("no method {member}"),
        );
    }
}

#[async_trait]
impl Handler for ServiceHandler {
    async fn on_inbound_message(
        &self,
        ctx: &HandlerContext,
        message: Message,
    ) -> Result<Option<Message>> {
        if message.message_type() != MessageType::METHOD_CALL {
            return Ok(Some(message));
        }

        if self.handle_call(ctx, &message) {
            return Ok(None);
        }

        Ok(Some(message))
    }
}

fn find_property<'o>(
    object: &'o ObjectDescriptor,
    interface: &str,
    name: &str,
) -> Result<&'o PropertyDescriptor, (&'static str, String)> {
    let Some(interface) = object.interfaces.iter().find(|i| i.name == interface) else {
        return Err((
            error_name::UNKNOWN_INTERFACE,
            format!("no interface {interface}"),
        ));
    };

    let Some(property) = interface.properties.iter().find(|p| p.name == name) else {
        return Err((error_name::UNKNOWN_PROPERTY, format!("no property {name}")));
    };

    Ok(property)
}

/// Test if `parent` is a proper path prefix of `child`.
fn is_parent(parent: &str, child: &str) -> bool {
    if parent == "/" {
        return child != "/";
    }

    child
        .strip_prefix(parent)
        .is_some_and(|rest| rest.starts_with('/'))
}

fn machine_id() -> Option<String> {
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(contents) = fs::read_to_string(path) {
            let id = contents.trim();

            if !id.is_empty() {
                return Some(id.to_owned());
            }
        }
    }

    None
}

fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());

    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }

    out
}

fn introspection_xml(object: &ObjectDescriptor, objects: &[ObjectDescriptor]) -> String {
    let mut xml = String::new();

    xml.push_str(
        "<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n \
         \"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n",
    );
    xml.push_str("<node>\n");

    for name in [INTROSPECTABLE_INTERFACE, PROPERTIES_INTERFACE, PEER_INTERFACE] {
        xml.push_str(&format!("  <interface name=\"{name}\"/>\n"));
    }

    for interface in &object.interfaces {
        xml.push_str(&format!(
            "  <interface name=\"{}\">\n",
            escape_xml(&interface.name)
        ));

        for method in &interface.methods {
            xml.push_str(&format!("    <method name=\"{}\">\n", escape_xml(&method.name)));

            for arg in &method.inputs {
                xml.push_str(&format!(
                    "      <arg name=\"{}\" type=\"{}\" direction=\"in\"/>\n",
                    escape_xml(&arg.name),
                    arg.signature
                ));
            }

            for arg in &method.outputs {
                xml.push_str(&format!(
                    "      <arg name=\"{}\" type=\"{}\" direction=\"out\"/>\n",
                    escape_xml(&arg.name),
                    arg.signature
                ));
            }

            xml.push_str("    </method>\n");
        }

        for property in &interface.properties {
            xml.push_str(&format!(
                "    <property name=\"{}\" type=\"{}\" access=\"{}\"/>\n",
                escape_xml(&property.name),
                property.signature,
                property.access.as_str()
            ));
        }

        for signal in &interface.signals {
            xml.push_str(&format!("    <signal name=\"{}\">\n", escape_xml(&signal.name)));

            for arg in &signal.args {
                xml.push_str(&format!(
                    "      <arg name=\"{}\" type=\"{}\"/>\n",
                    escape_xml(&arg.name),
                    arg.signature
                ));
            }

            xml.push_str("    </signal>\n");
        }

        xml.push_str("  </interface>\n");
    }

    for other in objects {
        if is_parent(object.path.as_str(), other.path.as_str()) {
            let rest = match object.path.as_str() {
                "/" => &other.path.as_str()[1..],
                parent => &other.path.as_str()[parent.len() + 1..],
            };

            // Only announce direct children.
            if let Some(child) = rest.split('/').next() {
                if !child.is_empty() {
                    xml.push_str(&format!("  <node name=\"{}\"/>\n", escape_xml(child)));
                }
            }
        }
    }

    xml.push_str("</node>\n");
    xml
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::{
        ArgDescriptor, InterfaceDescriptor, MethodDescriptor, ObjectDescriptor,
        PropertyAccess, PropertyDescriptor, ServiceHandler,
    };
    use crate::connection::{Command, ConnectionHandle, SerialCounter};
    use crate::message::Message;
    use crate::org_freedesktop_dbus::{
        error_name, INTROSPECTABLE_INTERFACE, PEER_INTERFACE, PROPERTIES_INTERFACE,
    };
    use crate::pipeline::{Handler, HandlerContext};
    use crate::value::Value;
    use crate::{ObjectPath, Signature};

    fn context() -> (HandlerContext, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(tx, SerialCounter::new());

        let ctx = HandlerContext {
            name: "service".into(),
            handle,
        };

        (ctx, rx)
    }

    fn calculator() -> ServiceHandler {
        let counter = Arc::new(AtomicU32::new(7));
        let read_counter = counter.clone();

        let service = ServiceHandler::new();

        service.register(
            ObjectDescriptor::new(ObjectPath::new("/com/example/Calc").unwrap()).with_interface(
                InterfaceDescriptor::new("com.example.Calculator")
                    .with_method(MethodDescriptor::new(
                        "Add",
                        vec![
                            ArgDescriptor::new("a", Signature::new("i").unwrap()),
                            ArgDescriptor::new("b", Signature::new("i").unwrap()),
                        ],
                        vec![ArgDescriptor::new("sum", Signature::new("i").unwrap())],
                        Arc::new(|body| {
                            let (Some(Value::Int32(a)), Some(Value::Int32(b))) =
                                (body.first(), body.get(1))
                            else {
                                return Err(super::MethodError::failed("bad arguments"));
                            };

                            Ok(vec![Value::Int32(a + b)])
                        }),
                    ))
                    .with_property(PropertyDescriptor::new(
                        "Count",
                        Signature::new("u").unwrap(),
                        PropertyAccess::Read,
                        Some(Arc::new(move || {
                            Value::Uint32(read_counter.load(Ordering::Relaxed))
                        })),
                        None,
                    )),
            ),
        );

        service
    }

    fn call(interface: &str, member: &str) -> Message {
        Message::method_call(ObjectPath::new("/com/example/Calc").unwrap(), member)
            .with_interface(interface)
            .with_sender(":1.9")
            .with_serial(std::num::NonZeroU32::new(11).unwrap())
    }

    async fn reply_for(
        service: &ServiceHandler,
        message: Message,
    ) -> (Message, mpsc::UnboundedReceiver<Command>) {
        let (ctx, mut rx) = context();

        let consumed = service
            .on_inbound_message(&ctx, message)
            .await
            .unwrap()
            .is_none();
        assert!(consumed, "service should consume calls to its objects");

        let Some(Command::Send { message, .. }) = rx.recv().await else {
            panic!("expected a reply");
        };

        (message, rx)
    }

    #[tokio::test]
    async fn dispatches_user_methods() {
        let service = calculator();

        let call = call("com.example.Calculator", "Add")
            .with_body(vec![Value::Int32(2), Value::Int32(40)]);

        let (reply, _rx) = reply_for(&service, call).await;
        assert_eq!(reply.body(), &[Value::Int32(42)]);
        assert_eq!(reply.destination(), Some(":1.9"));
    }

    #[tokio::test]
    async fn signature_mismatch_is_invalid_args() {
        let service = calculator();

        let call =
            call("com.example.Calculator", "Add").with_body(vec![Value::String("x".into())]);

        let (reply, _rx) = reply_for(&service, call).await;
        assert_eq!(reply.error_name(), Some(error_name::INVALID_ARGS));
    }

    #[tokio::test]
    async fn unknown_member_and_interface() {
        let service = calculator();

        let (reply, _rx) = reply_for(&service, call("com.example.Calculator", "Divide")).await;
        assert_eq!(reply.error_name(), Some(error_name::UNKNOWN_METHOD));

        let (reply, _rx) = reply_for(&service, call("com.example.Nope", "Add")).await;
        assert_eq!(reply.error_name(), Some(error_name::UNKNOWN_INTERFACE));
    }

    #[tokio::test]
    async fn peer_ping_and_properties() {
        let service = calculator();

        let (reply, _rx) = reply_for(&service, call(PEER_INTERFACE, "Ping")).await;
        assert!(reply.body().is_empty());
        assert!(reply.error_name().is_none());

        let get = call(PROPERTIES_INTERFACE, "Get").with_body(vec![
            Value::String("com.example.Calculator".into()),
            Value::String("Count".into()),
        ]);

        let (reply, _rx) = reply_for(&service, get).await;
        let Some(Value::Variant(value)) = reply.body().first() else {
            panic!("expected a variant: {:?}", reply.body());
        };
        assert_eq!(**value, Value::Uint32(7));

        let get_all = call(PROPERTIES_INTERFACE, "GetAll")
            .with_body(vec![Value::String("com.example.Calculator".into())]);

        let (reply, _rx) = reply_for(&service, get_all).await;
        let Some(Value::Array(dict)) = reply.body().first() else {
            panic!("expected a dict: {:?}", reply.body());
        };
        assert_eq!(dict.len(), 1);
    }

    #[tokio::test]
    async fn read_only_property_rejects_writes() {
        let service = calculator();

        let set = call(PROPERTIES_INTERFACE, "Set").with_body(vec![
            Value::String("com.example.Calculator".into()),
            Value::String("Count".into()),
            Value::Variant(Box::new(Value::Uint32(1))),
        ]);

        let (reply, _rx) = reply_for(&service, set).await;
        assert_eq!(reply.error_name(), Some(error_name::PROPERTY_READ_ONLY));
    }

    #[tokio::test]
    async fn introspection_lists_interfaces() {
        let service = calculator();

        let (reply, _rx) = reply_for(&service, call(INTROSPECTABLE_INTERFACE, "Introspect")).await;
        let Some(Value::String(xml)) = reply.body().first() else {
            panic!("expected xml: {:?}", reply.body());
        };

        assert!(xml.contains("<interface name=\"com.example.Calculator\">"));
        assert!(xml.contains("<method name=\"Add\">"));
        assert!(xml.contains("<property name=\"Count\" type=\"u\" access=\"read\"/>"));
        assert!(xml.contains("org.freedesktop.DBus.Peer"));
    }

    #[tokio::test]
    async fn unrelated_messages_propagate() {
        let service = calculator();
        let (ctx, _rx) = context();

        let unrelated = Message::method_call(ObjectPath::new("/org/elsewhere").unwrap(), "M")
            .with_serial(std::num::NonZeroU32::new(3).unwrap());

        let passed = service
            .on_inbound_message(&ctx, unrelated)
            .await
            .unwrap();
        assert!(passed.is_some());
    }

    #[tokio::test]
    async fn child_paths_report_unknown_object() {
        let service = calculator();

        let below = Message::method_call(
            ObjectPath::new("/com/example/Calc/child").unwrap(),
            "M",
        )
        .with_interface("com.example.Calculator")
        .with_sender(":1.9")
        .with_serial(std::num::NonZeroU32::new(5).unwrap());

        let (reply, _rx) = reply_for(&service, below).await;
        assert_eq!(reply.error_name(), Some(error_name::UNKNOWN_OBJECT));
    }
}
