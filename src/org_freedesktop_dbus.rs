//! Types associated with the `org.freedesktop.DBus` interface.

/// Well known destination name.
pub const DESTINATION: &str = "org.freedesktop.DBus";

/// Well known interface name.
pub const INTERFACE: &str = "org.freedesktop.DBus";

/// Well known D-Bus path.
pub const PATH: &str = "/org/freedesktop/DBus";

/// The `org.freedesktop.DBus.Peer` interface.
pub const PEER_INTERFACE: &str = "org.freedesktop.DBus.Peer";

/// The `org.freedesktop.DBus.Introspectable` interface.
pub const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";

/// The `org.freedesktop.DBus.Properties` interface.
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Standard D-Bus error names.
pub mod error_name {
    /// Generic failure, also used by the pipeline tail for unhandled calls.
    pub const FAILED: &str = "org.freedesktop.DBus.Error.Failed";
    /// The destination bus name has no owner.
    pub const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
    /// No such method on the interface.
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    /// No such interface on the object.
    pub const UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";
    /// No such object path.
    pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
    /// No such property on the interface.
    pub const UNKNOWN_PROPERTY: &str = "org.freedesktop.DBus.Error.UnknownProperty";
    /// A read-only property was written.
    pub const PROPERTY_READ_ONLY: &str = "org.freedesktop.DBus.Error.PropertyReadOnly";
    /// Arguments did not match the expected signature or semantics.
    pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
    /// A signature was syntactically or semantically invalid.
    pub const INVALID_SIGNATURE: &str = "org.freedesktop.DBus.Error.InvalidSignature";
    /// A message was inconsistent with its own header.
    pub const INCONSISTENT_MESSAGE: &str = "org.freedesktop.DBus.Error.InconsistentMessage";
    /// The caller is not authorized.
    pub const ACCESS_DENIED: &str = "org.freedesktop.DBus.Error.AccessDenied";
    /// The operation requires interactive authorization.
    pub const INTERACTIVE_AUTHORIZATION_REQUIRED: &str =
        "org.freedesktop.DBus.Error.InteractiveAuthorizationRequired";
    /// No reply arrived before the deadline.
    pub const NO_REPLY: &str = "org.freedesktop.DBus.Error.NoReply";
    /// An operation timed out.
    pub const TIMEOUT: &str = "org.freedesktop.DBus.Error.Timeout";
    /// The connection was lost while waiting.
    pub const DISCONNECTED: &str = "org.freedesktop.DBus.Error.Disconnected";
    /// Authentication did not complete.
    pub const AUTH_FAILED: &str = "org.freedesktop.DBus.Error.AuthFailed";
    /// A bus address could not be parsed.
    pub const BAD_ADDRESS: &str = "org.freedesktop.DBus.Error.BadAddress";
    /// No server was listening at the address.
    pub const NO_SERVER: &str = "org.freedesktop.DBus.Error.NoServer";
    /// The address is already in use.
    pub const ADDRESS_IN_USE: &str = "org.freedesktop.DBus.Error.AddressInUse";
    /// A resource limit was exceeded.
    pub const LIMITS_EXCEEDED: &str = "org.freedesktop.DBus.Error.LimitsExceeded";
    /// Memory could not be allocated.
    pub const NO_MEMORY: &str = "org.freedesktop.DBus.Error.NoMemory";
}

raw_set! {
    /// The flags to a `RequestName` call.
    #[repr(u32)]
    pub enum NameFlag {
        /// Allow another application which requests the name with
        /// `REPLACE_EXISTING` to take ownership away from us.
        ALLOW_REPLACEMENT = 1,
        /// Try to replace the current owner if there is one.
        REPLACE_EXISTING = 2,
        /// Do not queue for ownership if the name is taken, fail the request
        /// instead.
        DO_NOT_QUEUE = 4,
    }
}

raw_enum! {
    /// The reply to a `RequestName` call.
    #[repr(u32)]
    pub enum NameReply {
        /// The caller is now the primary owner of the name.
        PRIMARY_OWNER = 1,
        /// The name already had an owner and the caller was placed in the
        /// queue.
        IN_QUEUE = 2,
        /// The name already has an owner and queueing was declined.
        EXISTS = 3,
        /// The caller already owns the name.
        ALREADY_OWNER = 4,
    }
}

raw_enum! {
    /// The reply to a `ReleaseName` call.
    #[repr(u32)]
    pub enum ReleaseNameReply {
        /// The name has been released.
        RELEASED = 1,
        /// The name does not exist on the bus.
        NON_EXISTENT = 2,
        /// The caller was not the owner and not in the queue.
        NOT_OWNER = 3,
    }
}
