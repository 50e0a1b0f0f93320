use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::sasl::{Anonymous, CookieSha1, External, Mechanism};

use super::connection::Connection;
use super::driver::DriverSetup;
use super::handle::ConnectionHandle;
use super::{ConnectionEventListener, ConnectionState, SerialCounter};

/// Which bus a connection targets.
#[derive(Debug, Clone)]
pub(crate) enum BusKind {
    /// The session bus, resolved from `DBUS_SESSION_BUS_ADDRESS`.
    Session,
    /// The system bus, resolved from `DBUS_SYSTEM_BUS_ADDRESS` with the
    /// well-known fallback.
    System,
    /// An explicit server address.
    Address(String),
}

/// A SASL mechanism selection for [`ConnectionBuilder::auth_mechanisms`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthMechanism {
    /// EXTERNAL, proving identity through socket credentials.
    External,
    /// DBUS_COOKIE_SHA1, proving access to the shared keyring.
    CookieSha1,
    /// ANONYMOUS.
    Anonymous,
}

impl AuthMechanism {
    pub(crate) fn instantiate(self) -> Box<dyn Mechanism> {
        match self {
            AuthMechanism::External => Box::new(External::new()),
            AuthMechanism::CookieSha1 => Box::new(CookieSha1::new()),
            AuthMechanism::Anonymous => Box::new(Anonymous::new()),
        }
    }
}

/// Tunables shared between the builder and the driver.
#[derive(Clone)]
pub(crate) struct Config {
    pub(crate) connect_timeout: Duration,
    pub(crate) method_call_timeout: Duration,
    pub(crate) auto_reconnect: bool,
    pub(crate) reconnect_initial_delay: Duration,
    pub(crate) reconnect_max_delay: Duration,
    pub(crate) reconnect_backoff_multiplier: f64,
    pub(crate) max_reconnect_attempts: u32,
    pub(crate) health_check_enabled: bool,
    pub(crate) health_check_interval: Duration,
    pub(crate) health_check_timeout: Duration,
    pub(crate) shutdown_grace: Duration,
    pub(crate) mechanisms: Vec<AuthMechanism>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            method_call_timeout: Duration::from_secs(30),
            auto_reconnect: false,
            reconnect_initial_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_backoff_multiplier: 2.0,
            max_reconnect_attempts: 0,
            health_check_enabled: false,
            health_check_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
            mechanisms: vec![
                AuthMechanism::External,
                AuthMechanism::CookieSha1,
                AuthMechanism::Anonymous,
            ],
        }
    }
}

/// Builder of a [`Connection`].
///
/// # Examples
///
/// ```no_run
/// use tokio_dbus_client::ConnectionBuilder;
///
/// # async fn example() -> tokio_dbus_client::Result<()> {
/// let connection = ConnectionBuilder::new()
///     .session_bus()
///     .auto_reconnect(true)
///     .connect()
///     .await?;
/// # Ok(()) }
/// ```
pub struct ConnectionBuilder {
    bus: BusKind,
    config: Config,
    listeners: Vec<Arc<dyn ConnectionEventListener>>,
}

impl ConnectionBuilder {
    /// Construct a new [`ConnectionBuilder`] with the default
    /// configuration, targeting the session bus.
    pub fn new() -> Self {
        Self {
            bus: BusKind::Session,
            config: Config::default(),
            listeners: Vec::new(),
        }
    }

    /// Target the session bus (default).
    ///
    /// The address is resolved from `DBUS_SESSION_BUS_ADDRESS` when
    /// connecting.
    pub fn session_bus(mut self) -> Self {
        self.bus = BusKind::Session;
        self
    }

    /// Target the system bus.
    ///
    /// The address is resolved from `DBUS_SYSTEM_BUS_ADDRESS` when
    /// connecting, with the well-known system socket as fallback.
    pub fn system_bus(mut self) -> Self {
        self.bus = BusKind::System;
        self
    }

    /// Target an explicit server address such as `unix:path=/run/bus` or
    /// `tcp:host=localhost,port=7777`.
    pub fn address(mut self, address: &str) -> Self {
        self.bus = BusKind::Address(address.to_owned());
        self
    }

    /// Bound the time for opening the transport, authenticating and
    /// completing `Hello()`. Defaults to 10 seconds.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// The default deadline for method call replies. Defaults to 30
    /// seconds.
    pub fn method_call_timeout(mut self, timeout: Duration) -> Self {
        self.config.method_call_timeout = timeout;
        self
    }

    /// Reconnect automatically when an established connection is lost.
    /// Defaults to off.
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// The delay before the first reconnection attempt. Defaults to 1
    /// second.
    pub fn reconnect_initial_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_initial_delay = delay;
        self
    }

    /// The upper bound on the reconnection delay. Defaults to 30 seconds.
    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_max_delay = delay;
        self
    }

    /// The factor the reconnection delay grows by after each failed
    /// attempt. Defaults to 2.
    pub fn reconnect_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.reconnect_backoff_multiplier = multiplier;
        self
    }

    /// The number of reconnection attempts before failing terminally.
    /// 0 means unlimited, the default.
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Periodically ping the bus to detect silent connection loss.
    /// Defaults to off.
    pub fn health_check(mut self, enabled: bool) -> Self {
        self.config.health_check_enabled = enabled;
        self
    }

    /// The interval between health check pings. Defaults to 30 seconds.
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.config.health_check_interval = interval;
        self
    }

    /// The deadline for a health check reply. Defaults to 5 seconds.
    pub fn health_check_timeout(mut self, timeout: Duration) -> Self {
        self.config.health_check_timeout = timeout;
        self
    }

    /// How long [`Connection::close`] waits for queued writes to drain.
    /// Defaults to 5 seconds.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    /// Override the SASL mechanisms tried, in preference order. Defaults
    /// to EXTERNAL, DBUS_COOKIE_SHA1, ANONYMOUS.
    pub fn auth_mechanisms(mut self, mechanisms: &[AuthMechanism]) -> Self {
        self.config.mechanisms = mechanisms.to_vec();
        self
    }

    /// Register a lifecycle event listener.
    pub fn listener(mut self, listener: impl ConnectionEventListener) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Construct the [`Connection`] without connecting it.
    pub fn build(self) -> Connection {
        let serials = SerialCounter::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(commands_tx, serials);
        let pipeline = Arc::new(Pipeline::new(handle.clone()));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (name_tx, name_rx) = watch::channel(None);
        let (ready_tx, ready_rx) = oneshot::channel();

        let setup = DriverSetup {
            bus: self.bus,
            config: self.config,
            listeners: self.listeners,
            pipeline: pipeline.clone(),
            handle: handle.clone(),
            commands: commands_rx,
            state: state_tx,
            unique_name: name_tx,
            ready: ready_tx,
        };

        Connection::new(handle, pipeline, state_rx, name_rx, setup, ready_rx)
    }

    /// Construct a [`Connection`] and connect it.
    pub async fn connect(self) -> Result<Connection> {
        let connection = self.build();
        connection.connect().await?;
        Ok(connection)
    }
}

impl Default for ConnectionBuilder {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
