//! The line-oriented SASL authentication dialogue D-Bus performs before the
//! binary protocol starts.
//!
//! The client drives a [`SaslClient`] state machine with server lines and
//! writes out the lines it produces. The machine is transport-agnostic: the
//! connection controller owns the socket, feeds CRLF-delimited lines in and
//! flushes produced lines out, starting with the single NUL byte the
//! protocol requires before the first `AUTH`.


pub(crate) use self::mechanism::{Challenge, Mechanism, MechanismError, SaslContext};
mod mechanism;

pub(crate) use self::anonymous::Anonymous;
mod anonymous;

pub(crate) use self::cookie_sha1::CookieSha1;
mod cookie_sha1;

pub(crate) use self::external::External;
mod external;

use crate::error::{ErrorKind, Result};

/// The maximum length of a single SASL line including the CRLF terminator.
pub(crate) const MAX_LINE_LENGTH: usize = 2048;

/// A parsed server line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ServerLine {
    /// Authentication succeeded; carries the server GUID.
    Ok(String),
    /// The current exchange was rejected; carries the mechanisms the server
    /// supports.
    Rejected(Vec<String>),
    /// A challenge from the server, hex-decoded.
    Data(Vec<u8>),
    /// The server did not understand or accept the last command.
    Error(Option<String>),
    /// The server agreed to pass file descriptors. Never solicited by this
    /// client.
    AgreeUnixFd,
}

impl ServerLine {
    /// Parse a single server line, without its CRLF terminator.
    pub(crate) fn parse(line: &[u8]) -> Result<Self> {
        if !line.is_ascii() {
            return Err(ErrorKind::InvalidSasl.into());
        }

        let line = std::str::from_utf8(line)?;
        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, Some(rest)),
            None => (line, None),
        };

        let line = match command {
            "OK" => {
                let Some(guid) = rest else {
                    return Err(ErrorKind::InvalidSasl.into());
                };

                ServerLine::Ok(guid.trim().to_owned())
            }
            "REJECTED" => ServerLine::Rejected(
                rest.unwrap_or("")
                    .split_whitespace()
                    .map(str::to_owned)
                    .collect(),
            ),
            "DATA" => {
                let payload = rest.unwrap_or("").trim();

                let Ok(bytes) = hex::decode(payload) else {
                    return Err(ErrorKind::InvalidSasl.into());
                };

                ServerLine::Data(bytes)
            }
            "ERROR" => ServerLine::Error(rest.map(str::to_owned)),
            "AGREE_UNIX_FD" => ServerLine::AgreeUnixFd,
            _ => return Err(ErrorKind::InvalidSasl.into()),
        };

        Ok(line)
    }
}

/// The observable state of the SASL dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SaslState {
    /// No line has been exchanged yet.
    Idle,
    /// The initial empty `AUTH` was sent, awaiting the server mechanism
    /// list.
    AwaitingServerMechs,
    /// A mechanism exchange is in progress.
    Negotiating,
    /// The server accepted; `BEGIN` has been produced.
    Authenticated,
    /// Every mechanism was exhausted.
    Failed,
}

/// The action produced by advancing the state machine.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SaslStep {
    /// Send the line to the server.
    Send(Vec<u8>),
    /// Wait for more server input without sending anything.
    Wait,
    /// Authentication completed. Send the final line (`BEGIN`); the next
    /// byte read is the first byte of a D-Bus message.
    Authenticated {
        /// The GUID the server reported with `OK`.
        guid: String,
        /// The `BEGIN` line to send.
        line: Vec<u8>,
    },
}

/// The client side of the SASL dialogue with pluggable mechanisms.
pub(crate) struct SaslClient {
    state: SaslState,
    ctx: SaslContext,
    mechanisms: Vec<Box<dyn Mechanism>>,
    /// Index of the mechanism currently negotiating.
    current: Option<usize>,
    /// Index of the next mechanism to try on rejection.
    next_index: usize,
    /// Mechanisms the server advertised with its last `REJECTED`.
    server_mechs: Option<Vec<String>>,
    guid: Option<String>,
}

impl SaslClient {
    /// Construct a client over the given mechanisms, tried in order.
    pub(crate) fn new(ctx: SaslContext, mechanisms: Vec<Box<dyn Mechanism>>) -> Self {
        Self {
            state: SaslState::Idle,
            ctx,
            mechanisms,
            current: None,
            next_index: 0,
            server_mechs: None,
            guid: None,
        }
    }

    /// Construct a client with the default mechanism preference:
    /// EXTERNAL, DBUS_COOKIE_SHA1, ANONYMOUS.
    pub(crate) fn with_default_mechanisms(ctx: SaslContext) -> Self {
        Self::new(
            ctx,
            vec![
                Box::new(External::new()),
                Box::new(CookieSha1::new()),
                Box::new(Anonymous::new()),
            ],
        )
    }

    /// The current state of the dialogue.
    #[inline]
    pub(crate) fn state(&self) -> SaslState {
        self.state
    }

    /// The GUID reported by the server, available once authenticated.
    #[inline]
    #[allow(dead_code)]
    pub(crate) fn guid(&self) -> Option<&str> {
        self.guid.as_deref()
    }

    /// Produce the initial empty `AUTH` line. The caller must have written
    /// the single NUL byte beforehand.
    pub(crate) fn initial_auth(&mut self) -> Vec<u8> {
        self.state = SaslState::AwaitingServerMechs;
        b"AUTH\r\n".to_vec()
    }

    /// Advance the state machine with one server line (no CRLF).
    pub(crate) fn advance(&mut self, line: &[u8]) -> Result<SaslStep> {
        let line = ServerLine::parse(line)?;

        match (self.state, line) {
            (SaslState::AwaitingServerMechs | SaslState::Negotiating, ServerLine::Rejected(mechs)) => {
                self.dispose_current();
                self.server_mechs = Some(mechs);
                self.try_next_mechanism()
            }
            (SaslState::AwaitingServerMechs | SaslState::Negotiating, ServerLine::Ok(guid)) => {
                self.dispose_current();
                self.state = SaslState::Authenticated;
                self.guid = Some(guid.clone());

                Ok(SaslStep::Authenticated {
                    guid,
                    line: b"BEGIN\r\n".to_vec(),
                })
            }
            (SaslState::Negotiating, ServerLine::Data(challenge)) => {
                let Some(index) = self.current else {
                    return Err(ErrorKind::InvalidSasl.into());
                };

                match self.mechanisms[index].process_challenge(&challenge) {
                    Ok(Challenge::Response(response)) => {
                        let mut line = b"DATA ".to_vec();
                        line.extend_from_slice(hex::encode(&response).as_bytes());
                        line.extend_from_slice(b"\r\n");
                        Ok(SaslStep::Send(line))
                    }
                    Ok(Challenge::DoneAwaitingOk) => Ok(SaslStep::Wait),
                    Err(error) => {
                        tracing::debug!(mechanism = self.mechanisms[index].name(), %error, "mechanism failed to process challenge");
                        Ok(SaslStep::Send(b"CANCEL\r\n".to_vec()))
                    }
                }
            }
            (SaslState::AwaitingServerMechs | SaslState::Negotiating, ServerLine::Error(message)) => {
                tracing::debug!(?message, "server reported an authentication error");
                Ok(SaslStep::Send(b"CANCEL\r\n".to_vec()))
            }
            (_, ServerLine::AgreeUnixFd) => {
                // Never solicited; the dialogue is out of sync.
                Err(ErrorKind::InvalidSasl.into())
            }
            (_, _) => Err(ErrorKind::InvalidSasl.into()),
        }
    }

    /// Move to the next mechanism supported by both sides and produce its
    /// `AUTH` line.
    fn try_next_mechanism(&mut self) -> Result<SaslStep> {
        while self.next_index < self.mechanisms.len() {
            let index = self.next_index;
            self.next_index += 1;

            if let Some(server) = &self.server_mechs {
                if !server.iter().any(|m| m == self.mechanisms[index].name()) {
                    continue;
                }
            }

            if let Err(error) = self.mechanisms[index].init(&self.ctx) {
                tracing::debug!(mechanism = self.mechanisms[index].name(), %error, "mechanism unusable");
                continue;
            }

            let response = match self.mechanisms[index].initial_response(&self.ctx) {
                Ok(response) => response,
                Err(error) => {
                    tracing::debug!(mechanism = self.mechanisms[index].name(), %error, "mechanism failed to produce an initial response");
                    self.mechanisms[index].dispose();
                    continue;
                }
            };

            let mut line = b"AUTH ".to_vec();
            line.extend_from_slice(self.mechanisms[index].name().as_bytes());

            if let Some(response) = response {
                line.push(b' ');
                line.extend_from_slice(hex::encode(&response).as_bytes());
            }

            line.extend_from_slice(b"\r\n");

            self.current = Some(index);
            self.state = SaslState::Negotiating;
            return Ok(SaslStep::Send(line));
        }

        self.state = SaslState::Failed;
        Err(ErrorKind::AuthFailed("every usable SASL mechanism was rejected".into()).into())
    }

    fn dispose_current(&mut self) {
        if let Some(index) = self.current.take() {
            self.mechanisms[index].dispose();
        }
    }
}
