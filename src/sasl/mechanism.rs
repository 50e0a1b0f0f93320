use std::path::PathBuf;

use thiserror::Error;

/// An error raised by a SASL mechanism.
///
/// During `init` this means the mechanism is unusable in the current
/// environment and the next one is tried. During a challenge exchange the
/// client answers with `CANCEL` and falls back.
#[derive(Debug, Error)]
#[error("{0}")]
pub(crate) struct MechanismError(Box<str>);

impl MechanismError {
    pub(crate) fn new(message: impl AsRef<str>) -> Self {
        Self(message.as_ref().into())
    }
}

/// The outcome of processing a server challenge.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Challenge {
    /// Respond with the given payload, hex-encoded on the wire.
    Response(Vec<u8>),
    /// Nothing left to send; await the server's `OK`.
    #[allow(dead_code)]
    DoneAwaitingOk,
}

/// Ambient identity consulted by mechanisms.
#[derive(Debug, Clone)]
pub(crate) struct SaslContext {
    /// Numeric user id on Unix.
    pub(crate) uid: u32,
    /// Login name, when known.
    pub(crate) user: Option<String>,
    /// Home directory, used to locate the D-Bus keyring.
    pub(crate) home: Option<PathBuf>,
}

impl SaslContext {
    /// Capture the ambient identity of the current process.
    pub(crate) fn from_env() -> Self {
        let uid = unsafe { libc::getuid() };

        Self {
            uid,
            user: std::env::var("USER")
                .or_else(|_| std::env::var("LOGNAME"))
                .ok(),
            home: std::env::var_os("HOME").map(PathBuf::from),
        }
    }
}

/// A pluggable SASL mechanism.
pub(crate) trait Mechanism: Send {
    /// The ASCII label of the mechanism as it appears on `AUTH` lines.
    fn name(&self) -> &'static str;

    /// Prepare the mechanism. Errors mean the mechanism is unusable and the
    /// next one is tried.
    fn init(&mut self, ctx: &SaslContext) -> Result<(), MechanismError>;

    /// The payload sent with the `AUTH` command, if the mechanism has one.
    fn initial_response(&mut self, ctx: &SaslContext)
        -> Result<Option<Vec<u8>>, MechanismError>;

    /// Process a hex-decoded server challenge.
    fn process_challenge(&mut self, challenge: &[u8]) -> Result<Challenge, MechanismError>;

    /// Release any resources. Idempotent.
    fn dispose(&mut self);
}
