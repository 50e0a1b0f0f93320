use super::{Challenge, Mechanism, MechanismError, SaslContext};

/// The EXTERNAL mechanism.
///
/// The identity is the decimal UID of the process, carried out-of-band by
/// the socket credentials. There are no challenges.
pub(crate) struct External {
    identity: Option<Vec<u8>>,
}

impl External {
    pub(crate) fn new() -> Self {
        Self { identity: None }
    }
}

impl Mechanism for External {
    fn name(&self) -> &'static str {
        "EXTERNAL"
    }

    fn init(&mut self, ctx: &SaslContext) -> Result<(), MechanismError> {
        self.identity = Some(ctx.uid.to_string().into_bytes());
        Ok(())
    }

    fn initial_response(
        &mut self,
        _: &SaslContext,
    ) -> Result<Option<Vec<u8>>, MechanismError> {
        match self.identity.clone() {
            Some(identity) => Ok(Some(identity)),
            None => Err(MechanismError::new("EXTERNAL was not initialized")),
        }
    }

    fn process_challenge(&mut self, _: &[u8]) -> Result<Challenge, MechanismError> {
        Err(MechanismError::new("EXTERNAL does not accept challenges"))
    }

    fn dispose(&mut self) {
        self.identity = None;
    }
}
