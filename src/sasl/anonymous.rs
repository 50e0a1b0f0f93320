use super::{Challenge, Mechanism, MechanismError, SaslContext};

/// The ANONYMOUS mechanism.
///
/// Sends no initial response and accepts no challenges.
pub(crate) struct Anonymous;

impl Anonymous {
    pub(crate) fn new() -> Self {
        Self
    }
}

impl Mechanism for Anonymous {
    fn name(&self) -> &'static str {
        "ANONYMOUS"
    }

    fn init(&mut self, _: &SaslContext) -> Result<(), MechanismError> {
        Ok(())
    }

    fn initial_response(
        &mut self,
        _: &SaslContext,
    ) -> Result<Option<Vec<u8>>, MechanismError> {
        Ok(None)
    }

    fn process_challenge(&mut self, _: &[u8]) -> Result<Challenge, MechanismError> {
        Err(MechanismError::new("ANONYMOUS does not accept challenges"))
    }

    fn dispose(&mut self) {}
}
