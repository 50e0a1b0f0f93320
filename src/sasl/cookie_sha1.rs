use std::fs;
use std::path::PathBuf;

use rand::RngCore;
use sha1::{Digest, Sha1};

use super::{Challenge, Mechanism, MechanismError, SaslContext};

/// The DBUS_COOKIE_SHA1 mechanism.
///
/// Proves access to a cookie file shared with the server under
/// `$HOME/.dbus-keyrings`. The initial response is the username; the single
/// challenge carries the keyring context, a cookie id and a server
/// challenge, answered with a fresh client challenge and a SHA-1 digest
/// over `server:client:cookie`.
pub(crate) struct CookieSha1 {
    username: Option<String>,
    keyrings: Option<PathBuf>,
    answered: bool,
}

impl CookieSha1 {
    pub(crate) fn new() -> Self {
        Self {
            username: None,
            keyrings: None,
            answered: false,
        }
    }

    fn lookup_cookie(&self, context: &str, id: &str) -> Result<String, MechanismError> {
        // Keyring contexts name files, so path separators are hostile.
        if context.is_empty() || context.contains('/') || context.contains("..") {
            return Err(MechanismError::new("invalid keyring context"));
        }

        let Some(keyrings) = &self.keyrings else {
            return Err(MechanismError::new("no home directory for the keyring"));
        };

        let path = keyrings.join(context);

        let contents = fs::read_to_string(&path).map_err(|e| {
            MechanismError::new(format!("cannot read keyring {}: {e}", path.display()))
        })?;

        for line in contents.lines() {
            let mut parts = line.split_whitespace();

            let (Some(cookie_id), Some(_created), Some(cookie)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };

            if cookie_id == id {
                return Ok(cookie.to_owned());
            }
        }

        Err(MechanismError::new(format!(
            "cookie {id} not present in keyring {context}"
        )))
    }
}

impl Mechanism for CookieSha1 {
    fn name(&self) -> &'static str {
        "DBUS_COOKIE_SHA1"
    }

    fn init(&mut self, ctx: &SaslContext) -> Result<(), MechanismError> {
        let Some(home) = &ctx.home else {
            return Err(MechanismError::new(
                "DBUS_COOKIE_SHA1 requires a home directory",
            ));
        };

        self.username = Some(
            ctx.user
                .clone()
                .unwrap_or_else(|| ctx.uid.to_string()),
        );
        self.keyrings = Some(home.join(".dbus-keyrings"));
        self.answered = false;
        Ok(())
    }

    fn initial_response(
        &mut self,
        _: &SaslContext,
    ) -> Result<Option<Vec<u8>>, MechanismError> {
        match &self.username {
            Some(username) => Ok(Some(username.clone().into_bytes())),
            None => Err(MechanismError::new("DBUS_COOKIE_SHA1 was not initialized")),
        }
    }

    fn process_challenge(&mut self, challenge: &[u8]) -> Result<Challenge, MechanismError> {
        if self.answered {
            return Err(MechanismError::new("unexpected second challenge"));
        }

        let challenge = std::str::from_utf8(challenge)
            .map_err(|_| MechanismError::new("challenge is not valid UTF-8"))?;

        let mut parts = challenge.split_whitespace();

        let (Some(context), Some(cookie_id), Some(server_challenge)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(MechanismError::new("malformed cookie challenge"));
        };

        if parts.next().is_some() {
            return Err(MechanismError::new("malformed cookie challenge"));
        }

        let cookie = self.lookup_cookie(context, cookie_id)?;

        let mut random = [0u8; 40];
        rand::thread_rng().fill_bytes(&mut random);
        let client_challenge = hex::encode(random);

        let digest = Sha1::digest(
            format!("{server_challenge}:{client_challenge}:{cookie}").as_bytes(),
        );

        self.answered = true;

        Ok(Challenge::Response(
            format!("{client_challenge} {}", hex::encode(digest)).into_bytes(),
        ))
    }

    fn dispose(&mut self) {
        self.username = None;
        self.keyrings = None;
        self.answered = false;
    }
}
