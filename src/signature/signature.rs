use core::fmt;

use super::{parse, CompleteType, SignatureError};

/// A validated D-Bus signature.
///
/// # Examples
///
/// ```
/// use tokio_dbus_client::Signature;
///
/// let signature = Signature::new("a{sv}")?;
/// assert_eq!(signature.to_string(), "a{sv}");
/// assert!(signature.is_single());
/// # Ok::<_, tokio_dbus_client::SignatureError>(())
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    inner: Box<str>,
}

impl Signature {
    /// Construct a new signature, validating the sequence of type codes.
    ///
    /// # Examples
    ///
    /// ```
    /// use tokio_dbus_client::Signature;
    ///
    /// assert!(Signature::new("aai").is_ok());
    /// assert!(Signature::new("a").is_err());
    /// ```
    pub fn new(signature: &str) -> Result<Self, SignatureError> {
        parse(signature.as_bytes())?;

        Ok(Self {
            inner: signature.into(),
        })
    }

    /// The empty signature.
    pub fn empty() -> Self {
        Self { inner: "".into() }
    }

    /// Construct a signature from a sequence of parsed types.
    pub fn from_types(types: &[CompleteType]) -> Self {
        let mut inner = String::new();

        for ty in types {
            ty.write_code(&mut inner);
        }

        Self {
            inner: inner.into(),
        }
    }

    /// Access the signature as a string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Test if the signature is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Parse the signature into its sequence of single complete types.
    ///
    /// The signature was validated on construction, so this cannot fail.
    pub fn types(&self) -> Vec<CompleteType> {
        parse(self.inner.as_bytes()).expect("signature validated on construction")
    }

    /// Test if the signature consists of exactly one single complete type.
    pub fn is_single(&self) -> bool {
        self.types().len() == 1
    }
}

impl fmt::Display for Signature {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

impl fmt::Debug for Signature {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({:?})", self.inner)
    }
}

impl TryFrom<&str> for Signature {
    type Error = SignatureError;

    #[inline]
    fn try_from(signature: &str) -> Result<Self, Self::Error> {
        Self::new(signature)
    }
}
