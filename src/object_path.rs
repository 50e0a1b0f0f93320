//! Validated D-Bus object paths.

use core::fmt;

use thiserror::Error;

/// An error constructing an object path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid D-Bus object path")]
#[non_exhaustive]
pub struct ObjectPathError;

/// A validated D-Bus object path.
///
/// Paths are slash-delimited, components consist of `[A-Za-z0-9_]`, and only
/// the root path `/` ends in a slash.
///
/// # Examples
///
/// ```
/// use tokio_dbus_client::ObjectPath;
///
/// let path = ObjectPath::new("/org/freedesktop/DBus")?;
/// assert_eq!(path.as_str(), "/org/freedesktop/DBus");
/// # Ok::<_, tokio_dbus_client::ObjectPathError>(())
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ObjectPath {
    inner: Box<str>,
}

impl ObjectPath {
    /// Construct a new object path, validating it against the path grammar.
    ///
    /// # Examples
    ///
    /// ```
    /// use tokio_dbus_client::ObjectPath;
    ///
    /// assert!(ObjectPath::new("/").is_ok());
    /// assert!(ObjectPath::new("/a/b").is_ok());
    /// assert!(ObjectPath::new("/a/b/").is_err());
    /// ```
    pub fn new(path: &str) -> Result<Self, ObjectPathError> {
        if !validate(path.as_bytes()) {
            return Err(ObjectPathError);
        }

        Ok(Self { inner: path.into() })
    }

    /// The root path `/`.
    pub fn root() -> Self {
        Self { inner: "/".into() }
    }

    /// Access the path as a string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.inner
    }
}

impl fmt::Display for ObjectPath {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

impl fmt::Debug for ObjectPath {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectPath({:?})", self.inner)
    }
}

impl TryFrom<&str> for ObjectPath {
    type Error = ObjectPathError;

    #[inline]
    fn try_from(path: &str) -> Result<Self, Self::Error> {
        Self::new(path)
    }
}

/// Validate an object path.
pub(crate) const fn validate(bytes: &[u8]) -> bool {
    let [b'/', bytes @ ..] = bytes else {
        return false;
    };

    // Special case: "/" is a valid path.
    if bytes.is_empty() {
        return true;
    }

    let mut bytes = bytes;
    let mut component = false;

    while let [b, rest @ ..] = bytes {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' => {
                component = true;
            }
            b'/' => {
                if !component {
                    return false;
                }

                component = false;
            }
            _ => {
                return false;
            }
        }

        bytes = rest;
    }

    component
}

#[cfg(test)]
mod tests {
    use super::ObjectPath;

    #[test]
    fn legal_paths() {
        assert!(ObjectPath::new("").is_err());
        assert!(ObjectPath::new("a").is_err());
        assert!(ObjectPath::new("/").is_ok());
        assert!(ObjectPath::new("/a").is_ok());
        assert!(ObjectPath::new("//").is_err());
        assert!(ObjectPath::new("/se/tedro").is_ok());
        assert!(ObjectPath::new("/se/tedro/").is_err());
        assert!(ObjectPath::new("/org/freedesktop/DBus").is_ok());
        assert!(ObjectPath::new("/with_underscore/x1").is_ok());
        assert!(ObjectPath::new("/with-dash").is_err());
        assert!(ObjectPath::new("/trailing/").is_err());
    }
}
