use core::fmt;

/// A single complete type inside of a [`Signature`].
///
/// This is the parsed tree form of a signature. Containers carry their
/// nested types, so an empty array still knows the type of its elements.
///
/// [`Signature`]: crate::Signature
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CompleteType {
    /// 8-bit unsigned integer.
    Byte,
    /// Boolean stored in a 32-bit slot.
    Boolean,
    /// 16-bit signed integer.
    Int16,
    /// 16-bit unsigned integer.
    Uint16,
    /// 32-bit signed integer.
    Int32,
    /// 32-bit unsigned integer.
    Uint32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit unsigned integer.
    Uint64,
    /// IEEE 754 double.
    Double,
    /// UTF-8 string.
    String,
    /// Object path.
    ObjectPath,
    /// Type signature.
    Signature,
    /// Unix file descriptor index.
    UnixFd,
    /// Self-describing value.
    Variant,
    /// Array of a single element type.
    Array(Box<CompleteType>),
    /// Struct with one or more fields.
    Struct(Vec<CompleteType>),
    /// Dict entry with a basic key. Only legal as an array element.
    DictEntry(Box<CompleteType>, Box<CompleteType>),
}

impl CompleteType {
    /// The wire alignment of this type in bytes.
    pub fn alignment(&self) -> usize {
        match self {
            CompleteType::Byte | CompleteType::Signature | CompleteType::Variant => 1,
            CompleteType::Int16 | CompleteType::Uint16 => 2,
            CompleteType::Boolean
            | CompleteType::Int32
            | CompleteType::Uint32
            | CompleteType::String
            | CompleteType::ObjectPath
            | CompleteType::UnixFd
            | CompleteType::Array(..) => 4,
            CompleteType::Int64
            | CompleteType::Uint64
            | CompleteType::Double
            | CompleteType::Struct(..)
            | CompleteType::DictEntry(..) => 8,
        }
    }

    /// Test if this is a basic (non-container) type.
    pub fn is_basic(&self) -> bool {
        !matches!(
            self,
            CompleteType::Array(..)
                | CompleteType::Struct(..)
                | CompleteType::DictEntry(..)
                | CompleteType::Variant
        )
    }

    /// Append the type codes of this type to `out`.
    pub(crate) fn write_code(&self, out: &mut String) {
        match self {
            CompleteType::Byte => out.push('y'),
            CompleteType::Boolean => out.push('b'),
            CompleteType::Int16 => out.push('n'),
            CompleteType::Uint16 => out.push('q'),
            CompleteType::Int32 => out.push('i'),
            CompleteType::Uint32 => out.push('u'),
            CompleteType::Int64 => out.push('x'),
            CompleteType::Uint64 => out.push('t'),
            CompleteType::Double => out.push('d'),
            CompleteType::String => out.push('s'),
            CompleteType::ObjectPath => out.push('o'),
            CompleteType::Signature => out.push('g'),
            CompleteType::UnixFd => out.push('h'),
            CompleteType::Variant => out.push('v'),
            CompleteType::Array(element) => {
                out.push('a');
                element.write_code(out);
            }
            CompleteType::Struct(fields) => {
                out.push('(');

                for field in fields {
                    field.write_code(out);
                }

                out.push(')');
            }
            CompleteType::DictEntry(key, value) => {
                out.push('{');
                key.write_code(out);
                value.write_code(out);
                out.push('}');
            }
        }
    }
}

impl fmt::Display for CompleteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::new();
        self.write_code(&mut s);
        f.write_str(&s)
    }
}
