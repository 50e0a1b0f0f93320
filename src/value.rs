//! The in-memory representation of D-Bus values.

use crate::signature::CompleteType;
use crate::{ObjectPath, Signature};

/// A single typed D-Bus value.
///
/// This is a closed sum over every type the wire protocol can carry. The
/// codec matches it exhaustively, so adding a type code is a compile-time
/// visible change.
///
/// # Examples
///
/// ```
/// use tokio_dbus_client::{CompleteType, Value};
///
/// let value = Value::Uint32(42);
/// assert_eq!(value.complete_type(), CompleteType::Uint32);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Value {
    /// 8-bit unsigned integer.
    Byte(u8),
    /// Boolean stored in a 32-bit slot on the wire.
    Boolean(bool),
    /// 16-bit signed integer.
    Int16(i16),
    /// 16-bit unsigned integer.
    Uint16(u16),
    /// 32-bit signed integer.
    Int32(i32),
    /// 32-bit unsigned integer.
    Uint32(u32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit unsigned integer.
    Uint64(u64),
    /// IEEE 754 double.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Object path.
    ObjectPath(ObjectPath),
    /// Type signature.
    Signature(Signature),
    /// Unix file descriptor index. The index is carried for wire parity,
    /// the descriptor itself is never transferred.
    UnixFd(u32),
    /// Array of values sharing one element type.
    Array(Array),
    /// Struct with one or more fields.
    Struct(Vec<Value>),
    /// Self-describing value.
    Variant(Box<Value>),
    /// Dict entry. Only legal as an array element.
    DictEntry(Box<Value>, Box<Value>),
}

impl Value {
    /// The single complete type describing this value.
    pub fn complete_type(&self) -> CompleteType {
        match self {
            Value::Byte(..) => CompleteType::Byte,
            Value::Boolean(..) => CompleteType::Boolean,
            Value::Int16(..) => CompleteType::Int16,
            Value::Uint16(..) => CompleteType::Uint16,
            Value::Int32(..) => CompleteType::Int32,
            Value::Uint32(..) => CompleteType::Uint32,
            Value::Int64(..) => CompleteType::Int64,
            Value::Uint64(..) => CompleteType::Uint64,
            Value::Double(..) => CompleteType::Double,
            Value::String(..) => CompleteType::String,
            Value::ObjectPath(..) => CompleteType::ObjectPath,
            Value::Signature(..) => CompleteType::Signature,
            Value::UnixFd(..) => CompleteType::UnixFd,
            Value::Array(array) => CompleteType::Array(Box::new(array.element.clone())),
            Value::Struct(fields) => {
                CompleteType::Struct(fields.iter().map(Value::complete_type).collect())
            }
            Value::Variant(..) => CompleteType::Variant,
            Value::DictEntry(key, value) => CompleteType::DictEntry(
                Box::new(key.complete_type()),
                Box::new(value.complete_type()),
            ),
        }
    }

    /// Access the value as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Access the value as a `u32`, if it is one.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Uint32(n) => Some(*n),
            _ => None,
        }
    }

    /// Access the inner value of a variant, if this is one.
    pub fn as_variant(&self) -> Option<&Value> {
        match self {
            Value::Variant(inner) => Some(inner),
            _ => None,
        }
    }
}

/// A typed array of values.
///
/// The element type is carried separately so empty arrays stay typed.
///
/// # Examples
///
/// ```
/// use tokio_dbus_client::{Array, CompleteType, Value};
///
/// let mut array = Array::new(CompleteType::String);
/// array.push(Value::String("hello".into()))?;
/// assert_eq!(array.len(), 1);
/// # Ok::<_, tokio_dbus_client::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    element: CompleteType,
    values: Vec<Value>,
}

impl Array {
    /// Construct a new empty array with the given element type.
    pub fn new(element: CompleteType) -> Self {
        Self {
            element,
            values: Vec::new(),
        }
    }

    /// Construct an array from a sequence of values which must all share
    /// the given element type.
    pub fn from_values(
        element: CompleteType,
        values: Vec<Value>,
    ) -> Result<Self, crate::Error> {
        let mut array = Self::new(element);

        for value in values {
            array.push(value)?;
        }

        Ok(array)
    }

    /// The element type of the array.
    #[inline]
    pub fn element(&self) -> &CompleteType {
        &self.element
    }

    /// The values in the array.
    #[inline]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The number of elements in the array.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Test if the array is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Push a value onto the array, verifying it matches the element type.
    pub fn push(&mut self, value: Value) -> Result<(), crate::Error> {
        if value.complete_type() != self.element {
            return Err(crate::Error::signature_mismatch(
                &self.element,
                &value.complete_type(),
            ));
        }

        self.values.push(value);
        Ok(())
    }
}

impl From<u8> for Value {
    #[inline]
    fn from(value: u8) -> Self {
        Value::Byte(value)
    }
}

impl From<bool> for Value {
    #[inline]
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<u32> for Value {
    #[inline]
    fn from(value: u32) -> Self {
        Value::Uint32(value)
    }
}

impl From<i32> for Value {
    #[inline]
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<u64> for Value {
    #[inline]
    fn from(value: u64) -> Self {
        Value::Uint64(value)
    }
}

impl From<i64> for Value {
    #[inline]
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<f64> for Value {
    #[inline]
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    #[inline]
    fn from(value: &str) -> Self {
        Value::String(value.into())
    }
}

impl From<String> for Value {
    #[inline]
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<ObjectPath> for Value {
    #[inline]
    fn from(value: ObjectPath) -> Self {
        Value::ObjectPath(value)
    }
}

impl From<Signature> for Value {
    #[inline]
    fn from(value: Signature) -> Self {
        Value::Signature(value)
    }
}
