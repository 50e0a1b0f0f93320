use crate::error::{ErrorKind, Result};
use crate::proto::{padding_to, Endianness, MAX_ARRAY_LENGTH};
use crate::signature::MAX_SIGNATURE;
use crate::value::{Array, Value};
use crate::Signature;

/// An alignment-aware value encoder over a growable buffer.
pub(crate) struct Encoder<'a> {
    buf: &'a mut Vec<u8>,
    endianness: Endianness,
}

impl<'a> Encoder<'a> {
    pub(crate) fn new(buf: &'a mut Vec<u8>, endianness: Endianness) -> Self {
        Self { buf, endianness }
    }

    /// Pad with zero bytes up to the given alignment.
    pub(crate) fn align(&mut self, alignment: usize) {
        let pad = padding_to(self.buf.len(), alignment);
        self.buf.resize(self.buf.len() + pad, 0);
    }

    /// Write a sequence of values.
    pub(crate) fn write_values(&mut self, values: &[Value]) -> Result<()> {
        for value in values {
            self.write_value(value)?;
        }

        Ok(())
    }

    /// Write a single value, padding to its alignment first.
    pub(crate) fn write_value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Byte(v) => self.buf.push(*v),
            Value::Boolean(v) => {
                self.align(4);
                self.put_u32(*v as u32);
            }
            Value::Int16(v) => {
                self.align(2);
                self.put_u16(*v as u16);
            }
            Value::Uint16(v) => {
                self.align(2);
                self.put_u16(*v);
            }
            Value::Int32(v) => {
                self.align(4);
                self.put_u32(*v as u32);
            }
            Value::Uint32(v) => {
                self.align(4);
                self.put_u32(*v);
            }
            Value::Int64(v) => {
                self.align(8);
                self.put_u64(*v as u64);
            }
            Value::Uint64(v) => {
                self.align(8);
                self.put_u64(*v);
            }
            Value::Double(v) => {
                self.align(8);
                self.put_u64(v.to_bits());
            }
            Value::String(v) => self.write_string(v),
            Value::ObjectPath(v) => self.write_string(v.as_str()),
            Value::Signature(v) => self.write_signature(v.as_str())?,
            Value::UnixFd(v) => {
                self.align(4);
                self.put_u32(*v);
            }
            Value::Array(array) => self.write_array(array)?,
            Value::Struct(fields) => {
                self.align(8);
                self.write_values(fields)?;
            }
            Value::Variant(inner) => {
                let signature = Signature::from_types(&[inner.complete_type()]);
                self.write_signature(signature.as_str())?;
                self.write_value(inner)?;
            }
            Value::DictEntry(key, value) => {
                self.align(8);
                self.write_value(key)?;
                self.write_value(value)?;
            }
        }

        Ok(())
    }

    /// Write a string with a 32-bit length prefix and a trailing NUL. The
    /// length does not include the NUL.
    pub(crate) fn write_string(&mut self, s: &str) {
        self.align(4);
        self.put_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    /// Write a signature with an 8-bit length prefix and a trailing NUL.
    pub(crate) fn write_signature(&mut self, s: &str) -> Result<()> {
        if s.len() > MAX_SIGNATURE {
            return Err(ErrorKind::InvalidVariant(s.into()).into());
        }

        self.buf.push(s.len() as u8);
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    /// Write an array. The length field counts element bytes only, not the
    /// padding between the length and the first element.
    fn write_array(&mut self, array: &Array) -> Result<()> {
        self.align(4);

        let length_at = self.buf.len();
        self.put_u32(0);

        self.align(array.element().alignment());
        let start = self.buf.len();

        for value in array.values() {
            self.write_value(value)?;
        }

        let length = self.buf.len() - start;

        if length > MAX_ARRAY_LENGTH as usize {
            return Err(ErrorKind::ArrayTooLong(length as u32).into());
        }

        let bytes = match self.endianness {
            Endianness::BIG => (length as u32).to_be_bytes(),
            _ => (length as u32).to_le_bytes(),
        };

        self.buf[length_at..length_at + 4].copy_from_slice(&bytes);
        Ok(())
    }

    pub(crate) fn put_u16(&mut self, value: u16) {
        let bytes = match self.endianness {
            Endianness::BIG => value.to_be_bytes(),
            _ => value.to_le_bytes(),
        };

        self.buf.extend_from_slice(&bytes);
    }

    pub(crate) fn put_u32(&mut self, value: u32) {
        let bytes = match self.endianness {
            Endianness::BIG => value.to_be_bytes(),
            _ => value.to_le_bytes(),
        };

        self.buf.extend_from_slice(&bytes);
    }

    pub(crate) fn put_u64(&mut self, value: u64) {
        let bytes = match self.endianness {
            Endianness::BIG => value.to_be_bytes(),
            _ => value.to_le_bytes(),
        };

        self.buf.extend_from_slice(&bytes);
    }
}
