use crate::error::{ErrorKind, Result};
use crate::proto::{padding_to, Endianness, MAX_ARRAY_LENGTH};
use crate::signature::CompleteType;
use crate::value::{Array, Value};
use crate::{ObjectPath, Signature};

/// An alignment-aware value decoder over a byte slice.
pub(crate) struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    endianness: Endianness,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(data: &'a [u8], endianness: Endianness) -> Self {
        Self {
            data,
            pos: 0,
            endianness,
        }
    }

    /// The current offset into the underlying buffer.
    #[inline]
    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    /// Reposition the decoder. Used to start decoding at a message-relative
    /// offset such as the header field array.
    #[inline]
    pub(crate) fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Test if all input has been consumed.
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.pos == self.data.len()
    }

    /// Skip padding up to the given alignment.
    pub(crate) fn align(&mut self, alignment: usize) -> Result<()> {
        let pad = padding_to(self.pos, alignment);

        if self.pos + pad > self.data.len() {
            return Err(ErrorKind::BufferUnderflow.into());
        }

        self.pos += pad;
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let Some(bytes) = self.data.get(self.pos..self.pos + n) else {
            return Err(ErrorKind::BufferUnderflow.into());
        };

        self.pos += n;
        Ok(bytes)
    }

    pub(crate) fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn get_u16(&mut self) -> Result<u16> {
        let bytes: [u8; 2] = self.take(2)?.try_into().expect("length checked");

        Ok(match self.endianness {
            Endianness::BIG => u16::from_be_bytes(bytes),
            _ => u16::from_le_bytes(bytes),
        })
    }

    pub(crate) fn get_u32(&mut self) -> Result<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().expect("length checked");

        Ok(match self.endianness {
            Endianness::BIG => u32::from_be_bytes(bytes),
            _ => u32::from_le_bytes(bytes),
        })
    }

    pub(crate) fn get_u64(&mut self) -> Result<u64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().expect("length checked");

        Ok(match self.endianness {
            Endianness::BIG => u64::from_be_bytes(bytes),
            _ => u64::from_le_bytes(bytes),
        })
    }

    /// Read a sequence of values described by the given types.
    pub(crate) fn read_values(&mut self, types: &[CompleteType]) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(types.len());

        for ty in types {
            values.push(self.read_value(ty)?);
        }

        Ok(values)
    }

    /// Read a single value of the given type, skipping padding first.
    pub(crate) fn read_value(&mut self, ty: &CompleteType) -> Result<Value> {
        let value = match ty {
            CompleteType::Byte => Value::Byte(self.get_u8()?),
            CompleteType::Boolean => {
                self.align(4)?;

                match self.get_u32()? {
                    0 => Value::Boolean(false),
                    1 => Value::Boolean(true),
                    other => return Err(ErrorKind::InvalidBoolean(other).into()),
                }
            }
            CompleteType::Int16 => {
                self.align(2)?;
                Value::Int16(self.get_u16()? as i16)
            }
            CompleteType::Uint16 => {
                self.align(2)?;
                Value::Uint16(self.get_u16()?)
            }
            CompleteType::Int32 => {
                self.align(4)?;
                Value::Int32(self.get_u32()? as i32)
            }
            CompleteType::Uint32 => {
                self.align(4)?;
                Value::Uint32(self.get_u32()?)
            }
            CompleteType::Int64 => {
                self.align(8)?;
                Value::Int64(self.get_u64()? as i64)
            }
            CompleteType::Uint64 => {
                self.align(8)?;
                Value::Uint64(self.get_u64()?)
            }
            CompleteType::Double => {
                self.align(8)?;
                Value::Double(f64::from_bits(self.get_u64()?))
            }
            CompleteType::String => Value::String(self.read_string()?.into()),
            CompleteType::ObjectPath => Value::ObjectPath(ObjectPath::new(self.read_string()?)?),
            CompleteType::Signature => Value::Signature(self.read_signature()?),
            CompleteType::UnixFd => {
                self.align(4)?;
                Value::UnixFd(self.get_u32()?)
            }
            CompleteType::Array(element) => Value::Array(self.read_array(element)?),
            CompleteType::Struct(fields) => {
                self.align(8)?;
                Value::Struct(self.read_values(fields)?)
            }
            CompleteType::Variant => {
                let signature = self.read_signature()?;
                let types = signature.types();

                let [ty] = &types[..] else {
                    return Err(ErrorKind::InvalidVariant(signature.as_str().into()).into());
                };

                Value::Variant(Box::new(self.read_value(ty)?))
            }
            CompleteType::DictEntry(key, value) => {
                self.align(8)?;
                let key = self.read_value(key)?;
                let value = self.read_value(value)?;
                Value::DictEntry(Box::new(key), Box::new(value))
            }
        };

        Ok(value)
    }

    /// Read an array of the given element type.
    ///
    /// The padding between the length field and the first element is skipped
    /// even when the array is empty.
    fn read_array(&mut self, element: &CompleteType) -> Result<Array> {
        self.align(4)?;
        let length = self.get_u32()?;

        // Reject before consuming anything past the length field.
        if length > MAX_ARRAY_LENGTH {
            return Err(ErrorKind::ArrayTooLong(length).into());
        }

        self.align(element.alignment())?;

        let end = self.pos + length as usize;

        if end > self.data.len() {
            return Err(ErrorKind::BufferUnderflow.into());
        }

        let mut array = Array::new(element.clone());

        while self.pos < end {
            let value = self.read_value(element)?;
            array.push(value)?;
        }

        if self.pos != end {
            return Err(ErrorKind::BufferUnderflow.into());
        }

        Ok(array)
    }

    /// Read a string with a 32-bit length prefix and a trailing NUL.
    pub(crate) fn read_string(&mut self) -> Result<&'a str> {
        self.align(4)?;
        let length = self.get_u32()? as usize;
        let bytes = self.take(length)?;

        if self.get_u8()? != 0 {
            return Err(ErrorKind::NotNullTerminated.into());
        }

        Ok(std::str::from_utf8(bytes)?)
    }

    /// Read a signature with an 8-bit length prefix and a trailing NUL.
    pub(crate) fn read_signature(&mut self) -> Result<Signature> {
        let length = self.get_u8()? as usize;
        let bytes = self.take(length)?;

        if self.get_u8()? != 0 {
            return Err(ErrorKind::NotNullTerminated.into());
        }

        let s = std::str::from_utf8(bytes)?;
        Ok(Signature::new(s)?)
    }
}
