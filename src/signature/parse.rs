use crate::proto::Type;

use super::signature_error::SignatureErrorKind::*;
use super::{CompleteType, SignatureError, MAX_CONTAINER_DEPTH, MAX_SIGNATURE};

/// Parse a signature into its sequence of single complete types.
pub(crate) fn parse(bytes: &[u8]) -> Result<Vec<CompleteType>, SignatureError> {
    if bytes.len() > MAX_SIGNATURE {
        return Err(SignatureError::new(SignatureTooLong));
    }

    let mut parser = Parser { bytes, at: 0 };
    let mut types = Vec::new();

    while parser.peek().is_some() {
        types.push(parser.complete_type(Depth::default())?);
    }

    Ok(types)
}

#[derive(Default, Clone, Copy)]
struct Depth {
    arrays: usize,
    aggregates: usize,
}

struct Parser<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.at).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.at += 1;
        Some(b)
    }

    fn complete_type(&mut self, depth: Depth) -> Result<CompleteType, SignatureError> {
        let Some(b) = self.bump() else {
            return Err(SignatureError::new(UnknownTypeCode(0)));
        };

        let ty = match Type::new(b) {
            Type::BYTE => CompleteType::Byte,
            Type::BOOLEAN => CompleteType::Boolean,
            Type::INT16 => CompleteType::Int16,
            Type::UINT16 => CompleteType::Uint16,
            Type::INT32 => CompleteType::Int32,
            Type::UINT32 => CompleteType::Uint32,
            Type::INT64 => CompleteType::Int64,
            Type::UINT64 => CompleteType::Uint64,
            Type::DOUBLE => CompleteType::Double,
            Type::STRING => CompleteType::String,
            Type::OBJECT_PATH => CompleteType::ObjectPath,
            Type::SIGNATURE => CompleteType::Signature,
            Type::UNIX_FD => CompleteType::UnixFd,
            Type::VARIANT => CompleteType::Variant,
            Type::ARRAY => self.array(depth)?,
            Type::OPEN_PAREN => self.structure(depth)?,
            Type::OPEN_BRACE => return Err(SignatureError::new(DictEntryNotInsideArray)),
            Type::CLOSE_PAREN => return Err(SignatureError::new(StructEndedButNotStarted)),
            Type::CLOSE_BRACE => return Err(SignatureError::new(DictEndedButNotStarted)),
            t => return Err(SignatureError::new(UnknownTypeCode(t.get()))),
        };

        Ok(ty)
    }

    /// Parse the element of an array whose `a` has already been consumed.
    fn array(&mut self, depth: Depth) -> Result<CompleteType, SignatureError> {
        if depth.arrays == MAX_CONTAINER_DEPTH {
            return Err(SignatureError::new(ExceededMaximumArrayRecursion));
        }

        let depth = Depth {
            arrays: depth.arrays + 1,
            ..depth
        };

        let element = match self.peek() {
            None | Some(b')') | Some(b'}') => {
                return Err(SignatureError::new(MissingArrayElementType));
            }
            Some(b'{') => {
                self.bump();
                self.dict_entry(depth)?
            }
            Some(..) => self.complete_type(depth)?,
        };

        Ok(CompleteType::Array(Box::new(element)))
    }

    /// Parse a struct whose `(` has already been consumed.
    fn structure(&mut self, depth: Depth) -> Result<CompleteType, SignatureError> {
        if depth.aggregates == MAX_CONTAINER_DEPTH {
            return Err(SignatureError::new(ExceededMaximumStructRecursion));
        }

        let depth = Depth {
            aggregates: depth.aggregates + 1,
            ..depth
        };

        let mut fields = Vec::new();

        loop {
            match self.peek() {
                None => return Err(SignatureError::new(StructStartedButNotEnded)),
                Some(b')') => {
                    self.bump();

                    if fields.is_empty() {
                        return Err(SignatureError::new(StructHasNoFields));
                    }

                    return Ok(CompleteType::Struct(fields));
                }
                Some(..) => fields.push(self.complete_type(depth)?),
            }
        }
    }

    /// Parse a dict entry whose `{` has already been consumed. The caller
    /// guarantees the entry is an array element.
    fn dict_entry(&mut self, depth: Depth) -> Result<CompleteType, SignatureError> {
        if depth.aggregates == MAX_CONTAINER_DEPTH {
            return Err(SignatureError::new(ExceededMaximumStructRecursion));
        }

        let depth = Depth {
            aggregates: depth.aggregates + 1,
            ..depth
        };

        match self.peek() {
            None => return Err(SignatureError::new(DictStartedButNotEnded)),
            Some(b'}') => return Err(SignatureError::new(DictEntryHasNoFields)),
            Some(..) => {}
        }

        let key = self.complete_type(depth)?;

        if !key.is_basic() {
            return Err(SignatureError::new(DictKeyMustBeBasicType));
        }

        match self.peek() {
            None => return Err(SignatureError::new(DictStartedButNotEnded)),
            Some(b'}') => return Err(SignatureError::new(DictEntryHasOnlyOneField)),
            Some(..) => {}
        }

        let value = self.complete_type(depth)?;

        match self.bump() {
            None => Err(SignatureError::new(DictStartedButNotEnded)),
            Some(b'}') => Ok(CompleteType::DictEntry(Box::new(key), Box::new(value))),
            Some(..) => Err(SignatureError::new(DictEntryHasTooManyFields)),
        }
    }
}
