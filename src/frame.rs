//! Assembly and disassembly of complete D-Bus messages on the byte stream.

use std::num::NonZeroU32;

use crate::codec::{Decoder, Encoder};
use crate::error::{ErrorKind, Result};
use crate::message::Message;
use crate::proto::{
    padding_to, Endianness, Flags, HeaderField, MessageType, MAX_ARRAY_LENGTH,
    MAX_MESSAGE_LENGTH, MIN_MESSAGE_LENGTH, PROTOCOL_VERSION,
};
use crate::value::Value;
use crate::Signature;

/// Encode a complete message for the wire.
///
/// Emission is big-endian. The message must carry a serial, the header
/// fields its type requires, and a body matching its signature header; the
/// signature header is derived from the body when absent.
pub(crate) fn encode_message(message: &Message) -> Result<Vec<u8>> {
    const ENDIANNESS: Endianness = Endianness::BIG;

    message.validate()?;

    let Some(serial) = message.serial else {
        return Err(ErrorKind::ZeroSerial.into());
    };

    let derived = message.body_signature();

    if let Some(Value::Signature(declared)) = message.field(HeaderField::SIGNATURE) {
        if *declared != derived {
            return Err(crate::Error::signature_mismatch(declared, &derived));
        }
    }

    // The body is encoded standalone. Bodies start on an 8-byte boundary,
    // so offset 0 is alignment-equivalent.
    let mut body = Vec::new();
    let mut body_encoder = Encoder::new(&mut body, ENDIANNESS);
    body_encoder.write_values(&message.body)?;

    let mut buf = Vec::new();
    buf.push(ENDIANNESS.get());
    buf.push(message.message_type.get());
    buf.push(message.flags.0);
    buf.push(PROTOCOL_VERSION);

    let mut encoder = Encoder::new(&mut buf, ENDIANNESS);
    encoder.put_u32(body.len() as u32);
    encoder.put_u32(serial.get());

    let fields = header_field_array(message, &derived);
    encoder.write_value(&fields)?;
    encoder.align(8);

    if buf.len() + body.len() > MAX_MESSAGE_LENGTH {
        return Err(ErrorKind::MessageTooLong(buf.len() + body.len()).into());
    }

    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Build the `ARRAY<STRUCT<BYTE, VARIANT>>` of header fields, appending the
/// derived signature header when the body carries one and the message does
/// not declare it.
fn header_field_array(message: &Message, derived: &Signature) -> Value {
    let mut entries = Vec::new();

    for (code, value) in &message.fields {
        entries.push(Value::Struct(vec![
            Value::Byte(code.get()),
            Value::Variant(Box::new(value.clone())),
        ]));
    }

    if !derived.is_empty() && message.field(HeaderField::SIGNATURE).is_none() {
        entries.push(Value::Struct(vec![
            Value::Byte(HeaderField::SIGNATURE.get()),
            Value::Variant(Box::new(Value::Signature(derived.clone()))),
        ]));
    }

    let element = crate::signature::CompleteType::Struct(vec![
        crate::signature::CompleteType::Byte,
        crate::signature::CompleteType::Variant,
    ]);

    let mut array = crate::value::Array::new(element);

    for entry in entries {
        // Entries are structs of the element type by construction.
        array.push(entry).expect("header field entry type");
    }

    Value::Array(array)
}

/// A streaming decoder assembling complete messages from a byte stream.
///
/// Bytes are fed in with [`FrameDecoder::extend`] as they arrive from the
/// transport, and complete messages are drained with
/// [`FrameDecoder::next_message`]. Any error is fatal to the stream:
/// alignment cannot be recovered mid-stream, so the connection must close.
pub(crate) struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub(crate) fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed bytes received from the transport.
    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Try to take the next complete message off the stream.
    ///
    /// Returns `None` if more bytes are needed.
    pub(crate) fn next_message(&mut self) -> Result<Option<Message>> {
        if self.buf.len() < MIN_MESSAGE_LENGTH {
            return Ok(None);
        }

        let endianness = match self.buf[0] {
            b'l' => Endianness::LITTLE,
            b'B' => Endianness::BIG,
            other => return Err(ErrorKind::InvalidEndianness(other).into()),
        };

        let message_type = MessageType::new(self.buf[1]);

        if !message_type.is_known() {
            return Err(ErrorKind::InvalidMessageType(self.buf[1]).into());
        }

        let flags = Flags::new(self.buf[2]);

        if self.buf[3] != PROTOCOL_VERSION {
            return Err(ErrorKind::InvalidProtocolVersion(self.buf[3]).into());
        }

        let mut decoder = Decoder::new(&self.buf, endianness);
        decoder.set_pos(4);
        let body_length = decoder.get_u32()? as usize;
        let serial = decoder.get_u32()?;
        let fields_length = decoder.get_u32()?;

        if fields_length > MAX_ARRAY_LENGTH {
            return Err(ErrorKind::ArrayTooLong(fields_length).into());
        }

        let header_length = MIN_MESSAGE_LENGTH + fields_length as usize;
        let total = header_length + padding_to(header_length, 8) + body_length;

        if total > MAX_MESSAGE_LENGTH {
            return Err(ErrorKind::MessageTooLong(total).into());
        }

        if self.buf.len() < total {
            return Ok(None);
        }

        let Some(serial) = NonZeroU32::new(serial) else {
            return Err(ErrorKind::ZeroSerial.into());
        };

        let message = decode_message(
            &self.buf[..total],
            endianness,
            message_type,
            flags,
            serial,
            fields_length as usize,
            body_length,
        )?;

        self.buf.drain(..total);
        Ok(Some(message))
    }
}

/// Decode a fully buffered message.
fn decode_message(
    data: &[u8],
    endianness: Endianness,
    message_type: MessageType,
    flags: Flags,
    serial: NonZeroU32,
    fields_length: usize,
    body_length: usize,
) -> Result<Message> {
    let mut decoder = Decoder::new(data, endianness);
    decoder.set_pos(MIN_MESSAGE_LENGTH);

    let fields_end = MIN_MESSAGE_LENGTH + fields_length;
    let mut fields = Vec::new();

    while decoder.pos() < fields_end {
        decoder.align(8)?;

        if decoder.pos() == fields_end {
            break;
        }

        let code = HeaderField::new(decoder.get_u8()?);
        let signature = decoder.read_signature()?;
        let types = signature.types();

        let [ty] = &types[..] else {
            return Err(ErrorKind::InvalidVariant(signature.as_str().into()).into());
        };

        let value = decoder.read_value(ty)?;
        fields.push((code, value));
    }

    if decoder.pos() != fields_end {
        return Err(ErrorKind::InconsistentMessage.into());
    }

    decoder.align(8)?;

    let body_start = decoder.pos();
    let body_data = &data[body_start..body_start + body_length];

    let signature = match fields
        .iter()
        .find(|(code, _)| *code == HeaderField::SIGNATURE)
    {
        Some((_, Value::Signature(signature))) => signature.clone(),
        Some(..) => return Err(ErrorKind::InconsistentMessage.into()),
        None => Signature::empty(),
    };

    let mut body_decoder = Decoder::new(body_data, endianness);
    let body = body_decoder.read_values(&signature.types())?;

    if !body_decoder.is_empty() {
        return Err(ErrorKind::InconsistentMessage.into());
    }

    let message = Message {
        message_type,
        flags,
        serial: Some(serial),
        fields,
        body,
    };

    message.validate()?;
    Ok(message)
}
