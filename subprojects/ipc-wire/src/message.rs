//! Message envelope: the header every payload travels wrapped in, and the
//! encode/parse entry points the router and stub/proxy layer use.

use ipc_handle::UntypedHandle;

use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::validation::{CodecError, ValidationError, ValidationErrorCode as Code};

bitflags::bitflags! {
    /// Flags carried in a version-1 message header. Version 0 headers carry
    /// no flags at all (see [`MessageHeader`]).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MessageFlags: u32 {
        /// The sender expects a response; the receiver must reply with the
        /// same `request_id` and [`MessageFlags::IS_RESPONSE`] set.
        const EXPECTS_RESPONSE = 1 << 0;
        /// This message is the response to an earlier
        /// [`MessageFlags::EXPECTS_RESPONSE`] message.
        const IS_RESPONSE = 1 << 1;
    }
}

/// Anything a [`Payload`] encodes into / decodes out of.
pub trait Payload {
    fn encode(&self, encoder: &mut Encoder) -> Result<(), CodecError>;
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self, CodecError>
    where
        Self: Sized;
}

/// The fixed header every message opens with: which method it targets, and
/// (for version-1 headers) whether it expects or is a response and to which
/// outstanding call it correlates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    pub method_ordinal: u32,
    pub flags: MessageFlags,
    pub request_id: u64,
}

impl Default for MessageFlags {
    fn default() -> Self {
        MessageFlags::empty()
    }
}

impl MessageHeader {
    fn data_size(&self) -> u32 {
        let mut size = 2 * 4;
        if !self.flags.is_empty() {
            size += 8;
        }
        size
    }

    fn version(&self) -> u32 {
        if self.flags.is_empty() {
            0
        } else {
            1
        }
    }

    pub fn encode(&self, encoder: &mut Encoder) -> Result<(), CodecError> {
        encoder.start_struct(self.data_size(), self.version());
        encoder.write_uint32(self.method_ordinal)?;
        encoder.write_uint32(self.flags.bits())?;
        if !self.flags.is_empty() {
            encoder.write_uint64(self.request_id)?;
        }
        encoder.finish()
    }

    pub fn decode(decoder: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let header = decoder.start_struct()?;
        let version = header.elements_or_version;
        if version > 1 {
            return Err(ValidationError::new(
                Code::UnexpectedStructHeader,
                format!("invalid message header: it should be of version 0 or 1, but has {version}"),
            )
            .into());
        }
        let mut expected_size = 8 + 2 * 4;
        if version == 1 {
            expected_size += 8;
        }
        if expected_size != header.size {
            return Err(ValidationError::new(
                Code::UnexpectedStructHeader,
                format!("unexpected struct header size: expected {expected_size}, but got {}", header.size),
            )
            .into());
        }

        let method_ordinal = decoder.read_uint32()?;
        let raw_flags = decoder.read_uint32()?;
        let mut out = MessageHeader { method_ordinal, flags: MessageFlags::empty(), request_id: 0 };
        if version == 1 {
            let flags = MessageFlags::from_bits_truncate(raw_flags);
            if flags != MessageFlags::EXPECTS_RESPONSE && flags != MessageFlags::IS_RESPONSE {
                return Err(ValidationError::new(
                    Code::MessageHeaderInvalidFlags,
                    format!("message header flags({raw_flags:?}) should be ExpectsResponse or IsResponse"),
                )
                .into());
            }
            out.flags = flags;
            out.request_id = decoder.read_uint64()?;
        } else if raw_flags != 0 {
            return Err(
                ValidationError::new(Code::MessageHeaderMissingRequestId, "missing request ID in message header")
                    .into(),
            );
        }
        decoder.finish()?;
        Ok(out)
    }
}

/// A raw message read from or about to be written to a message pipe: the
/// decoded header, the full encoded bytes, and the attached handles. The
/// payload bytes (everything after the header) are sliced out separately so
/// callers can decode them against their own [`Payload`] type.
pub struct Message {
    pub header: MessageHeader,
    pub bytes: Vec<u8>,
    pub handles: Vec<UntypedHandle>,
}

impl Message {
    fn header_byte_len(&self) -> usize {
        8 + self.header.data_size() as usize
    }

    /// The payload bytes, i.e. everything after the header.
    pub fn payload_bytes(&self) -> &[u8] {
        &self.bytes[self.header_byte_len()..]
    }

    /// Decodes `payload` out of this message's payload bytes and handles.
    /// Consumes the message: handles are moved into the returned payload's
    /// decoder, matching how the kernel transfers handle ownership on read.
    pub fn decode_payload<P: Payload>(self) -> Result<P, CodecError> {
        let payload_offset = self.header_byte_len();
        let mut decoder = Decoder::new(&self.bytes[payload_offset..], self.handles);
        P::decode(&mut decoder)
    }
}

/// Encodes `header` followed by `payload` into one [`Message`].
pub fn encode_message(header: MessageHeader, payload: &impl Payload) -> Result<Message, CodecError> {
    let mut encoder = Encoder::new();
    header.encode(&mut encoder)?;
    payload.encode(&mut encoder)?;
    let (bytes, handles) = encoder.data()?;
    Ok(Message { header, bytes, handles })
}

/// Parses only the header out of `bytes`, leaving the payload undecoded
/// until the caller knows (from `header.method_ordinal`) which [`Payload`]
/// type to decode it as.
pub fn parse_message(bytes: Vec<u8>, handles: Vec<UntypedHandle>) -> Result<Message, CodecError> {
    let mut decoder = Decoder::new(&bytes, Vec::new());
    let header = MessageHeader::decode(&mut decoder)?;
    Ok(Message { header, bytes, handles })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping(u32);

    impl Payload for Ping {
        fn encode(&self, encoder: &mut Encoder) -> Result<(), CodecError> {
            encoder.start_struct(4, 0);
            encoder.write_uint32(self.0)?;
            encoder.finish()
        }

        fn decode(decoder: &mut Decoder<'_>) -> Result<Self, CodecError> {
            decoder.start_struct()?;
            let value = decoder.read_uint32()?;
            decoder.finish()?;
            Ok(Ping(value))
        }
    }

    #[test]
    fn version_0_header_round_trips() {
        let header = MessageHeader { method_ordinal: 3, flags: MessageFlags::empty(), request_id: 0 };
        let message = encode_message(header, &Ping(42)).unwrap();
        let parsed = parse_message(message.bytes, message.handles).unwrap();
        assert_eq!(parsed.header.method_ordinal, 3);
        assert!(parsed.header.flags.is_empty());
        let ping: Ping = parsed.decode_payload().unwrap();
        assert_eq!(ping.0, 42);
    }

    #[test]
    fn version_1_header_round_trips_request_id() {
        let header =
            MessageHeader { method_ordinal: 7, flags: MessageFlags::EXPECTS_RESPONSE, request_id: 99 };
        let message = encode_message(header, &Ping(1)).unwrap();
        let parsed = parse_message(message.bytes, message.handles).unwrap();
        assert_eq!(parsed.header.request_id, 99);
        assert_eq!(parsed.header.flags, MessageFlags::EXPECTS_RESPONSE);
    }

    #[test]
    fn version_1_header_rejects_both_flags_set() {
        let mut encoder = Encoder::new();
        let header = MessageHeader {
            method_ordinal: 1,
            flags: MessageFlags::EXPECTS_RESPONSE | MessageFlags::IS_RESPONSE,
            request_id: 5,
        };
        header.encode(&mut encoder).unwrap();
        let (bytes, handles) = encoder.data().unwrap();
        let mut decoder = Decoder::new(&bytes, handles);
        let err = MessageHeader::decode(&mut decoder).unwrap_err();
        assert!(matches!(
            err,
            CodecError::Validation(ValidationError { code: Code::MessageHeaderInvalidFlags, .. })
        ));
    }
}
