//! The archive wire codec: a safe, `Vec<u8>`-backed encoder/decoder for the
//! struct/array/map/union layout every message payload is written in, plus
//! the message envelope (header, flags, request id) the router correlates
//! requests and responses by.

mod decoder;
mod encoder;
mod header;
mod map;
mod message;
mod state;
mod validation;

pub use decoder::Decoder;
pub use encoder::Encoder;
pub use header::{align, bytes_for_bits, DataHeader, DATA_HEADER_SIZE, DEFAULT_ALIGNMENT, MAP_HEADER};
pub use map::{read_map, write_map};
pub use message::{encode_message, parse_message, Message, MessageFlags, MessageHeader, Payload};
pub use state::EncodingState;
pub use validation::{CodecError, ValidationError, ValidationErrorCode};
