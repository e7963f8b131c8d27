//! Protocol module containing wire message types and the datagram codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_datagram, encode_envelope, ProtocolError, MAX_DATAGRAM_SIZE};
pub use messages::*;
