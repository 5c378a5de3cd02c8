use prost::Message;
use std::io;

/// Encodes a message into a fresh buffer sized for it.
pub(crate) fn encode_message<M: Message>(message: &M) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(message.encoded_len());
    // Encoding only fails when the buffer can't grow, and a Vec always can.
    let _ = message.encode(&mut bytes);
    bytes
}

pub(crate) fn decode_message<M: Message + Default>(bytes: &[u8]) -> Result<M, io::Error> {
    M::decode(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
