mod store;

pub use store::CheckpointStore;

use crate::codec;
use crate::schema::CheckpointImage;
use prost::Message;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Checkpoint IO failure")]
    Io(#[from] io::Error),

    #[error("Checkpoint payload is malformed")]
    Decode(#[from] prost::DecodeError),
}

pub fn encode_image(image: &CheckpointImage) -> Vec<u8> {
    codec::encode_message(image)
}

pub fn decode_image(bytes: &[u8]) -> Result<CheckpointImage, CheckpointError> {
    Ok(CheckpointImage::decode(bytes)?)
}
