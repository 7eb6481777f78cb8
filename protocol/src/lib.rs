pub mod codec;
pub mod command;
mod envelope;
mod kind;

pub use codec::{decode, decode_multi, encode, encode_batch, FrameDecoder, MessageError};
pub use envelope::{Body, Envelope};
pub use kind::Kind;
