//! Wire protocol: hex codec and message encoder.

pub mod hex;
pub mod message;

pub use hex::{ByteWidth, NormalizedData, normalize_data, normalize_token, split_register_address};
pub use message::{WireMessage, encode};
