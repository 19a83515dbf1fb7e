//! Utility functions and helpers
//!
//! Digests, Base58, varints, byte cursors, record encoding and time.

pub mod bytes;
pub mod crypto;
pub mod serialization;
pub mod time;
pub mod varint;

pub use bytes::{pad_left, remove_bytes, strip_leading_zeros, ByteReader};
pub use crypto::{
    base58_decode, base58_encode, double_sha256, double_sha512, hmac_sha256, hmac_sha256_verify,
    random_bytes, ripemd160_digest, sha1_digest, sha256_digest, sha512_digest,
};
pub use serialization::{deserialize, serialize};
pub use time::{current_time, describe_duration};
pub use varint::{decode_varint, encode_varint};
