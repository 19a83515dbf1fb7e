//! Message-level cryptography
//!
//! ECIES encryption of object bodies and ECDSA signatures over canonical
//! payloads. Hash primitives live in `utils::crypto`.

pub mod ecies;
pub mod signature;

pub use ecies::{decrypt, encrypt, EncryptedPayload};
pub use signature::{sign, sign_with_wif_key, verify_signature, verify_signature_with_key_bytes};
