//! Identities and key material
//!
//! Address string codec, WIF and public key conversion, and generation of
//! new identities.

pub mod address;
pub mod identity;
pub mod keys;

pub use address::{
    calculate_address_encryption_key, calculate_double_hash_of_address_data,
    calculate_message_tag, calculate_message_tags_between, calculate_message_tags_since,
    calculate_tag, decode_address, encode_address, validate_address, DecodedAddress,
    ADDRESS_PREFIX,
};
pub use identity::{Address, AddressGenerator};
pub use keys::{
    calculate_ripe_hash, decode_private_key_from_wif, encode_private_key_to_wif,
    private_key_from_wif, public_key_bytes, public_key_wire_bytes, reconstruct_private_key,
    reconstruct_public_key,
};
