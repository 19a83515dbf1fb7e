use crate::error::{BitmessageError, Result};
use crate::utils::{
    base58_decode, base58_encode, double_sha512, encode_varint, pad_left, strip_leading_zeros,
    ByteReader,
};

pub const ADDRESS_PREFIX: &str = "BM-";
pub const ADDRESS_CHECKSUM_LEN: usize = 4;
pub const RIPE_LEN: usize = 20;
pub const TAG_LEN: usize = 32;
const SECONDS_PER_DAY: u64 = 86_400;

/// The (version, stream, ripe) triple an address string stands for. The ripe
/// is always held at its full 20 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedAddress {
    pub version: u64,
    pub stream: u64,
    pub ripe: [u8; RIPE_LEN],
}

impl DecodedAddress {
    pub fn new(version: u64, stream: u64, ripe: &[u8]) -> Result<DecodedAddress> {
        if !(1..=4).contains(&version) {
            return Err(BitmessageError::Format(format!(
                "Unsupported address version {version}"
            )));
        }
        if stream == 0 {
            return Err(BitmessageError::Format("Stream number must be positive".to_string()));
        }
        let padded = pad_left(ripe, RIPE_LEN)?;
        let mut full = [0u8; RIPE_LEN];
        full.copy_from_slice(&padded);
        Ok(DecodedAddress {
            version,
            stream,
            ripe: full,
        })
    }

    pub fn encode(&self) -> String {
        let mut payload = encode_varint(self.version);
        payload.extend(encode_varint(self.stream));
        payload.extend_from_slice(self.trimmed_ripe());
        let checksum = double_sha512(&payload);
        payload.extend_from_slice(&checksum[..ADDRESS_CHECKSUM_LEN]);
        format!("{ADDRESS_PREFIX}{}", base58_encode(&payload))
    }

    fn trimmed_ripe(&self) -> &[u8] {
        if self.version >= 4 {
            strip_leading_zeros(&self.ripe, RIPE_LEN)
        } else {
            strip_leading_zeros(&self.ripe, 2)
        }
    }

    /// SHA512(SHA512(varint version ‖ varint stream ‖ ripe)).
    pub fn double_hash(&self) -> [u8; 64] {
        let mut data = encode_varint(self.version);
        data.extend(encode_varint(self.stream));
        data.extend_from_slice(&self.ripe);
        let mut out = [0u8; 64];
        out.copy_from_slice(&double_sha512(&data));
        out
    }

    pub fn tag(&self) -> [u8; TAG_LEN] {
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&self.double_hash()[TAG_LEN..]);
        tag
    }

    /// Private scalar used to encrypt v4 pubkeys for this address.
    pub fn encryption_key(&self) -> [u8; 32] {
        let mut key = [0u8; 32];
        key.copy_from_slice(&self.double_hash()[..32]);
        key
    }

    /// What a getpubkey request carries: the ripe up to v3, the tag from v4.
    pub fn request_identifier(&self) -> Vec<u8> {
        if self.version >= 4 {
            self.tag().to_vec()
        } else {
            self.ripe.to_vec()
        }
    }

    pub fn message_tag(&self, time: u64) -> [u8; TAG_LEN] {
        let day = time - time % SECONDS_PER_DAY;
        let mut data = encode_varint(self.version);
        data.extend(encode_varint(self.stream));
        data.extend_from_slice(&self.ripe);
        data.extend(day.to_be_bytes());
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&double_sha512(&data)[..TAG_LEN]);
        tag
    }
}

pub fn encode_address(version: u64, stream: u64, ripe: &[u8]) -> Result<String> {
    Ok(DecodedAddress::new(version, stream, ripe)?.encode())
}

pub fn decode_address(address: &str) -> Result<DecodedAddress> {
    let trimmed = address.trim();
    let encoded = trimmed.strip_prefix(ADDRESS_PREFIX).unwrap_or(trimmed);
    if encoded.is_empty() {
        return Err(BitmessageError::Format("Empty address".to_string()));
    }
    let data = base58_decode(encoded)?;
    if data.len() <= ADDRESS_CHECKSUM_LEN + 2 {
        return Err(BitmessageError::Format(format!(
            "Address payload too short: {} bytes",
            data.len()
        )));
    }
    let (payload, checksum) = data.split_at(data.len() - ADDRESS_CHECKSUM_LEN);
    if double_sha512(payload)[..ADDRESS_CHECKSUM_LEN] != *checksum {
        return Err(BitmessageError::InvalidChecksum);
    }

    let mut reader = ByteReader::new(payload);
    let version = reader.read_varint().map_err(as_format_error)?;
    let stream = reader.read_varint().map_err(as_format_error)?;
    let identifier = reader.read_rest();

    match version {
        1..=3 if !(RIPE_LEN - 2..=RIPE_LEN).contains(&identifier.len()) => {
            return Err(BitmessageError::Format(format!(
                "Version {version} ripe has {} bytes",
                identifier.len()
            )))
        }
        4 if identifier.len() < 4 || identifier.len() > RIPE_LEN || identifier[0] == 0 => {
            return Err(BitmessageError::Format(
                "Version 4 ripe is not minimally encoded".to_string(),
            ))
        }
        _ => {}
    }
    DecodedAddress::new(version, stream, identifier)
}

fn as_format_error(err: BitmessageError) -> BitmessageError {
    match err {
        BitmessageError::TruncatedObject { .. } => {
            BitmessageError::Format("Address ends inside a varint".to_string())
        }
        other => other,
    }
}

pub fn validate_address(address: &str) -> bool {
    decode_address(address).is_ok()
}

/// Both halves of the address double hash: (encryption key, tag).
pub fn calculate_double_hash_of_address_data(address: &str) -> Result<([u8; 32], [u8; TAG_LEN])> {
    let decoded = decode_address(address)?;
    Ok((decoded.encryption_key(), decoded.tag()))
}

pub fn calculate_tag(address: &str) -> Result<[u8; TAG_LEN]> {
    Ok(decode_address(address)?.tag())
}

pub fn calculate_address_encryption_key(address: &str) -> Result<[u8; 32]> {
    Ok(decode_address(address)?.encryption_key())
}

pub fn calculate_message_tag(address: &str, time: u64) -> Result<[u8; TAG_LEN]> {
    Ok(decode_address(address)?.message_tag(time))
}

/// One message tag per day from `since` through `now`, concatenated.
pub fn calculate_message_tags_since(address: &str, since: u64) -> Result<Vec<u8>> {
    calculate_message_tags_between(address, since, crate::utils::current_time())
}

pub fn calculate_message_tags_between(address: &str, since: u64, until: u64) -> Result<Vec<u8>> {
    let decoded = decode_address(address)?;
    let mut tags = Vec::new();
    let mut day = since - since % SECONDS_PER_DAY;
    while day <= until {
        tags.extend_from_slice(&decoded.message_tag(day));
        day += SECONDS_PER_DAY;
    }
    Ok(tags)
}
