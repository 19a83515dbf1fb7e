use crate::error::{BitmessageError, Result};
use crate::utils::{base58_decode, base58_encode, double_sha256, ripemd160_digest, sha512_digest};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use zeroize::Zeroizing;

pub const WIF_VERSION: u8 = 0x80;
const WIF_CHECKSUM_LEN: usize = 4;
pub const PRIVATE_KEY_LEN: usize = 32;
/// Uncompressed SEC1 point: 0x04 ‖ X ‖ Y.
pub const PUBLIC_KEY_LEN: usize = 65;
/// Public keys travel on the wire without the 0x04 prefix.
pub const WIRE_PUBLIC_KEY_LEN: usize = 64;

pub fn encode_private_key_to_wif(private_key: &[u8]) -> Result<String> {
    if private_key.len() != PRIVATE_KEY_LEN {
        return Err(BitmessageError::Format(format!(
            "Private key must be {PRIVATE_KEY_LEN} bytes, got {}",
            private_key.len()
        )));
    }
    let mut payload = Zeroizing::new(Vec::with_capacity(1 + PRIVATE_KEY_LEN + WIF_CHECKSUM_LEN));
    payload.push(WIF_VERSION);
    payload.extend_from_slice(private_key);
    let checksum = double_sha256(payload.as_slice());
    payload.extend_from_slice(&checksum[..WIF_CHECKSUM_LEN]);
    Ok(base58_encode(payload.as_slice()))
}

pub fn decode_private_key_from_wif(wif: &str) -> Result<Zeroizing<Vec<u8>>> {
    let payload = Zeroizing::new(base58_decode(wif.trim())?);
    if payload.len() != 1 + PRIVATE_KEY_LEN + WIF_CHECKSUM_LEN {
        return Err(BitmessageError::Format(format!(
            "WIF payload has {} bytes",
            payload.len()
        )));
    }
    let (body, checksum) = payload.split_at(payload.len() - WIF_CHECKSUM_LEN);
    if double_sha256(body)[..WIF_CHECKSUM_LEN] != *checksum {
        return Err(BitmessageError::InvalidChecksum);
    }
    if body[0] != WIF_VERSION {
        return Err(BitmessageError::Format(format!(
            "Unexpected WIF version byte {:#04x}",
            body[0]
        )));
    }
    Ok(Zeroizing::new(body[1..].to_vec()))
}

pub fn reconstruct_private_key(bytes: &[u8]) -> Result<SecretKey> {
    if bytes.len() != PRIVATE_KEY_LEN {
        return Err(BitmessageError::Format(format!(
            "Private key must be {PRIVATE_KEY_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    SecretKey::from_slice(bytes)
        .map_err(|_| BitmessageError::Format("Private key is not a valid scalar".to_string()))
}

pub fn private_key_from_wif(wif: &str) -> Result<SecretKey> {
    let bytes = decode_private_key_from_wif(wif)?;
    reconstruct_private_key(bytes.as_slice())
}

pub fn private_key_to_wif(key: &SecretKey) -> Result<String> {
    let bytes = Zeroizing::new(key.to_bytes().to_vec());
    encode_private_key_to_wif(bytes.as_slice())
}

/// Accepts a 65-byte uncompressed point or the 64-byte wire form.
pub fn reconstruct_public_key(bytes: &[u8]) -> Result<PublicKey> {
    let point = match bytes.len() {
        WIRE_PUBLIC_KEY_LEN => with_point_prefix(bytes),
        PUBLIC_KEY_LEN => bytes.to_vec(),
        other => {
            return Err(BitmessageError::Format(format!(
                "Public key has {other} bytes"
            )))
        }
    };
    PublicKey::from_sec1_bytes(&point)
        .map_err(|_| BitmessageError::Format("Point is not on secp256k1".to_string()))
}

pub fn public_key_bytes(key: &PublicKey) -> Vec<u8> {
    key.to_encoded_point(false).as_bytes().to_vec()
}

pub fn public_key_wire_bytes(key: &PublicKey) -> Vec<u8> {
    public_key_bytes(key)[1..].to_vec()
}

/// Drops the 0x04 prefix from a 65-byte point, leaving other input as is.
pub fn wire_form(key: &[u8]) -> &[u8] {
    if key.len() == PUBLIC_KEY_LEN {
        &key[1..]
    } else {
        key
    }
}

pub fn generate_private_key() -> SecretKey {
    SecretKey::random(&mut rand::rngs::OsRng)
}

/// RIPEMD160(SHA512(signing ‖ encryption)) over the 65-byte forms.
pub fn calculate_ripe_hash(signing_key: &[u8], encryption_key: &[u8]) -> Result<[u8; 20]> {
    let mut data = normalize_public_key(signing_key)?;
    data.extend(normalize_public_key(encryption_key)?);
    let digest = ripemd160_digest(&sha512_digest(&data));
    let mut ripe = [0u8; 20];
    ripe.copy_from_slice(&digest);
    Ok(ripe)
}

fn normalize_public_key(bytes: &[u8]) -> Result<Vec<u8>> {
    match bytes.len() {
        WIRE_PUBLIC_KEY_LEN => Ok(with_point_prefix(bytes)),
        PUBLIC_KEY_LEN if bytes[0] == 0x04 => Ok(bytes.to_vec()),
        other => Err(BitmessageError::Format(format!(
            "Public key has {other} bytes"
        ))),
    }
}

fn with_point_prefix(bytes: &[u8]) -> Vec<u8> {
    let mut point = Vec::with_capacity(PUBLIC_KEY_LEN);
    point.push(0x04);
    point.extend_from_slice(bytes);
    point
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_encoding::HEXLOWER;

    const WIF: &str = "5HynQJefWMVXbkft2RB9tkLJ3EWk4UgsbFg1CAsNN5DEHtw9tTR";
    const PRIVATE_HEX: &str = "15905c51ed298820cbf445680595c8fc8b2732782f765b094dfd1aeaf741f032";
    const SIGNING_PUB_HEX: &str = "04eac9804fced9771b5b43135de14a5290a8b5628770358eb51e881d2a9ad8d77cc2e63eafb7ac6073866838b42663f8e8eabccafa42a1c039d1141ffbf365d7b5";
    const ENCRYPTION_PUB_HEX: &str = "0466b2ee6c326235f0eedca14f3a4203c8a2698a8d571191ecb1ae49847f270e9b7729c5a790b5ce049be7bf5190f5c67ec62a61e9d035e75ed5edc42e2f8d75ab";

    fn hex(s: &str) -> Vec<u8> {
        HEXLOWER.decode(s.as_bytes()).unwrap()
    }

    #[test]
    fn test_known_wif_decodes_to_scalar_and_public_key() {
        let scalar = decode_private_key_from_wif(WIF).unwrap();
        assert_eq!(HEXLOWER.encode(&scalar), PRIVATE_HEX);

        let secret = reconstruct_private_key(&scalar).unwrap();
        assert_eq!(
            HEXLOWER.encode(&public_key_bytes(&secret.public_key())),
            SIGNING_PUB_HEX
        );
        assert_eq!(encode_private_key_to_wif(&scalar).unwrap(), WIF);
    }

    #[test]
    fn test_generated_wif_shape() {
        for _ in 0..20 {
            let wif = private_key_to_wif(&generate_private_key()).unwrap();
            assert!(wif.starts_with('5'));
            assert!((49..=51).contains(&wif.len()), "length {}", wif.len());
            let back = private_key_from_wif(&wif).unwrap();
            assert_eq!(private_key_to_wif(&back).unwrap(), wif);
        }
    }

    #[test]
    fn test_wif_checksum_mismatch() {
        let mut chars: Vec<char> = WIF.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == 'R' { 'S' } else { 'R' };
        let tampered: String = chars.into_iter().collect();
        assert_eq!(
            decode_private_key_from_wif(&tampered).unwrap_err(),
            BitmessageError::InvalidChecksum
        );
    }

    #[test]
    fn test_wrong_length_private_key_rejected() {
        assert!(encode_private_key_to_wif(&[1u8; 31]).unwrap_err().is_format_error());
        assert!(reconstruct_private_key(&[0u8; 32]).unwrap_err().is_format_error());
    }

    #[test]
    fn test_public_key_accepts_both_forms() {
        let full = hex(SIGNING_PUB_HEX);
        let from_full = reconstruct_public_key(&full).unwrap();
        let from_wire = reconstruct_public_key(&full[1..]).unwrap();
        assert_eq!(from_full, from_wire);
        assert_eq!(public_key_wire_bytes(&from_full), full[1..].to_vec());
    }

    #[test]
    fn test_point_off_curve_rejected() {
        let mut bad = hex(SIGNING_PUB_HEX);
        bad[64] ^= 0x01;
        assert!(reconstruct_public_key(&bad).unwrap_err().is_format_error());
    }

    #[test]
    fn test_ripe_hash_vector() {
        let ripe = calculate_ripe_hash(&hex(SIGNING_PUB_HEX), &hex(ENCRYPTION_PUB_HEX)).unwrap();
        assert_eq!(
            HEXLOWER.encode(&ripe),
            "00988701cbf9866f45096aa1b8487118eece2015"
        );
        let wire = calculate_ripe_hash(&hex(SIGNING_PUB_HEX)[1..], &hex(ENCRYPTION_PUB_HEX)[1..])
            .unwrap();
        assert_eq!(ripe, wire);
    }
}
