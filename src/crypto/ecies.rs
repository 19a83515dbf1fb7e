//! ECIES over secp256k1 with AES-256-CBC and HMAC-SHA256
//!
//! Wire layout of an encrypted blob:
//!
//! ```text
//! IV(16) ‖ curve(2) = 714 ‖ len(X)(2) ‖ X ‖ len(Y)(2) ‖ Y ‖ ciphertext ‖ MAC(32)
//! ```
//!
//! X and Y are the ephemeral public point's coordinates as unsigned big
//! integers, with a single 0x00 byte prepended when the top bit is set.
//! The MAC covers `IV ‖ 0x04 ‖ X ‖ Y ‖ ciphertext` with fixed 32-byte
//! coordinates, and is checked before anything is decrypted.

use crate::error::{BitmessageError, Result};
use crate::utils::{hmac_sha256, hmac_sha256_verify, random_bytes, sha512_digest, ByteReader};
use crate::wallet::keys::{generate_private_key, public_key_bytes, PUBLIC_KEY_LEN};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use k256::{PublicKey, SecretKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const CURVE_TYPE_SECP256K1: u16 = 714;
pub const IV_LEN: usize = 16;
pub const MAC_LEN: usize = 32;
const COORDINATE_LEN: usize = 32;

/// key_e and key_m, split from SHA512 of the shared X coordinate.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct DerivedKeys {
    pub(crate) key_e: [u8; 32],
    pub(crate) key_m: [u8; 32],
}

impl std::fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKeys { .. }")
    }
}

pub(crate) fn derive_keys(secret: &SecretKey, point: &PublicKey) -> DerivedKeys {
    let shared = k256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), point.as_affine());
    let mut digest = sha512_digest(shared.raw_secret_bytes().as_slice());
    let mut keys = DerivedKeys {
        key_e: [0u8; 32],
        key_m: [0u8; 32],
    };
    keys.key_e.copy_from_slice(&digest[..32]);
    keys.key_m.copy_from_slice(&digest[32..]);
    digest.zeroize();
    keys
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub iv: [u8; IV_LEN],
    pub curve_type: u16,
    pub x: Vec<u8>,
    pub y: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub mac: [u8; MAC_LEN],
}

impl EncryptedPayload {
    pub fn parse(data: &[u8]) -> Result<EncryptedPayload> {
        Self::read(data).map_err(|e| match e {
            BitmessageError::TruncatedObject { needed, available } => {
                BitmessageError::MalformedCiphertext(format!(
                    "field needs {needed} bytes, {available} left"
                ))
            }
            other => other,
        })
    }

    fn read(data: &[u8]) -> Result<EncryptedPayload> {
        let mut reader = ByteReader::new(data);
        let iv = reader.read_array::<IV_LEN>()?;
        let curve_type = reader.read_u16()?;
        if curve_type != CURVE_TYPE_SECP256K1 {
            return Err(BitmessageError::MalformedCiphertext(format!(
                "unknown curve type {curve_type}"
            )));
        }
        let x_len = reader.read_u16()? as usize;
        let x = reader.read_bytes(x_len)?.to_vec();
        let y_len = reader.read_u16()? as usize;
        let y = reader.read_bytes(y_len)?.to_vec();
        if reader.remaining() < MAC_LEN {
            return Err(BitmessageError::truncated(MAC_LEN, reader.remaining()));
        }
        let ciphertext = reader.read_bytes(reader.remaining() - MAC_LEN)?.to_vec();
        let mac = reader.read_array::<MAC_LEN>()?;
        Ok(EncryptedPayload {
            iv,
            curve_type,
            x,
            y,
            ciphertext,
            mac,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            IV_LEN + 6 + self.x.len() + self.y.len() + self.ciphertext.len() + MAC_LEN,
        );
        out.extend_from_slice(&self.iv);
        out.extend(self.curve_type.to_be_bytes());
        out.extend((self.x.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.x);
        out.extend((self.y.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.y);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.mac);
        out
    }

    /// Uncompressed SEC1 bytes of the ephemeral point R.
    fn ephemeral_point_bytes(&self) -> Result<Vec<u8>> {
        let mut point = Vec::with_capacity(PUBLIC_KEY_LEN);
        point.push(0x04);
        point.extend(fixed_coordinate(&self.x)?);
        point.extend(fixed_coordinate(&self.y)?);
        Ok(point)
    }
}

/// Big-integer byte form: no leading zeros, plus a sign byte when needed.
fn signed_coordinate(coordinate: &[u8]) -> Vec<u8> {
    let zeros = coordinate.iter().take_while(|b| **b == 0).count();
    let trimmed = &coordinate[zeros..];
    let mut out = Vec::with_capacity(trimmed.len() + 1);
    if trimmed.first().map_or(true, |b| b & 0x80 != 0) {
        out.push(0);
    }
    out.extend_from_slice(trimmed);
    out
}

fn fixed_coordinate(coordinate: &[u8]) -> Result<[u8; COORDINATE_LEN]> {
    let zeros = coordinate.iter().take_while(|b| **b == 0).count();
    let trimmed = &coordinate[zeros..];
    if trimmed.len() > COORDINATE_LEN {
        return Err(BitmessageError::MalformedCiphertext(format!(
            "coordinate has {} bytes",
            coordinate.len()
        )));
    }
    let mut out = [0u8; COORDINATE_LEN];
    out[COORDINATE_LEN - trimmed.len()..].copy_from_slice(trimmed);
    Ok(out)
}

fn mac_input(iv: &[u8], point: &[u8], ciphertext: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(iv.len() + point.len() + ciphertext.len());
    data.extend_from_slice(iv);
    data.extend_from_slice(point);
    data.extend_from_slice(ciphertext);
    data
}

/// Encrypts `plaintext` to `recipient` under a fresh ephemeral key and IV.
pub fn encrypt(plaintext: &[u8], recipient: &PublicKey) -> Result<Vec<u8>> {
    let ephemeral = generate_private_key();
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&random_bytes(IV_LEN));
    encrypt_with(plaintext, recipient, &ephemeral, iv)
}

pub(crate) fn encrypt_with(
    plaintext: &[u8],
    recipient: &PublicKey,
    ephemeral: &SecretKey,
    iv: [u8; IV_LEN],
) -> Result<Vec<u8>> {
    let keys = derive_keys(ephemeral, recipient);
    let ciphertext = Aes256CbcEnc::new_from_slices(&keys.key_e, &iv)
        .map_err(|e| BitmessageError::Crypto(format!("AES-256-CBC setup failed: {e}")))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let point = public_key_bytes(&ephemeral.public_key());
    let mac_bytes = hmac_sha256(&keys.key_m, &mac_input(&iv, &point, &ciphertext));
    let mut mac = [0u8; MAC_LEN];
    mac.copy_from_slice(&mac_bytes);

    let payload = EncryptedPayload {
        iv,
        curve_type: CURVE_TYPE_SECP256K1,
        x: signed_coordinate(&point[1..33]),
        y: signed_coordinate(&point[33..]),
        ciphertext,
        mac,
    };
    Ok(payload.to_bytes())
}

/// Decrypts a blob addressed to `private_key`. A wrong key, a flipped bit
/// and bad padding all look the same: `AuthenticationFailed`.
pub fn decrypt(data: &[u8], private_key: &SecretKey) -> Result<Vec<u8>> {
    let payload = EncryptedPayload::parse(data)?;
    let point_bytes = payload.ephemeral_point_bytes()?;
    let point = PublicKey::from_sec1_bytes(&point_bytes).map_err(|_| {
        BitmessageError::MalformedCiphertext("ephemeral point is not on the curve".to_string())
    })?;

    let keys = derive_keys(private_key, &point);
    let authenticated = hmac_sha256_verify(
        &keys.key_m,
        &mac_input(&payload.iv, &point_bytes, &payload.ciphertext),
        &payload.mac,
    );
    if !authenticated {
        return Err(BitmessageError::AuthenticationFailed);
    }

    Aes256CbcDec::new_from_slices(&keys.key_e, &payload.iv)
        .map_err(|_| BitmessageError::AuthenticationFailed)?
        .decrypt_padded_vec_mut::<Pkcs7>(&payload.ciphertext)
        .map_err(|_| BitmessageError::AuthenticationFailed)
}
