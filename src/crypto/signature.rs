use crate::error::{BitmessageError, Result};
use crate::utils::{sha1_digest, sha256_digest};
use crate::wallet::keys::{private_key_from_wif, reconstruct_public_key};
use k256::ecdsa::signature::hazmat::{PrehashVerifier, RandomizedPrehashSigner};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::{PublicKey, SecretKey};
use log::debug;

/// ECDSA over SHA-256 of `payload`, DER encoded. Each call draws fresh
/// randomness, so signing the same payload twice gives different bytes.
pub fn sign(payload: &[u8], private_key: &SecretKey) -> Result<Vec<u8>> {
    let signing_key = SigningKey::from(private_key);
    let signature: Signature = signing_key
        .sign_prehash_with_rng(&mut rand::rngs::OsRng, &sha256_digest(payload))
        .map_err(|e| BitmessageError::Crypto(format!("Signing failed: {e}")))?;
    Ok(signature.to_der().as_bytes().to_vec())
}

pub fn sign_with_wif_key(payload: &[u8], wif: &str) -> Result<Vec<u8>> {
    let private_key = private_key_from_wif(wif)?;
    sign(payload, &private_key)
}

/// Never fails: malformed DER or a bad key simply does not verify.
/// SHA-1 digests are accepted as well since older peers still sign with it.
pub fn verify_signature(payload: &[u8], der_signature: &[u8], public_key: &PublicKey) -> bool {
    let signature = match Signature::from_der(der_signature) {
        Ok(signature) => signature,
        Err(_) => {
            debug!("Signature is not valid DER");
            return false;
        }
    };
    // Peers do not enforce low-S, k256 does
    let signature = signature.normalize_s().unwrap_or(signature);
    let verifying_key = VerifyingKey::from(public_key);

    if verifying_key
        .verify_prehash(&sha256_digest(payload), &signature)
        .is_ok()
    {
        return true;
    }
    verifying_key
        .verify_prehash(&sha1_digest(payload), &signature)
        .is_ok()
}

/// Same as [`verify_signature`] for a key still in wire form.
pub fn verify_signature_with_key_bytes(
    payload: &[u8],
    der_signature: &[u8],
    public_key: &[u8],
) -> bool {
    match reconstruct_public_key(public_key) {
        Ok(key) => verify_signature(payload, der_signature, &key),
        Err(_) => false,
    }
}
