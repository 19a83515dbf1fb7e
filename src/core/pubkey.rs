use crate::core::behaviour::Behaviour;
use crate::core::object::{BmObject, ObjectType};
use crate::crypto::{decrypt, encrypt, sign, verify_signature_with_key_bytes};
use crate::error::{BitmessageError, Result};
use crate::storage::Record;
use crate::utils::{encode_varint, ByteReader};
use crate::wallet::address::{DecodedAddress, TAG_LEN};
use crate::wallet::identity::Address;
use crate::wallet::keys::{
    calculate_ripe_hash, public_key_bytes, reconstruct_private_key, reconstruct_public_key,
    wire_form, WIRE_PUBLIC_KEY_LEN,
};
use k256::SecretKey;
use log::debug;
use serde::{Deserialize, Serialize};

/// A public key announcement, ours or one retrieved for a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Pubkey {
    pub id: Option<u64>,
    /// Owning identity for our own keys, or the contact it was fetched for.
    pub address_id: Option<u64>,
    pub address_version: u64,
    pub stream: u64,
    pub behaviour: Behaviour,
    /// 65-byte uncompressed points.
    pub public_signing_key: Vec<u8>,
    pub public_encryption_key: Vec<u8>,
    pub nonce_trials_per_byte: u64,
    pub extra_bytes: u64,
    pub signature: Vec<u8>,
    pub pow_nonce: u64,
    pub expires: u64,
}

impl Pubkey {
    /// Unsigned announcement for one of our identities.
    pub fn from_address(
        address: &Address,
        nonce_trials_per_byte: u64,
        extra_bytes: u64,
        expires: u64,
    ) -> Pubkey {
        Pubkey {
            id: None,
            address_id: address.id,
            address_version: address.version,
            stream: address.stream,
            behaviour: Behaviour::own(),
            public_signing_key: address.public_signing_key.clone(),
            public_encryption_key: address.public_encryption_key.clone(),
            nonce_trials_per_byte,
            extra_bytes,
            signature: Vec::new(),
            pow_nonce: 0,
            expires,
        }
    }

    pub fn ripe(&self) -> Result<[u8; 20]> {
        calculate_ripe_hash(&self.public_signing_key, &self.public_encryption_key)
    }

    pub fn decoded_address(&self) -> Result<DecodedAddress> {
        DecodedAddress::new(self.address_version, self.stream, &self.ripe()?)
    }

    pub fn address(&self) -> Result<String> {
        Ok(self.decoded_address()?.encode())
    }

    fn object_shell(&self) -> BmObject {
        BmObject::new(
            ObjectType::Pubkey,
            self.address_version,
            self.stream,
            self.expires,
            Vec::new(),
        )
    }

    /// bitfield ‖ signing key ‖ encryption key ‖ ntpb ‖ extra
    fn key_fields(&self) -> Vec<u8> {
        let mut out = self.behaviour.bits().to_be_bytes().to_vec();
        out.extend_from_slice(wire_form(&self.public_signing_key));
        out.extend_from_slice(wire_form(&self.public_encryption_key));
        out.extend(encode_varint(self.nonce_trials_per_byte));
        out.extend(encode_varint(self.extra_bytes));
        out
    }

    /// Header fields, the tag for v4, then the key fields.
    pub fn signature_payload(&self) -> Result<Vec<u8>> {
        let mut out = self.object_shell().header_bytes();
        if self.address_version >= 4 {
            out.extend_from_slice(&self.decoded_address()?.tag());
        }
        out.extend(self.key_fields());
        Ok(out)
    }

    pub fn sign(&mut self, signing_key: &SecretKey) -> Result<()> {
        self.signature = sign(&self.signature_payload()?, signing_key)?;
        Ok(())
    }

    pub fn verify(&self) -> Result<bool> {
        Ok(verify_signature_with_key_bytes(
            &self.signature_payload()?,
            &self.signature,
            &self.public_signing_key,
        ))
    }

    fn plain_body(&self) -> Vec<u8> {
        let mut out = self.key_fields();
        out.extend(encode_varint(self.signature.len() as u64));
        out.extend_from_slice(&self.signature);
        out
    }

    /// Builds the unstamped network object. Version 4 bodies are encrypted
    /// to the key derived from the address itself.
    pub fn to_object(&self) -> Result<BmObject> {
        let body = match self.address_version {
            3 => self.plain_body(),
            4 => {
                let decoded = self.decoded_address()?;
                let key = address_decryption_key(&decoded)?;
                let mut body = decoded.tag().to_vec();
                body.extend(encrypt(&self.plain_body(), &key.public_key())?);
                body
            }
            version => {
                return Err(BitmessageError::UnsupportedObjectVersion {
                    object_type: ObjectType::Pubkey.code(),
                    version,
                })
            }
        };
        let mut object = self.object_shell();
        object.body = body;
        object.nonce = self.pow_nonce;
        Ok(object)
    }

    /// Reads a pubkey object. Version 4 needs the address it belongs to in
    /// order to decrypt; a tag for some other address is a `KeyMismatch`.
    pub fn from_object(object: &BmObject, address: Option<&DecodedAddress>) -> Result<Pubkey> {
        if object.object_kind() != Some(ObjectType::Pubkey) {
            return Err(BitmessageError::Format(format!(
                "Object type {} is not a pubkey",
                object.object_type
            )));
        }
        let plain = match object.version {
            3 => object.body.clone(),
            4 => {
                let address = address.ok_or_else(|| {
                    BitmessageError::KeyMismatch("No address to decrypt v4 pubkey".to_string())
                })?;
                let mut reader = ByteReader::new(&object.body);
                let tag = reader.read_array::<TAG_LEN>()?;
                if tag != address.tag() {
                    return Err(BitmessageError::KeyMismatch(
                        "Pubkey tag belongs to another address".to_string(),
                    ));
                }
                let key = address_decryption_key(address)?;
                decrypt(reader.read_rest(), &key)?
            }
            version => {
                return Err(BitmessageError::UnsupportedObjectVersion {
                    object_type: object.object_type,
                    version,
                })
            }
        };

        let mut reader = ByteReader::new(&plain);
        let behaviour = Behaviour::from_bits(reader.read_u32()?);
        let public_signing_key = full_key(reader.read_bytes(WIRE_PUBLIC_KEY_LEN)?)?;
        let public_encryption_key = full_key(reader.read_bytes(WIRE_PUBLIC_KEY_LEN)?)?;
        let nonce_trials_per_byte = reader.read_varint()?;
        let extra_bytes = reader.read_varint()?;
        let signature = reader.read_var_bytes()?.to_vec();

        Ok(Pubkey {
            id: None,
            address_id: None,
            address_version: object.version,
            stream: object.stream,
            behaviour,
            public_signing_key,
            public_encryption_key,
            nonce_trials_per_byte,
            extra_bytes,
            signature,
            pow_nonce: object.nonce,
            expires: object.expires,
        })
    }
}

impl Record for Pubkey {
    const KIND: &'static str = "pubkey";

    fn id(&self) -> Option<u64> {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }
}

/// Checks a pubkey really belongs to `address` and is signed by it.
pub fn validate_pubkey(pubkey: &Pubkey, address: &DecodedAddress) -> Result<()> {
    if pubkey.address_version != address.version || pubkey.stream != address.stream {
        return Err(BitmessageError::KeyMismatch(format!(
            "Pubkey is version {} stream {}, address is version {} stream {}",
            pubkey.address_version, pubkey.stream, address.version, address.stream
        )));
    }
    if pubkey.ripe()? != address.ripe {
        return Err(BitmessageError::KeyMismatch(
            "Pubkey keys do not hash to the address ripe".to_string(),
        ));
    }
    if !pubkey.verify()? {
        debug!("Pubkey signature for {} does not verify", address.encode());
        return Err(BitmessageError::SignatureInvalid);
    }
    Ok(())
}

fn address_decryption_key(address: &DecodedAddress) -> Result<SecretKey> {
    reconstruct_private_key(&address.encryption_key())
        .map_err(|_| BitmessageError::Crypto("Address hash is not a usable scalar".to_string()))
}

/// Restores the 0x04 prefix, rejecting points off the curve.
fn full_key(wire: &[u8]) -> Result<Vec<u8>> {
    let point = reconstruct_public_key(wire)?;
    Ok(public_key_bytes(&point))
}
