use crate::config::Config;
use crate::error::{BitmessageError, Result};
use crate::storage::Record;
use crate::wallet::address::{DecodedAddress, TAG_LEN};
use crate::wallet::keys::{
    calculate_ripe_hash, generate_private_key, private_key_from_wif, private_key_to_wif,
    public_key_bytes, reconstruct_public_key,
};
use k256::{PublicKey, SecretKey};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// One of our own identities. Private keys are kept in WIF form and turned
/// into scalars only for the duration of a signing or decryption call.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Address {
    pub id: Option<u64>,
    pub label: String,
    pub address: String,
    pub version: u64,
    pub stream: u64,
    pub ripe: [u8; 20],
    pub tag: [u8; TAG_LEN],
    pub private_signing_key: String,
    pub private_encryption_key: String,
    pub public_signing_key: Vec<u8>,
    pub public_encryption_key: Vec<u8>,
}

impl Address {
    pub fn from_private_keys(
        label: &str,
        version: u64,
        stream: u64,
        signing_wif: &str,
        encryption_wif: &str,
    ) -> Result<Address> {
        let signing = private_key_from_wif(signing_wif)?;
        let encryption = private_key_from_wif(encryption_wif)?;
        Self::from_secrets(label, version, stream, &signing, &encryption)
    }

    fn from_secrets(
        label: &str,
        version: u64,
        stream: u64,
        signing: &SecretKey,
        encryption: &SecretKey,
    ) -> Result<Address> {
        let public_signing_key = public_key_bytes(&signing.public_key());
        let public_encryption_key = public_key_bytes(&encryption.public_key());
        let ripe = calculate_ripe_hash(&public_signing_key, &public_encryption_key)?;
        let decoded = DecodedAddress::new(version, stream, &ripe)?;
        Ok(Address {
            id: None,
            label: label.to_string(),
            address: decoded.encode(),
            version,
            stream,
            ripe,
            tag: decoded.tag(),
            private_signing_key: private_key_to_wif(signing)?,
            private_encryption_key: private_key_to_wif(encryption)?,
            public_signing_key,
            public_encryption_key,
        })
    }

    pub fn decoded(&self) -> DecodedAddress {
        DecodedAddress {
            version: self.version,
            stream: self.stream,
            ripe: self.ripe,
        }
    }

    pub fn signing_key(&self) -> Result<SecretKey> {
        private_key_from_wif(&self.private_signing_key)
    }

    pub fn encryption_key(&self) -> Result<SecretKey> {
        private_key_from_wif(&self.private_encryption_key)
    }

    pub fn public_signing_point(&self) -> Result<PublicKey> {
        reconstruct_public_key(&self.public_signing_key)
    }

    pub fn public_encryption_point(&self) -> Result<PublicKey> {
        reconstruct_public_key(&self.public_encryption_key)
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Address")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("address", &self.address)
            .finish()
    }
}

impl Record for Address {
    const KIND: &'static str = "address";

    fn id(&self) -> Option<u64> {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }
}

/// Creates fresh identities. The encryption key is regenerated until the
/// ripe hash starts with the requested number of zero bytes, which keeps
/// the address string short.
#[derive(Debug, Clone)]
pub struct AddressGenerator {
    version: u64,
    stream: u64,
    leading_zeros: usize,
}

impl AddressGenerator {
    pub fn new(version: u64, stream: u64) -> AddressGenerator {
        AddressGenerator {
            version,
            stream,
            leading_zeros: 1,
        }
    }

    pub fn from_config(config: &Config) -> AddressGenerator {
        AddressGenerator::new(config.address_version, config.stream)
            .with_leading_zeros(config.ripe_leading_zeros)
    }

    pub fn with_leading_zeros(mut self, leading_zeros: usize) -> AddressGenerator {
        self.leading_zeros = leading_zeros;
        self
    }

    pub fn generate(&self, label: &str) -> Result<Address> {
        if self.leading_zeros > 4 {
            return Err(BitmessageError::Config(format!(
                "Demanding {} leading zero bytes is not practical",
                self.leading_zeros
            )));
        }
        let signing = generate_private_key();
        let public_signing_key = public_key_bytes(&signing.public_key());

        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            let encryption = generate_private_key();
            let public_encryption_key = public_key_bytes(&encryption.public_key());
            let ripe = calculate_ripe_hash(&public_signing_key, &public_encryption_key)?;
            if ripe.iter().take(self.leading_zeros).all(|b| *b == 0) {
                let address =
                    Address::from_secrets(label, self.version, self.stream, &signing, &encryption)?;
                debug!("Ripe search took {attempts} key pairs");
                info!("Generated address {}", address.address);
                return Ok(address);
            }
        }
    }
}
