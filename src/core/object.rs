use crate::core::proof_of_work::PowFormula;
use crate::error::{BitmessageError, Result};
use crate::storage::Record;
use crate::utils::{double_sha512, encode_varint, ByteReader};
use serde::{Deserialize, Serialize};

pub const NONCE_LEN: usize = 8;
/// Longest lifetime a peer may give an object.
pub const MAX_OBJECT_TTL: u64 = 28 * 24 * 60 * 60;
/// Tolerated clock difference between peers.
pub const CLOCK_SKEW: u64 = 3 * 60 * 60;
/// Length of the data every ack carries.
pub const ACK_DATA_LEN: usize = 32;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum ObjectType {
    Getpubkey,
    Pubkey,
    Msg,
    Broadcast,
}

impl ObjectType {
    pub fn code(self) -> u32 {
        match self {
            ObjectType::Getpubkey => 0,
            ObjectType::Pubkey => 1,
            ObjectType::Msg => 2,
            ObjectType::Broadcast => 3,
        }
    }

    pub fn from_code(code: u32) -> Option<ObjectType> {
        match code {
            0 => Some(ObjectType::Getpubkey),
            1 => Some(ObjectType::Pubkey),
            2 => Some(ObjectType::Msg),
            3 => Some(ObjectType::Broadcast),
            _ => None,
        }
    }
}

/// Selects the object header layout and the matching POW formula. V2 is the
/// legacy layout with a 4-byte time field. Nothing is inferred from the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    V2,
    #[default]
    V3,
}

impl ProtocolVersion {
    fn time_width(self) -> usize {
        match self {
            ProtocolVersion::V2 => 4,
            ProtocolVersion::V3 => 8,
        }
    }

    pub fn pow_formula(self) -> PowFormula {
        match self {
            ProtocolVersion::V2 => PowFormula::Legacy,
            ProtocolVersion::V3 => PowFormula::TimeWeighted,
        }
    }
}

/// A network object.
///
/// ```text
/// nonce u64 ‖ expires u64 (u32 on V2) ‖ type u32 ‖ version varint ‖ stream varint ‖ body
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BmObject {
    pub nonce: u64,
    pub expires: u64,
    pub object_type: u32,
    pub version: u64,
    pub stream: u64,
    pub body: Vec<u8>,
}

impl BmObject {
    /// New object with the nonce slot zeroed, waiting for POW.
    pub fn new(
        object_type: ObjectType,
        version: u64,
        stream: u64,
        expires: u64,
        body: Vec<u8>,
    ) -> BmObject {
        BmObject {
            nonce: 0,
            expires,
            object_type: object_type.code(),
            version,
            stream,
            body,
        }
    }

    pub fn parse(data: &[u8]) -> Result<BmObject> {
        Self::parse_with(data, ProtocolVersion::V3)
    }

    pub fn parse_with(data: &[u8], protocol: ProtocolVersion) -> Result<BmObject> {
        let mut reader = ByteReader::new(data);
        let nonce = reader.read_u64()?;
        let expires = match protocol.time_width() {
            4 => reader.read_u32()? as u64,
            _ => reader.read_u64()?,
        };
        let object_type = reader.read_u32()?;
        let version = reader.read_varint()?;
        let stream = reader.read_varint()?;
        let body = reader.read_rest().to_vec();
        Ok(BmObject {
            nonce,
            expires,
            object_type,
            version,
            stream,
            body,
        })
    }

    pub fn object_kind(&self) -> Option<ObjectType> {
        ObjectType::from_code(self.object_type)
    }

    /// Header fields between nonce and body; signatures cover these.
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut out = self.expires.to_be_bytes().to_vec();
        out.extend(self.object_type.to_be_bytes());
        out.extend(encode_varint(self.version));
        out.extend(encode_varint(self.stream));
        out
    }

    /// Everything after the nonce slot, the range POW is computed over.
    pub fn payload_without_nonce(&self) -> Vec<u8> {
        let mut out = self.header_bytes();
        out.extend_from_slice(&self.body);
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.nonce.to_be_bytes().to_vec();
        out.extend(self.payload_without_nonce());
        out
    }

    pub fn payload_without_nonce_with(&self, protocol: ProtocolVersion) -> Result<Vec<u8>> {
        match protocol {
            ProtocolVersion::V3 => Ok(self.payload_without_nonce()),
            ProtocolVersion::V2 => {
                let expires = u32::try_from(self.expires).map_err(|_| {
                    BitmessageError::Format(format!(
                        "Time {} does not fit the legacy header",
                        self.expires
                    ))
                })?;
                let mut out = expires.to_be_bytes().to_vec();
                out.extend(self.object_type.to_be_bytes());
                out.extend(encode_varint(self.version));
                out.extend(encode_varint(self.stream));
                out.extend_from_slice(&self.body);
                Ok(out)
            }
        }
    }

    pub fn to_bytes_with(&self, protocol: ProtocolVersion) -> Result<Vec<u8>> {
        let mut out = self.nonce.to_be_bytes().to_vec();
        out.extend(self.payload_without_nonce_with(protocol)?);
        Ok(out)
    }

    /// False for objects that expired more than [`CLOCK_SKEW`] ago or claim
    /// a lifetime beyond [`MAX_OBJECT_TTL`].
    pub fn is_within_lifetime(&self, now: u64) -> bool {
        self.expires.saturating_add(CLOCK_SKEW) >= now
            && self.expires <= now + MAX_OBJECT_TTL + CLOCK_SKEW
    }

    /// First 32 bytes of the double SHA-512 of the wire bytes; peers use it
    /// to name objects.
    pub fn inventory_hash(&self) -> Vec<u8> {
        double_sha512(&self.to_bytes())[..32].to_vec()
    }

    pub fn is_ack(&self) -> bool {
        self.object_kind() == Some(ObjectType::Msg)
            && self.version == 1
            && self.body.len() == ACK_DATA_LEN
    }
}

/// A serialized object kept in storage, typically one we produced and
/// still need to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct ObjectPayload {
    pub id: Option<u64>,
    pub related_address_id: Option<u64>,
    pub object_type: ObjectType,
    pub time: u64,
    pub payload: Vec<u8>,
    pub pow_done: bool,
}

impl ObjectPayload {
    pub fn new(object_type: ObjectType, payload: Vec<u8>, time: u64) -> ObjectPayload {
        ObjectPayload {
            id: None,
            related_address_id: None,
            object_type,
            time,
            payload,
            pow_done: true,
        }
    }

    pub fn with_related_address(mut self, address_id: Option<u64>) -> ObjectPayload {
        self.related_address_id = address_id;
        self
    }
}

impl Record for ObjectPayload {
    const KIND: &'static str = "payload";

    fn id(&self) -> Option<u64> {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }
}
