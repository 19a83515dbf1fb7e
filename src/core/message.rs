use crate::core::behaviour::Behaviour;
use crate::crypto::{sign, verify_signature_with_key_bytes};
use crate::error::{BitmessageError, Result};
use crate::storage::Record;
use crate::utils::{encode_varint, ByteReader};
use crate::wallet::address::{DecodedAddress, RIPE_LEN};
use crate::wallet::keys::{
    calculate_ripe_hash, public_key_bytes, reconstruct_public_key, wire_form, WIRE_PUBLIC_KEY_LEN,
};
use k256::SecretKey;
use serde::{Deserialize, Serialize};

const SUBJECT_PREFIX: &str = "Subject:";
const BODY_MARKER: &str = "\nBody:";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum MessageEncoding {
    Ignore,
    /// Body only.
    Trivial,
    /// "Subject:" + subject + "\nBody:" + body
    Simple,
    Other(u64),
}

impl MessageEncoding {
    pub fn code(self) -> u64 {
        match self {
            MessageEncoding::Ignore => 0,
            MessageEncoding::Trivial => 1,
            MessageEncoding::Simple => 2,
            MessageEncoding::Other(code) => code,
        }
    }

    pub fn from_code(code: u64) -> MessageEncoding {
        match code {
            0 => MessageEncoding::Ignore,
            1 => MessageEncoding::Trivial,
            2 => MessageEncoding::Simple,
            other => MessageEncoding::Other(other),
        }
    }
}

pub fn encode_message_text(encoding: MessageEncoding, subject: &str, body: &str) -> Vec<u8> {
    match encoding {
        MessageEncoding::Simple => {
            format!("{SUBJECT_PREFIX}{subject}{BODY_MARKER}{body}").into_bytes()
        }
        _ => body.as_bytes().to_vec(),
    }
}

/// Splits message bytes into (subject, body).
pub fn decode_message_text(encoding: MessageEncoding, message: &[u8]) -> (String, String) {
    let text = String::from_utf8_lossy(message).into_owned();
    match encoding {
        MessageEncoding::Simple => match text.find(BODY_MARKER) {
            Some(position) => {
                let subject = text[..position]
                    .strip_prefix(SUBJECT_PREFIX)
                    .unwrap_or(&text[..position])
                    .to_string();
                (subject, text[position + BODY_MARKER.len()..].to_string())
            }
            None => (String::new(), text),
        },
        MessageEncoding::Ignore => (String::new(), String::new()),
        _ => (String::new(), text),
    }
}

/// Decrypted content of a msg object (version 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnencryptedMessage {
    pub sender_version: u64,
    pub sender_stream: u64,
    pub behaviour: Behaviour,
    pub public_signing_key: Vec<u8>,
    pub public_encryption_key: Vec<u8>,
    /// Only carried for sender versions 3 and up.
    pub nonce_trials_per_byte: u64,
    pub extra_bytes: u64,
    pub destination_ripe: [u8; RIPE_LEN],
    pub encoding: MessageEncoding,
    pub message: Vec<u8>,
    pub ack_message: Vec<u8>,
    pub signature: Vec<u8>,
}

impl UnencryptedMessage {
    pub fn encode_without_signature(&self) -> Vec<u8> {
        let mut out = encode_varint(self.sender_version);
        out.extend(encode_varint(self.sender_stream));
        out.extend(self.behaviour.bits().to_be_bytes());
        out.extend_from_slice(wire_form(&self.public_signing_key));
        out.extend_from_slice(wire_form(&self.public_encryption_key));
        if self.sender_version >= 3 {
            out.extend(encode_varint(self.nonce_trials_per_byte));
            out.extend(encode_varint(self.extra_bytes));
        }
        out.extend_from_slice(&self.destination_ripe);
        out.extend(encode_varint(self.encoding.code()));
        out.extend(encode_varint(self.message.len() as u64));
        out.extend_from_slice(&self.message);
        out.extend(encode_varint(self.ack_message.len() as u64));
        out.extend_from_slice(&self.ack_message);
        out
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.encode_without_signature();
        out.extend(encode_varint(self.signature.len() as u64));
        out.extend_from_slice(&self.signature);
        out
    }

    pub fn decode(data: &[u8]) -> Result<UnencryptedMessage> {
        let mut reader = ByteReader::new(data);
        let sender_version = reader.read_varint()?;
        let sender_stream = reader.read_varint()?;
        let behaviour = Behaviour::from_bits(reader.read_u32()?);
        let public_signing_key = full_key(reader.read_bytes(WIRE_PUBLIC_KEY_LEN)?)?;
        let public_encryption_key = full_key(reader.read_bytes(WIRE_PUBLIC_KEY_LEN)?)?;
        let (nonce_trials_per_byte, extra_bytes) = if sender_version >= 3 {
            (reader.read_varint()?, reader.read_varint()?)
        } else {
            (0, 0)
        };
        let destination_ripe = reader.read_array::<RIPE_LEN>()?;
        let encoding = MessageEncoding::from_code(reader.read_varint()?);
        let message = reader.read_var_bytes()?.to_vec();
        let ack_message = reader.read_var_bytes()?.to_vec();
        let signature = reader.read_var_bytes()?.to_vec();
        Ok(UnencryptedMessage {
            sender_version,
            sender_stream,
            behaviour,
            public_signing_key,
            public_encryption_key,
            nonce_trials_per_byte,
            extra_bytes,
            destination_ripe,
            encoding,
            message,
            ack_message,
            signature,
        })
    }

    /// `header` is the msg object's expires, type, version and stream.
    pub fn signature_payload(&self, header: &[u8]) -> Vec<u8> {
        let mut out = header.to_vec();
        out.extend(self.encode_without_signature());
        out
    }

    pub fn sign(&mut self, header: &[u8], signing_key: &SecretKey) -> Result<()> {
        self.signature = sign(&self.signature_payload(header), signing_key)?;
        Ok(())
    }

    pub fn verify(&self, header: &[u8]) -> bool {
        verify_signature_with_key_bytes(
            &self.signature_payload(header),
            &self.signature,
            &self.public_signing_key,
        )
    }

    pub fn sender(&self) -> Result<DecodedAddress> {
        let ripe = calculate_ripe_hash(&self.public_signing_key, &self.public_encryption_key)?;
        DecodedAddress::new(self.sender_version, self.sender_stream, &ripe)
    }

    pub fn subject_and_body(&self) -> (String, String) {
        decode_message_text(self.encoding, &self.message)
    }
}

fn full_key(wire: &[u8]) -> Result<Vec<u8>> {
    reconstruct_public_key(wire)
        .map(|key| public_key_bytes(&key))
        .map_err(|_| BitmessageError::Format("Embedded key is not on the curve".to_string()))
}

/// Outgoing lifecycle. Incoming messages are stored as `Received`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum MessageStatus {
    Composed,
    Signed,
    Encrypted,
    PowStamped,
    Disseminated,
    Acknowledged,
    Failed,
    Received,
}

/// Application level message, sent or received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Message {
    pub id: Option<u64>,
    pub from_address: String,
    pub to_address: String,
    pub subject: String,
    pub body: String,
    pub encoding: MessageEncoding,
    pub ack_data: Vec<u8>,
    pub status: MessageStatus,
    pub time: u64,
    pub sender_address_id: Option<u64>,
    pub recipient_address_id: Option<u64>,
    pub msg_payload_id: Option<u64>,
    pub ack_payload_id: Option<u64>,
    /// Inventory hash of the msg object a received message came in.
    pub inventory_hash: Vec<u8>,
}

impl Message {
    pub fn compose(
        from_address: &str,
        to_address: &str,
        subject: &str,
        body: &str,
        time: u64,
    ) -> Message {
        Message {
            id: None,
            from_address: from_address.to_string(),
            to_address: to_address.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            encoding: MessageEncoding::Simple,
            ack_data: Vec::new(),
            status: MessageStatus::Composed,
            time,
            sender_address_id: None,
            recipient_address_id: None,
            msg_payload_id: None,
            ack_payload_id: None,
            inventory_hash: Vec::new(),
        }
    }

    pub fn is_outgoing(&self) -> bool {
        self.status != MessageStatus::Received
    }
}

impl Record for Message {
    const KIND: &'static str = "message";

    fn id(&self) -> Option<u64> {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }
}
