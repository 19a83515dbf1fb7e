//! Incoming pipeline
//!
//! Parses objects fetched from the network, checks their POW and lifetime,
//! and dispatches them by type. Objects meant for someone else come back as
//! [`IncomingOutcome::Ignored`]; malformed ones are errors that
//! [`IncomingProcessor::process_batch`] logs and skips.

use crate::config::Config;
use crate::core::message::{Message, MessageStatus, UnencryptedMessage};
use crate::core::object::{BmObject, ObjectPayload, ObjectType};
use crate::core::proof_of_work::{verify_object, PowParams};
use crate::core::pubkey::{validate_pubkey, Pubkey};
use crate::core::queue::{enqueue, QueueTask, RecordRef};
use crate::crypto::decrypt;
use crate::error::{BitmessageError, Result};
use crate::network::{unwrap_object, Transport};
use crate::storage::{upsert_pubkey, RecordStore, Storage};
use crate::utils::{current_time, ByteReader};
use crate::wallet::address::{decode_address, DecodedAddress, TAG_LEN};
use crate::wallet::identity::Address;
use log::{debug, info, warn};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingOutcome {
    /// A msg for one of our addresses. `ack_payload_id` is the stored ack
    /// queued for dissemination, when the sender asked for one.
    Received {
        message: Message,
        ack_payload_id: Option<u64>,
    },
    /// Id of the sent message the ack belongs to.
    Acknowledged(u64),
    /// A pubkey we were waiting for, now stored.
    Pubkey(Pubkey),
    /// Someone asked for one of our pubkeys; the announcement is queued.
    GetpubkeyAnswered(u64),
    Ignored,
}

pub struct IncomingProcessor {
    storage: Arc<dyn Storage>,
    transport: Arc<dyn Transport>,
    pow_params: PowParams,
}

impl IncomingProcessor {
    pub fn new(
        storage: Arc<dyn Storage>,
        transport: Arc<dyn Transport>,
        config: &Config,
    ) -> IncomingProcessor {
        IncomingProcessor {
            storage,
            transport,
            pow_params: config.network_pow_params(),
        }
    }

    pub fn fetch_and_process(&self) -> Result<Vec<IncomingOutcome>> {
        let objects = self.transport.fetch_new_objects()?;
        debug!("Fetched {} objects", objects.len());
        self.process_batch(&objects)
    }

    /// Processes every object. Bad input is logged and skipped; only
    /// storage failures stop the batch.
    pub fn process_batch(&self, objects: &[Vec<u8>]) -> Result<Vec<IncomingOutcome>> {
        let mut outcomes = Vec::with_capacity(objects.len());
        for (index, raw) in objects.iter().enumerate() {
            match self.process_object(raw) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) if e.is_discardable() => {
                    warn!("Discarding object {index} of {}: {e}", objects.len());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outcomes)
    }

    pub fn process_object(&self, raw: &[u8]) -> Result<IncomingOutcome> {
        let object = BmObject::parse(raw)?;
        let now = current_time();
        if !object.is_within_lifetime(now) {
            debug!("Dropping object expiring at {} (now {now})", object.expires);
            return Ok(IncomingOutcome::Ignored);
        }
        verify_object(&object, &self.pow_params, now)?;

        match object.object_kind() {
            Some(ObjectType::Getpubkey) => self.process_getpubkey(&object),
            Some(ObjectType::Pubkey) => self.process_pubkey(&object),
            Some(ObjectType::Msg) if object.is_ack() => self.process_ack(&object),
            Some(ObjectType::Msg) => self.process_msg(&object),
            Some(ObjectType::Broadcast) | None => {
                debug!("Ignoring object of type {}", object.object_type);
                Ok(IncomingOutcome::Ignored)
            }
        }
    }

    /// Tries every one of our encryption keys. A msg none of them opens is
    /// not for us and is ignored without error.
    pub fn process_msg(&self, object: &BmObject) -> Result<IncomingOutcome> {
        if object.version != 1 {
            return Err(BitmessageError::UnsupportedObjectVersion {
                object_type: object.object_type,
                version: object.version,
            });
        }
        let inventory_hash = object.inventory_hash();
        let seen = self.storage.messages().search(&|message: &Message| {
            message.status == MessageStatus::Received && message.inventory_hash == inventory_hash
        })?;
        if !seen.is_empty() {
            debug!("msg already received");
            return Ok(IncomingOutcome::Ignored);
        }

        let mut opened = None;
        for address in self.storage.addresses().get_all()? {
            match decrypt(&object.body, &address.encryption_key()?) {
                Ok(plain) => {
                    opened = Some((address, plain));
                    break;
                }
                Err(BitmessageError::AuthenticationFailed) => continue,
                Err(e) => return Err(e),
            }
        }
        let Some((recipient, plain)) = opened else {
            debug!("msg is not for any of our addresses");
            return Ok(IncomingOutcome::Ignored);
        };

        let (mut message, unencrypted) =
            self.extract_message_from_unencrypted_msg(object, &plain, &recipient)?;
        self.remember_sender(&unencrypted, object.expires)?;

        let ack_payload_id = if unencrypted.behaviour.does_ack() {
            self.queue_ack(&unencrypted.ack_message, recipient.id)?
        } else {
            None
        };
        message.ack_payload_id = ack_payload_id;
        message.inventory_hash = inventory_hash;
        self.storage.messages().add(&mut message)?;
        info!(
            "Received message from {} to {}",
            message.from_address, message.to_address
        );
        Ok(IncomingOutcome::Received {
            message,
            ack_payload_id,
        })
    }

    /// Decodes a decrypted msg body and checks it was really meant for
    /// `recipient` and signed by the keys it carries.
    pub fn extract_message_from_unencrypted_msg(
        &self,
        object: &BmObject,
        plain: &[u8],
        recipient: &Address,
    ) -> Result<(Message, UnencryptedMessage)> {
        let unencrypted = UnencryptedMessage::decode(plain)?;
        if unencrypted.destination_ripe != recipient.ripe {
            return Err(BitmessageError::KeyMismatch(
                "msg was encrypted to us but addressed to another ripe".to_string(),
            ));
        }
        if !unencrypted.verify(&object.header_bytes()) {
            return Err(BitmessageError::SignatureInvalid);
        }
        let sender = unencrypted.sender()?;
        let (subject, body) = unencrypted.subject_and_body();
        let mut message = Message::compose(
            &sender.encode(),
            &recipient.address,
            &subject,
            &body,
            current_time(),
        );
        message.encoding = unencrypted.encoding;
        message.status = MessageStatus::Received;
        message.recipient_address_id = recipient.id;
        Ok((message, unencrypted))
    }

    /// Keeps the sender's keys so a reply needs no pubkey round trip.
    fn remember_sender(&self, unencrypted: &UnencryptedMessage, expires: u64) -> Result<()> {
        let pubkey = Pubkey {
            id: None,
            address_id: None,
            address_version: unencrypted.sender_version,
            stream: unencrypted.sender_stream,
            behaviour: unencrypted.behaviour,
            public_signing_key: unencrypted.public_signing_key.clone(),
            public_encryption_key: unencrypted.public_encryption_key.clone(),
            nonce_trials_per_byte: unencrypted.nonce_trials_per_byte,
            extra_bytes: unencrypted.extra_bytes,
            signature: Vec::new(),
            pow_nonce: 0,
            expires,
        };
        upsert_pubkey(self.storage.pubkeys(), pubkey)?;
        Ok(())
    }

    fn queue_ack(&self, ack_message: &[u8], recipient_id: Option<u64>) -> Result<Option<u64>> {
        if ack_message.is_empty() {
            return Ok(None);
        }
        let ack = match unwrap_object(ack_message).and_then(|raw| BmObject::parse(&raw)) {
            Ok(ack) if ack.is_ack() => ack,
            Ok(_) | Err(_) => {
                warn!("Sender asked for an ack but embedded no usable one");
                return Ok(None);
            }
        };
        let now = current_time();
        let mut payload = ObjectPayload::new(ObjectType::Msg, ack.to_bytes(), now)
            .with_related_address(recipient_id);
        let id = self.storage.payloads().add(&mut payload)?;
        enqueue(
            self.storage.queue(),
            QueueTask::SendAck,
            vec![RecordRef::Payload(id)],
            now,
        )?;
        Ok(Some(id))
    }

    fn process_ack(&self, object: &BmObject) -> Result<IncomingOutcome> {
        let matching = self.storage.messages().search(&|message: &Message| {
            message.is_outgoing() && message.ack_data == object.body
        })?;
        let Some(mut message) = matching.into_iter().next() else {
            return Ok(IncomingOutcome::Ignored);
        };
        let id = message.id.ok_or_else(|| {
            BitmessageError::Database("Stored message without id".to_string())
        })?;
        if message.status != MessageStatus::Acknowledged {
            message.status = MessageStatus::Acknowledged;
            self.storage.messages().update(&message)?;
            info!("Message {id} to {} acknowledged", message.to_address);
        }
        Ok(IncomingOutcome::Acknowledged(id))
    }

    /// Addresses of outgoing messages still waiting for a pubkey.
    fn awaited_addresses(&self) -> Result<Vec<DecodedAddress>> {
        let waiting = self
            .storage
            .messages()
            .search(&|message: &Message| message.status == MessageStatus::Composed)?;
        Ok(waiting
            .iter()
            .filter_map(|message| decode_address(&message.to_address).ok())
            .collect())
    }

    pub fn process_pubkey(&self, object: &BmObject) -> Result<IncomingOutcome> {
        let candidates: Vec<DecodedAddress> = self
            .awaited_addresses()?
            .into_iter()
            .filter(|a| a.version == object.version && a.stream == object.stream)
            .collect();
        let address = match object.version {
            4 => {
                let tag = ByteReader::new(&object.body).read_array::<TAG_LEN>()?;
                candidates.into_iter().find(|a| a.tag() == tag)
            }
            3 => {
                let ripe = Pubkey::from_object(object, None)?.ripe()?;
                candidates.into_iter().find(|a| a.ripe == ripe)
            }
            version => {
                return Err(BitmessageError::UnsupportedObjectVersion {
                    object_type: object.object_type,
                    version,
                })
            }
        };
        let Some(address) = address else {
            return Ok(IncomingOutcome::Ignored);
        };

        let pubkey = Pubkey::from_object(object, Some(&address))?;
        validate_pubkey(&pubkey, &address)?;
        info!("Received pubkey for {}", address.encode());
        Ok(IncomingOutcome::Pubkey(upsert_pubkey(
            self.storage.pubkeys(),
            pubkey,
        )?))
    }

    pub fn process_getpubkey(&self, object: &BmObject) -> Result<IncomingOutcome> {
        if !(3..=4).contains(&object.version) {
            return Err(BitmessageError::UnsupportedObjectVersion {
                object_type: object.object_type,
                version: object.version,
            });
        }
        let owners = self.storage.addresses().search(&|address: &Address| {
            address.version == object.version
                && address.stream == object.stream
                && address.decoded().request_identifier() == object.body
        })?;
        let Some(id) = owners.into_iter().find_map(|address| address.id) else {
            return Ok(IncomingOutcome::Ignored);
        };
        info!("Pubkey of address {id} was requested");
        enqueue(
            self.storage.queue(),
            QueueTask::DisseminatePubkey,
            vec![RecordRef::Address(id)],
            current_time(),
        )?;
        Ok(IncomingOutcome::GetpubkeyAnswered(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::{encode_message_text, MessageEncoding};
    use crate::core::outgoing::OutgoingProcessor;
    use crate::core::proof_of_work::{stamp_object, PowCancel, ProofOfWork};
    use crate::crypto::encrypt;
    use crate::network::wrap_object;
    use crate::storage::MemoryStore;
    use crate::testnet::{fast_config, RecordingTransport};
    use crate::wallet::identity::AddressGenerator;

    struct Peer {
        storage: Arc<MemoryStore>,
        outgoing: OutgoingProcessor,
        incoming: IncomingProcessor,
        address: Address,
    }

    fn peer(label: &str) -> Peer {
        let storage = Arc::new(MemoryStore::new());
        let transport = Arc::new(RecordingTransport::new());
        let config = fast_config();
        let mut address = AddressGenerator::new(4, 1).generate(label).unwrap();
        storage.addresses().add(&mut address).unwrap();
        Peer {
            outgoing: OutgoingProcessor::new(storage.clone(), transport.clone(), config.clone()),
            incoming: IncomingProcessor::new(storage.clone(), transport, &config),
            storage,
            address,
        }
    }

    fn signed_pubkey(address: &Address) -> Pubkey {
        let mut pubkey = Pubkey::from_address(address, 1, 1, current_time() + 3_600);
        pubkey.sign(&address.signing_key().unwrap()).unwrap();
        pubkey
    }

    fn msg_from(sender: &Peer, recipient: &Address, ack: Vec<u8>) -> Vec<u8> {
        let message = Message::compose(
            &sender.address.address,
            &recipient.address,
            "Lunch",
            "Noon at the usual place",
            0,
        );
        sender
            .outgoing
            .construct_msg_payload(&message, &sender.address, &signed_pubkey(recipient), ack)
            .unwrap()
            .payload
    }

    #[test]
    fn test_msg_for_us_is_received_and_acked() {
        let alice = peer("alice");
        let bob = peer("bob");
        let ack = alice.outgoing.construct_ack(&[3u8; 32], 1).unwrap();
        let raw = msg_from(&alice, &bob.address, wrap_object(&ack.to_bytes()).unwrap());

        let IncomingOutcome::Received {
            message,
            ack_payload_id,
        } = bob.incoming.process_object(&raw).unwrap()
        else {
            panic!("msg was not received");
        };
        assert_eq!(message.from_address, alice.address.address);
        assert_eq!(message.to_address, bob.address.address);
        assert_eq!(message.subject, "Lunch");
        assert_eq!(message.body, "Noon at the usual place");
        assert_eq!(message.status, MessageStatus::Received);
        assert_eq!(message.recipient_address_id, bob.address.id);

        let ack_id = ack_payload_id.unwrap();
        let stored_ack = bob.storage.payloads().get(ack_id).unwrap().unwrap();
        assert_eq!(stored_ack.payload, ack.to_bytes());
        let queued = bob.storage.queue().get_all().unwrap();
        assert_eq!(queued[0].task, QueueTask::SendAck);
        assert_eq!(queued[0].refs, vec![RecordRef::Payload(ack_id)]);

        let sender_key = crate::storage::find_pubkey(
            bob.storage.pubkeys(),
            &alice.address.decoded(),
        )
        .unwrap();
        assert!(sender_key.is_some());
    }

    #[test]
    fn test_msg_for_someone_else_is_ignored() {
        let alice = peer("alice");
        let bob = peer("bob");
        let carol = peer("carol");
        let raw = msg_from(&alice, &carol.address, Vec::new());
        assert_eq!(
            bob.incoming.process_object(&raw).unwrap(),
            IncomingOutcome::Ignored
        );
        assert!(bob.storage.messages().get_all().unwrap().is_empty());
    }

    #[test]
    fn test_forged_signature_rejected() {
        let alice = peer("alice");
        let bob = peer("bob");
        let mut object = BmObject::new(ObjectType::Msg, 1, 1, current_time() + 3_600, Vec::new());
        let message = Message::compose(&alice.address.address, &bob.address.address, "a", "b", 0);
        let mut plain = alice
            .outgoing
            .construct_unencrypted_msg(
                &message,
                &alice.address,
                &signed_pubkey(&bob.address),
                &object.header_bytes(),
                Vec::new(),
            )
            .unwrap();
        plain.message = encode_message_text(MessageEncoding::Simple, "a", "changed");
        object.body = encrypt(&plain.encode(), &bob.address.public_encryption_point().unwrap())
            .unwrap();
        stamp_object(
            &mut object,
            &fast_config().network_pow_params(),
            current_time(),
            1,
            false,
            &PowCancel::new(),
        )
        .unwrap();

        assert_eq!(
            bob.incoming.process_object(&object.to_bytes()),
            Err(BitmessageError::SignatureInvalid)
        );
    }

    #[test]
    fn test_msg_for_our_key_but_other_ripe_rejected() {
        let alice = peer("alice");
        let bob = peer("bob");
        let carol = peer("carol");
        let mut object = BmObject::new(ObjectType::Msg, 1, 1, current_time() + 3_600, Vec::new());
        let message = Message::compose(&alice.address.address, &carol.address.address, "a", "b", 0);
        let plain = alice
            .outgoing
            .construct_unencrypted_msg(
                &message,
                &alice.address,
                &signed_pubkey(&carol.address),
                &object.header_bytes(),
                Vec::new(),
            )
            .unwrap();
        object.body = encrypt(&plain.encode(), &bob.address.public_encryption_point().unwrap())
            .unwrap();
        stamp_object(
            &mut object,
            &fast_config().network_pow_params(),
            current_time(),
            1,
            false,
            &PowCancel::new(),
        )
        .unwrap();

        assert!(matches!(
            bob.incoming.process_object(&object.to_bytes()),
            Err(BitmessageError::KeyMismatch(_))
        ));
        assert!(bob.storage.messages().get_all().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_msg_stored_once() {
        let alice = peer("alice");
        let bob = peer("bob");
        let ack = alice.outgoing.construct_ack(&[4u8; 32], 1).unwrap();
        let raw = msg_from(&alice, &bob.address, wrap_object(&ack.to_bytes()).unwrap());

        assert!(matches!(
            bob.incoming.process_object(&raw).unwrap(),
            IncomingOutcome::Received { .. }
        ));
        assert_eq!(
            bob.incoming.process_object(&raw).unwrap(),
            IncomingOutcome::Ignored
        );
        let stored = bob.storage.messages().get_all().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].inventory_hash, BmObject::parse(&raw).unwrap().inventory_hash());
        assert_eq!(bob.storage.queue().get_all().unwrap().len(), 1);
        assert_eq!(bob.storage.payloads().get_all().unwrap().len(), 1);
    }

    #[test]
    fn test_ack_marks_message() {
        let alice = peer("alice");
        let mut sent = Message::compose(&alice.address.address, "BM-x", "s", "b", 0);
        sent.ack_data = vec![8u8; 32];
        sent.status = MessageStatus::Disseminated;
        let id = alice.storage.messages().add(&mut sent).unwrap();

        let ack = alice.outgoing.construct_ack(&[8u8; 32], 1).unwrap();
        assert_eq!(
            alice.incoming.process_object(&ack.to_bytes()).unwrap(),
            IncomingOutcome::Acknowledged(id)
        );
        assert_eq!(
            alice.storage.messages().get(id).unwrap().unwrap().status,
            MessageStatus::Acknowledged
        );

        let unknown = alice.outgoing.construct_ack(&[9u8; 32], 1).unwrap();
        assert_eq!(
            alice.incoming.process_object(&unknown.to_bytes()).unwrap(),
            IncomingOutcome::Ignored
        );
    }

    #[test]
    fn test_getpubkey_for_own_address_queues_announcement() {
        let alice = peer("alice");
        let bob = peer("bob");
        let request = bob
            .outgoing
            .construct_getpubkey_payload(&alice.address.decoded())
            .unwrap();
        assert_eq!(
            alice.incoming.process_object(&request.payload).unwrap(),
            IncomingOutcome::GetpubkeyAnswered(alice.address.id.unwrap())
        );
        let queued = alice.storage.queue().get_all().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].task, QueueTask::DisseminatePubkey);

        let other = bob
            .outgoing
            .construct_getpubkey_payload(&bob.address.decoded())
            .unwrap();
        assert_eq!(
            alice.incoming.process_object(&other.payload).unwrap(),
            IncomingOutcome::Ignored
        );
    }

    #[test]
    fn test_awaited_pubkey_is_stored() {
        let alice = peer("alice");
        let bob = peer("bob");
        let announcement = bob.outgoing.construct_pubkey_payload(&bob.address).unwrap();
        assert_eq!(
            alice.incoming.process_object(&announcement.payload).unwrap(),
            IncomingOutcome::Ignored
        );

        let mut waiting =
            Message::compose(&alice.address.address, &bob.address.address, "s", "b", 0);
        alice.storage.messages().add(&mut waiting).unwrap();
        let IncomingOutcome::Pubkey(pubkey) =
            alice.incoming.process_object(&announcement.payload).unwrap()
        else {
            panic!("pubkey was not stored");
        };
        assert_eq!(pubkey.address().unwrap(), bob.address.address);
        assert!(pubkey.id.is_some());
    }

    #[test]
    fn test_batch_skips_bad_objects() {
        let alice = peer("alice");
        let bob = peer("bob");
        let good = msg_from(&alice, &bob.address, Vec::new());

        let mut unstamped = BmObject::parse(&good).unwrap();
        let pow =
            ProofOfWork::for_object(&unstamped, &fast_config().network_pow_params(), current_time())
                .unwrap();
        unstamped.nonce = (0..).find(|nonce| !pow.validate(*nonce)).unwrap();

        let mut wrong_version = BmObject::parse(&good).unwrap();
        wrong_version.version = 9;

        let batch = vec![
            vec![0u8; 10],
            unstamped.to_bytes(),
            good.clone(),
            wrong_version.to_bytes(),
        ];
        let outcomes = bob.incoming.process_batch(&batch).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], IncomingOutcome::Received { .. }));
    }

    #[test]
    fn test_expired_object_ignored() {
        let alice = peer("alice");
        let mut old = BmObject::new(ObjectType::Getpubkey, 4, 1, 1_000, vec![0; 32]);
        old.nonce = 1;
        assert_eq!(
            alice.incoming.process_object(&old.to_bytes()).unwrap(),
            IncomingOutcome::Ignored
        );
    }
}
