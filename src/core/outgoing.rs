//! Outgoing pipeline
//!
//! Turns application messages and our own identities into POW-stamped
//! network objects and hands them to the transport. Message status moves
//! `Composed → Signed → Encrypted → PowStamped → Disseminated`; a message
//! that reached `PowStamped` only repeats the dissemination step.

use crate::config::Config;
use crate::core::behaviour::Behaviour;
use crate::core::message::{encode_message_text, Message, MessageStatus, UnencryptedMessage};
use crate::core::object::{BmObject, ObjectPayload, ObjectType, ACK_DATA_LEN};
use crate::core::proof_of_work::{stamp_object, verify_object, PowCancel, PowParams};
use crate::core::pubkey::{validate_pubkey, Pubkey};
use crate::core::queue::{enqueue, QueueTask, RecordRef};
use crate::crypto::encrypt;
use crate::error::{BitmessageError, Result};
use crate::network::{wrap_object, Transport};
use crate::storage::{find_address, find_pubkey, upsert_pubkey, RecordStore, Storage};
use crate::utils::{current_time, random_bytes};
use crate::wallet::address::{decode_address, DecodedAddress};
use crate::wallet::identity::Address;
use crate::wallet::keys::reconstruct_public_key;
use log::{debug, error, info};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(Message),
    /// The recipient's pubkey is not known yet; a getpubkey went out.
    AwaitingPubkey,
}

#[derive(Clone)]
pub struct OutgoingProcessor {
    storage: Arc<dyn Storage>,
    transport: Arc<dyn Transport>,
    config: Config,
    cancel: PowCancel,
}

impl OutgoingProcessor {
    pub fn new(
        storage: Arc<dyn Storage>,
        transport: Arc<dyn Transport>,
        config: Config,
    ) -> OutgoingProcessor {
        OutgoingProcessor {
            storage,
            transport,
            config,
            cancel: PowCancel::new(),
        }
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.storage)
    }

    /// Cancelling stops every POW search this processor is running.
    pub fn cancel_handle(&self) -> PowCancel {
        self.cancel.clone()
    }

    fn stamp(&self, object: &mut BmObject, params: &PowParams) -> Result<()> {
        stamp_object(
            object,
            params,
            current_time(),
            self.config.pow_workers,
            self.config.random_pow_start,
            &self.cancel,
        )
    }

    /// Signed, POW-stamped announcement of one of our identities. The
    /// signed record is kept in storage as well.
    pub fn construct_pubkey_payload(&self, address: &Address) -> Result<ObjectPayload> {
        let now = current_time();
        let mut pubkey = Pubkey::from_address(
            address,
            self.config.nonce_trials_per_byte,
            self.config.extra_bytes,
            now + self.config.pubkey_ttl,
        );
        pubkey.sign(&address.signing_key()?)?;
        let mut object = pubkey.to_object()?;
        self.stamp(&mut object, &self.config.network_pow_params())?;
        pubkey.pow_nonce = object.nonce;
        upsert_pubkey(self.storage.pubkeys(), pubkey)?;

        Ok(ObjectPayload::new(ObjectType::Pubkey, object.to_bytes(), now)
            .with_related_address(address.id))
    }

    /// Request for the pubkey of `address`: the ripe up to v3, the tag from v4.
    pub fn construct_getpubkey_payload(&self, address: &DecodedAddress) -> Result<ObjectPayload> {
        if !(3..=4).contains(&address.version) {
            return Err(BitmessageError::UnsupportedObjectVersion {
                object_type: ObjectType::Getpubkey.code(),
                version: address.version,
            });
        }
        let now = current_time();
        let mut object = BmObject::new(
            ObjectType::Getpubkey,
            address.version,
            address.stream,
            now + self.config.getpubkey_ttl,
            address.request_identifier(),
        );
        self.stamp(&mut object, &self.config.network_pow_params())?;
        Ok(ObjectPayload::new(
            ObjectType::Getpubkey,
            object.to_bytes(),
            now,
        ))
    }

    /// The ack object the recipient will send back: a stamped msg v1
    /// whose body is `ack_data`. Returned unframed.
    pub fn construct_ack(&self, ack_data: &[u8], stream: u64) -> Result<BmObject> {
        if ack_data.len() != ACK_DATA_LEN {
            return Err(BitmessageError::Format(format!(
                "Ack data must be {ACK_DATA_LEN} bytes, got {}",
                ack_data.len()
            )));
        }
        let mut object = BmObject::new(
            ObjectType::Msg,
            1,
            stream,
            current_time() + self.config.ack_ttl,
            ack_data.to_vec(),
        );
        self.stamp(&mut object, &self.config.network_pow_params())?;
        Ok(object)
    }

    /// Builds and signs the plaintext of a msg object. `header` holds the
    /// object's expires, type, version and stream fields.
    pub fn construct_unencrypted_msg(
        &self,
        message: &Message,
        sender: &Address,
        recipient: &Pubkey,
        header: &[u8],
        ack_message: Vec<u8>,
    ) -> Result<UnencryptedMessage> {
        let mut plain = UnencryptedMessage {
            sender_version: sender.version,
            sender_stream: sender.stream,
            behaviour: Behaviour::own(),
            public_signing_key: sender.public_signing_key.clone(),
            public_encryption_key: sender.public_encryption_key.clone(),
            nonce_trials_per_byte: self.config.nonce_trials_per_byte,
            extra_bytes: self.config.extra_bytes,
            destination_ripe: recipient.ripe()?,
            encoding: message.encoding,
            message: encode_message_text(message.encoding, &message.subject, &message.body),
            ack_message,
            signature: Vec::new(),
        };
        plain.sign(header, &sender.signing_key()?)?;
        Ok(plain)
    }

    /// Full msg object for `message` without touching storage.
    pub fn construct_msg_payload(
        &self,
        message: &Message,
        sender: &Address,
        recipient: &Pubkey,
        ack_message: Vec<u8>,
    ) -> Result<ObjectPayload> {
        let object = self.build_msg_object(message, sender, recipient, ack_message, |_| Ok(()))?;
        Ok(
            ObjectPayload::new(ObjectType::Msg, object.to_bytes(), current_time())
                .with_related_address(sender.id),
        )
    }

    fn build_msg_object(
        &self,
        message: &Message,
        sender: &Address,
        recipient: &Pubkey,
        ack_message: Vec<u8>,
        mut on_step: impl FnMut(MessageStatus) -> Result<()>,
    ) -> Result<BmObject> {
        let mut object = BmObject::new(
            ObjectType::Msg,
            1,
            recipient.stream,
            current_time() + self.config.msg_ttl,
            Vec::new(),
        );
        let plain = self.construct_unencrypted_msg(
            message,
            sender,
            recipient,
            &object.header_bytes(),
            ack_message,
        )?;
        on_step(MessageStatus::Signed)?;

        let recipient_key = reconstruct_public_key(&recipient.public_encryption_key)?;
        object.body = encrypt(&plain.encode(), &recipient_key)?;
        on_step(MessageStatus::Encrypted)?;

        let params = PowParams::new(recipient.nonce_trials_per_byte, recipient.extra_bytes)
            .at_least(&self.config.network_pow_params());
        self.stamp(&mut object, &params)?;
        on_step(MessageStatus::PowStamped)?;
        Ok(object)
    }

    pub fn load_message(&self, message_id: u64) -> Result<Message> {
        self.storage
            .messages()
            .get(message_id)?
            .ok_or_else(|| BitmessageError::Database(format!("No message with id {message_id}")))
    }

    /// Stores a new outgoing message from one of our addresses and queues it.
    pub fn queue_message(
        &self,
        from_address: &str,
        to_address: &str,
        subject: &str,
        body: &str,
    ) -> Result<Message> {
        decode_address(to_address)?;
        let sender = find_address(self.storage.addresses(), from_address)?.ok_or_else(|| {
            BitmessageError::KeyMismatch(format!("{from_address} is not one of our addresses"))
        })?;
        let now = current_time();
        let mut message = Message::compose(from_address, to_address, subject, body, now);
        message.sender_address_id = sender.id;
        let id = self.storage.messages().add(&mut message)?;
        enqueue(
            self.storage.queue(),
            QueueTask::SendMessage,
            vec![RecordRef::Message(id)],
            now,
        )?;
        debug!("Queued message {id} to {to_address}");
        Ok(message)
    }

    /// Runs the message through the remaining pipeline steps. Crypto and
    /// POW failures mark it `Failed`; transport failures leave it where it
    /// was so a retry only repeats what is missing.
    pub fn send_message(&self, message_id: u64) -> Result<SendOutcome> {
        let mut message = self.load_message(message_id)?;
        match message.status {
            MessageStatus::Disseminated | MessageStatus::Acknowledged => {
                return Ok(SendOutcome::Sent(message))
            }
            MessageStatus::Failed | MessageStatus::Received => {
                return Err(BitmessageError::Format(format!(
                    "Message {message_id} is {:?} and cannot be sent",
                    message.status
                )))
            }
            MessageStatus::PowStamped => return self.disseminate_message(message),
            MessageStatus::Composed | MessageStatus::Signed | MessageStatus::Encrypted => {}
        }

        let sender = find_address(self.storage.addresses(), &message.from_address)?
            .ok_or_else(|| {
                BitmessageError::KeyMismatch(format!(
                    "{} is not one of our addresses",
                    message.from_address
                ))
            })?;
        let recipient = decode_address(&message.to_address)?;
        let Some(pubkey) = self.retrieve_pubkey(&recipient)? else {
            self.disseminate_getpubkey(&recipient)?;
            return Ok(SendOutcome::AwaitingPubkey);
        };

        if let Err(e) = self.seal_message(&mut message, &sender, &pubkey) {
            if !e.is_retryable() {
                error!("Message {message_id} failed: {e}");
                message.status = MessageStatus::Failed;
                self.storage.messages().update(&message)?;
            }
            return Err(e);
        }
        self.disseminate_message(message)
    }

    fn seal_message(&self, message: &mut Message, sender: &Address, pubkey: &Pubkey) -> Result<()> {
        // an interrupted earlier seal may have left objects behind
        for stale in [message.ack_payload_id.take(), message.msg_payload_id.take()]
            .into_iter()
            .flatten()
        {
            self.storage.payloads().delete(stale)?;
        }
        message.ack_data = random_bytes(ACK_DATA_LEN);
        let ack = self.construct_ack(&message.ack_data, sender.stream)?;
        let ack_message = wrap_object(&ack.to_bytes())?;
        let mut ack_payload =
            ObjectPayload::new(ObjectType::Msg, ack.to_bytes(), current_time())
                .with_related_address(sender.id);
        message.ack_payload_id = Some(self.storage.payloads().add(&mut ack_payload)?);

        let messages = self.storage.messages();
        let draft = message.clone();
        let object = self.build_msg_object(&draft, sender, pubkey, ack_message, |status| {
            message.status = status;
            if status == MessageStatus::PowStamped {
                // the stamped object is stored with the status below
                return Ok(());
            }
            messages.update(&*message)
        })?;

        let mut payload = ObjectPayload::new(ObjectType::Msg, object.to_bytes(), current_time())
            .with_related_address(sender.id);
        message.msg_payload_id = Some(self.storage.payloads().add(&mut payload)?);
        message.status = MessageStatus::PowStamped;
        messages.update(message)?;
        info!(
            "Message {:?} sealed for {}",
            message.id, message.to_address
        );
        Ok(())
    }

    fn disseminate_message(&self, mut message: Message) -> Result<SendOutcome> {
        let payload_id = message.msg_payload_id.ok_or_else(|| {
            BitmessageError::Database(format!("Message {:?} has no stored object", message.id))
        })?;
        self.disseminate_payload(payload_id)?;
        message.status = MessageStatus::Disseminated;
        self.storage.messages().update(&message)?;
        info!("Message {:?} disseminated", message.id);
        Ok(SendOutcome::Sent(message))
    }

    /// Frames a stored object and hands it to the transport.
    pub fn disseminate_payload(&self, payload_id: u64) -> Result<()> {
        let payload = self.storage.payloads().get(payload_id)?.ok_or_else(|| {
            BitmessageError::Database(format!("No payload with id {payload_id}"))
        })?;
        if !self.transport.disseminate(&wrap_object(&payload.payload)?)? {
            return Err(BitmessageError::Transport(format!(
                "No peer accepted {:?} object {payload_id}",
                payload.object_type
            )));
        }
        debug!("Disseminated {:?} object {payload_id}", payload.object_type);
        Ok(())
    }

    fn store_and_disseminate(&self, mut payload: ObjectPayload) -> Result<ObjectPayload> {
        let id = self.storage.payloads().add(&mut payload)?;
        self.disseminate_payload(id)?;
        Ok(payload)
    }

    /// Stored object of `object_type` accepted by `matches` that lives at
    /// least `min_remaining` more seconds. Expired objects of that type
    /// are deleted along the way.
    fn reusable_payload(
        &self,
        object_type: ObjectType,
        min_remaining: u64,
        matches: impl Fn(&ObjectPayload, &BmObject) -> bool,
    ) -> Result<Option<ObjectPayload>> {
        let payloads = self.storage.payloads();
        let now = current_time();
        let mut reusable = None;
        for payload in payloads.search(&|p: &ObjectPayload| p.object_type == object_type)? {
            let object = BmObject::parse(&payload.payload)?;
            if object.expires <= now {
                if let Some(id) = payload.id {
                    payloads.delete(id)?;
                }
                continue;
            }
            if reusable.is_none()
                && object.expires >= now.saturating_add(min_remaining)
                && matches(&payload, &object)
            {
                reusable = Some(payload);
            }
        }
        Ok(reusable)
    }

    fn disseminate_existing(&self, payload: ObjectPayload) -> Result<ObjectPayload> {
        let id = payload.id.ok_or_else(|| {
            BitmessageError::Database("Stored payload without id".to_string())
        })?;
        self.disseminate_payload(id)?;
        Ok(payload)
    }

    /// Announces one of our pubkeys, reusing the stored announcement while
    /// at least half of its lifetime remains.
    pub fn disseminate_pubkey(&self, address_id: u64) -> Result<ObjectPayload> {
        let address = self
            .storage
            .addresses()
            .get(address_id)?
            .ok_or_else(|| BitmessageError::Database(format!("No address with id {address_id}")))?;
        info!("Announcing pubkey for {}", address.address);
        let stored = self.reusable_payload(ObjectType::Pubkey, self.config.pubkey_ttl / 2, |p, _| {
            p.related_address_id == Some(address_id)
        })?;
        match stored {
            Some(payload) => self.disseminate_existing(payload),
            None => self.store_and_disseminate(self.construct_pubkey_payload(&address)?),
        }
    }

    /// Sends a getpubkey for `address`. A request still alive from an
    /// earlier attempt goes out again instead of a new one.
    pub fn disseminate_getpubkey(&self, address: &DecodedAddress) -> Result<ObjectPayload> {
        info!("Requesting pubkey for {}", address.encode());
        let identifier = address.request_identifier();
        let stored = self.reusable_payload(ObjectType::Getpubkey, 0, |_, object| {
            object.version == address.version
                && object.stream == address.stream
                && object.body == identifier
        })?;
        match stored {
            Some(payload) => self.disseminate_existing(payload),
            None => self.store_and_disseminate(self.construct_getpubkey_payload(address)?),
        }
    }

    /// Looks the pubkey up and asks the network for it when it is missing.
    pub fn request_pubkey_for(&self, address: &str) -> Result<Option<Pubkey>> {
        let decoded = decode_address(address)?;
        match self.retrieve_pubkey(&decoded)? {
            Some(pubkey) => Ok(Some(pubkey)),
            None => {
                self.disseminate_getpubkey(&decoded)?;
                Ok(None)
            }
        }
    }

    /// Storage first, then the transport. Anything the transport returns
    /// is validated against `address` before it is stored.
    pub fn retrieve_pubkey(&self, address: &DecodedAddress) -> Result<Option<Pubkey>> {
        if let Some(pubkey) = find_pubkey(self.storage.pubkeys(), address)? {
            return Ok(Some(pubkey));
        }
        let Some(raw) = self
            .transport
            .request_pubkey(&address.request_identifier(), address.version)?
        else {
            debug!("No pubkey available yet for {}", address.encode());
            return Ok(None);
        };
        let object = BmObject::parse(&raw)?;
        let now = current_time();
        if !object.is_within_lifetime(now) {
            debug!("Offered pubkey for {} is outside its lifetime", address.encode());
            return Ok(None);
        }
        verify_object(&object, &self.config.network_pow_params(), now)?;
        let pubkey = Pubkey::from_object(&object, Some(address))?;
        validate_pubkey(&pubkey, address)?;
        info!("Retrieved pubkey for {}", address.encode());
        upsert_pubkey(self.storage.pubkeys(), pubkey).map(Some)
    }
}
