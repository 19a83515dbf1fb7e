//! End-to-end pipeline tests: two peers exchanging objects over an
//! in-process network.

use bitmessage_core::core::{IncomingOutcome, MessageStatus, QueueReport};
use bitmessage_core::network::unwrap_object;
use bitmessage_core::utils::current_time;
use bitmessage_core::{
    AddressGenerator, BitmessageError, Config, IncomingProcessor, MemoryStore, OutgoingProcessor,
    QueueRunner, RecordStore, Result, SledStore, Storage, Transport,
};
use std::sync::{Arc, Mutex};

fn test_config() -> Config {
    Config {
        nonce_trials_per_byte: 1,
        extra_bytes: 1,
        pow_workers: 2,
        random_pow_start: false,
        queue_max_attempts: 3,
        ..Config::default()
    }
}

/// Every disseminated object is visible to every peer.
#[derive(Default)]
struct Network {
    objects: Mutex<Vec<Vec<u8>>>,
    down: Mutex<bool>,
}

impl Network {
    fn set_down(&self, down: bool) {
        *self.down.lock().unwrap() = down;
    }

    fn is_down(&self) -> bool {
        *self.down.lock().unwrap()
    }
}

struct Link {
    network: Arc<Network>,
    cursor: Mutex<usize>,
}

impl Link {
    fn new(network: &Arc<Network>) -> Link {
        Link {
            network: Arc::clone(network),
            cursor: Mutex::new(0),
        }
    }
}

impl Transport for Link {
    fn disseminate(&self, framed_object: &[u8]) -> Result<bool> {
        if self.network.is_down() {
            return Err(BitmessageError::Transport("network unreachable".to_string()));
        }
        let raw = unwrap_object(framed_object)?;
        self.network.objects.lock().unwrap().push(raw);
        Ok(true)
    }

    fn request_pubkey(&self, _identifier: &[u8], _version: u64) -> Result<Option<Vec<u8>>> {
        if self.network.is_down() {
            return Err(BitmessageError::Transport("network unreachable".to_string()));
        }
        Ok(None)
    }

    fn fetch_new_objects(&self) -> Result<Vec<Vec<u8>>> {
        let objects = self.network.objects.lock().unwrap();
        let mut cursor = self.cursor.lock().unwrap();
        let fresh = objects[*cursor..].to_vec();
        *cursor = objects.len();
        Ok(fresh)
    }
}

struct Peer {
    storage: Arc<dyn Storage>,
    outgoing: OutgoingProcessor,
    incoming: IncomingProcessor,
    runner: QueueRunner,
    address: String,
}

fn peer(network: &Arc<Network>, storage: Arc<dyn Storage>, label: &str) -> Peer {
    let config = test_config();
    let mut address = AddressGenerator::from_config(&config).generate(label).unwrap();
    storage.addresses().add(&mut address).unwrap();
    attach(network, storage, address.address, &config)
}

fn attach(network: &Arc<Network>, storage: Arc<dyn Storage>, address: String, config: &Config) -> Peer {
    let link: Arc<dyn Transport> = Arc::new(Link::new(network));
    let outgoing = OutgoingProcessor::new(storage.clone(), link.clone(), config.clone());
    Peer {
        incoming: IncomingProcessor::new(storage.clone(), link, config),
        runner: QueueRunner::new(outgoing.clone(), config),
        outgoing,
        storage,
        address,
    }
}

#[test]
fn test_message_round_trip_with_pubkey_request_and_ack() {
    let network = Arc::new(Network::default());
    let alice = peer(&network, Arc::new(MemoryStore::new()), "alice");
    let bob = peer(&network, Arc::new(MemoryStore::new()), "bob");
    let now = current_time();
    let retry = test_config().queue_retry_interval;

    let queued = alice
        .outgoing
        .queue_message(&alice.address, &bob.address, "Plans", "Meet at six?")
        .unwrap();
    let message_id = queued.id.unwrap();

    // no pubkey yet: alice asks the network and keeps the task
    let report = alice.runner.run_due(now).unwrap();
    assert_eq!(report.retried, 1);

    let outcomes = bob.incoming.fetch_and_process().unwrap();
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, IncomingOutcome::GetpubkeyAnswered(_))));
    assert_eq!(bob.runner.run_due(now).unwrap().completed, 1);

    let outcomes = alice.incoming.fetch_and_process().unwrap();
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, IncomingOutcome::Pubkey(p) if p.address().unwrap() == bob.address)));

    let report = alice.runner.run_due(now + retry).unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(
        alice.storage.messages().get(message_id).unwrap().unwrap().status,
        MessageStatus::Disseminated
    );

    let outcomes = bob.incoming.fetch_and_process().unwrap();
    let received = outcomes
        .iter()
        .find_map(|o| match o {
            IncomingOutcome::Received { message, .. } => Some(message.clone()),
            _ => None,
        })
        .expect("bob did not receive the message");
    assert_eq!(received.from_address, alice.address);
    assert_eq!(received.subject, "Plans");
    assert_eq!(received.body, "Meet at six?");
    assert_eq!(bob.runner.run_due(now).unwrap().completed, 1);

    let outcomes = alice.incoming.fetch_and_process().unwrap();
    assert!(outcomes.contains(&IncomingOutcome::Acknowledged(message_id)));
    assert_eq!(
        alice.storage.messages().get(message_id).unwrap().unwrap().status,
        MessageStatus::Acknowledged
    );
    assert!(alice.storage.queue().get_all().unwrap().is_empty());
    assert!(bob.storage.queue().get_all().unwrap().is_empty());
}

#[test]
fn test_reply_uses_sender_key_from_message() {
    let network = Arc::new(Network::default());
    let alice = peer(&network, Arc::new(MemoryStore::new()), "alice");
    let bob = peer(&network, Arc::new(MemoryStore::new()), "bob");
    let now = current_time();
    let retry = test_config().queue_retry_interval;

    alice
        .outgoing
        .queue_message(&alice.address, &bob.address, "Hello", "First contact")
        .unwrap();
    alice.runner.run_due(now).unwrap();
    bob.incoming.fetch_and_process().unwrap();
    bob.runner.run_due(now).unwrap();
    alice.incoming.fetch_and_process().unwrap();
    alice.runner.run_due(now + retry).unwrap();
    bob.incoming.fetch_and_process().unwrap();

    // bob learned alice's keys from her msg, so the reply goes out at once
    let reply = bob
        .outgoing
        .queue_message(&bob.address, &alice.address, "Re: Hello", "Hi back")
        .unwrap();
    let report = bob.runner.run_due(now).unwrap();
    assert_eq!(report.completed, 2);
    assert_eq!(
        bob.storage.messages().get(reply.id.unwrap()).unwrap().unwrap().status,
        MessageStatus::Disseminated
    );

    let outcomes = alice.incoming.fetch_and_process().unwrap();
    assert!(outcomes.iter().any(|o| matches!(
        o,
        IncomingOutcome::Received { message, .. } if message.body == "Hi back"
    )));
}

#[test]
fn test_unreachable_network_gives_up_after_max_attempts() {
    let network = Arc::new(Network::default());
    let alice = peer(&network, Arc::new(MemoryStore::new()), "alice");
    let bob_address = AddressGenerator::new(4, 1).generate("bob").unwrap().address;
    let now = current_time();
    let retry = test_config().queue_retry_interval;

    let id = alice
        .outgoing
        .queue_message(&alice.address, &bob_address, "s", "b")
        .unwrap()
        .id
        .unwrap();
    network.set_down(true);

    assert_eq!(alice.runner.run_due(now).unwrap().retried, 1);
    // not due again until the retry interval passes
    assert_eq!(alice.runner.run_due(now + 1).unwrap(), QueueReport::default());
    assert_eq!(alice.runner.run_due(now + retry).unwrap().retried, 1);
    assert_eq!(alice.runner.run_due(now + 2 * retry).unwrap().dropped, 1);

    assert_eq!(
        alice.storage.messages().get(id).unwrap().unwrap().status,
        MessageStatus::Failed
    );
    assert!(alice.storage.queue().get_all().unwrap().is_empty());
}

#[test]
fn test_queue_survives_restart_with_sled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alice");
    let network = Arc::new(Network::default());
    let bob = peer(&network, Arc::new(MemoryStore::new()), "bob");
    let config = test_config();

    let (alice_address, message_id) = {
        let store = Arc::new(SledStore::open(&path).unwrap());
        let alice = peer(&network, store.clone(), "alice");
        let message = alice
            .outgoing
            .queue_message(&alice.address, &bob.address, "Persisted", "Still here")
            .unwrap();
        store.flush().unwrap();
        (alice.address, message.id.unwrap())
    };

    let store: Arc<dyn Storage> = Arc::new(SledStore::open(&path).unwrap());
    assert_eq!(store.queue().get_all().unwrap().len(), 1);
    let alice = attach(&network, store, alice_address, &config);

    let now = current_time();
    alice.runner.run_due(now).unwrap();
    bob.incoming.fetch_and_process().unwrap();
    bob.runner.run_due(now).unwrap();
    alice.incoming.fetch_and_process().unwrap();
    assert_eq!(
        alice
            .runner
            .run_due(now + config.queue_retry_interval)
            .unwrap()
            .completed,
        1
    );
    assert_eq!(
        alice.storage.messages().get(message_id).unwrap().unwrap().status,
        MessageStatus::Disseminated
    );
}
