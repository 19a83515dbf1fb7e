//! Test utilities for pipeline testing

use crate::config::Config;
use crate::error::{BitmessageError, Result};
use crate::network::Transport;
use crate::storage::SledStore;
use std::sync::Mutex;
use tempfile::TempDir;

/// Network difficulty low enough that every POW finishes instantly.
pub fn fast_config() -> Config {
    Config {
        nonce_trials_per_byte: 1,
        extra_bytes: 1,
        pow_workers: 2,
        random_pow_start: false,
        ..Config::default()
    }
}

/// Create a temporary directory for testing
pub fn create_temp_dir() -> Result<TempDir> {
    tempfile::tempdir().map_err(|e| BitmessageError::Io(e.to_string()))
}

pub fn create_test_store() -> Result<(SledStore, TempDir)> {
    let temp_dir = create_temp_dir()?;
    let store = SledStore::open(temp_dir.path().join("store"))?;
    Ok((store, temp_dir))
}

#[derive(Default)]
struct TransportState {
    sent: Vec<Vec<u8>>,
    pubkeys: Vec<Vec<u8>>,
    inbox: Vec<Vec<u8>>,
    refusing: bool,
    failing: bool,
}

/// Keeps everything it is given. Pubkey requests are answered with the
/// most recently offered pubkey object, whatever was asked for.
#[derive(Default)]
pub struct RecordingTransport {
    state: Mutex<TransportState>,
}

impl RecordingTransport {
    pub fn new() -> RecordingTransport {
        RecordingTransport::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut TransportState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    /// Framed objects handed to `disseminate`, oldest first.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.with_state(|s| s.sent.clone())
    }

    pub fn offer_pubkey(&self, object_bytes: Vec<u8>) {
        self.with_state(|s| s.pubkeys.push(object_bytes));
    }

    /// Queues raw objects for the next `fetch_new_objects`.
    pub fn deliver(&self, object_bytes: Vec<u8>) {
        self.with_state(|s| s.inbox.push(object_bytes));
    }

    /// When false, `disseminate` reports that no peer took the object.
    pub fn set_accepting(&self, accepting: bool) {
        self.with_state(|s| s.refusing = !accepting);
    }

    /// When true, every call fails with a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.with_state(|s| s.failing = failing);
    }
}

impl Transport for RecordingTransport {
    fn disseminate(&self, framed_object: &[u8]) -> Result<bool> {
        self.with_state(|s| {
            if s.failing {
                return Err(BitmessageError::Transport("link down".to_string()));
            }
            if s.refusing {
                return Ok(false);
            }
            s.sent.push(framed_object.to_vec());
            Ok(true)
        })
    }

    fn request_pubkey(&self, _identifier: &[u8], _address_version: u64) -> Result<Option<Vec<u8>>> {
        self.with_state(|s| {
            if s.failing {
                return Err(BitmessageError::Transport("link down".to_string()));
            }
            Ok(s.pubkeys.last().cloned())
        })
    }

    fn fetch_new_objects(&self) -> Result<Vec<Vec<u8>>> {
        self.with_state(|s| {
            if s.failing {
                return Err(BitmessageError::Transport("link down".to_string()));
            }
            Ok(std::mem::take(&mut s.inbox))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{RecordStore, Storage};
    use crate::core::object::{ObjectPayload, ObjectType};

    #[test]
    fn test_recording_transport() {
        let transport = RecordingTransport::new();
        assert!(transport.disseminate(b"one").unwrap());
        transport.set_accepting(false);
        assert!(!transport.disseminate(b"two").unwrap());
        assert_eq!(transport.sent(), vec![b"one".to_vec()]);

        transport.deliver(vec![1]);
        assert_eq!(transport.fetch_new_objects().unwrap(), vec![vec![1]]);
        assert!(transport.fetch_new_objects().unwrap().is_empty());

        transport.set_failing(true);
        assert!(transport.request_pubkey(&[0; 32], 4).unwrap_err().is_retryable());
    }

    #[test]
    fn test_create_test_store() {
        let (store, _dir) = create_test_store().unwrap();
        store
            .payloads()
            .add(&mut ObjectPayload::new(ObjectType::Msg, vec![1], 1))
            .unwrap();
        assert_eq!(store.payloads().get_all().unwrap().len(), 1);
    }
}
