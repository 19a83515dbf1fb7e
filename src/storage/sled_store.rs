use crate::core::message::Message;
use crate::core::object::ObjectPayload;
use crate::core::pubkey::Pubkey;
use crate::core::queue::QueueRecord;
use crate::error::{BitmessageError, Result};
use crate::storage::{missing_id, not_found, Record, RecordStore, Storage};
use crate::utils::{deserialize, serialize};
use crate::wallet::identity::Address;
use log::info;
use sled::{Db, Tree};
use std::marker::PhantomData;
use std::path::Path;

const ADDRESS_TREE: &str = "addresses";
const PUBKEY_TREE: &str = "pubkeys";
const MESSAGE_TREE: &str = "messages";
const PAYLOAD_TREE: &str = "payloads";
const QUEUE_TREE: &str = "queue";

/// One sled tree of bincode-encoded records keyed by big-endian id.
pub struct SledTable<T> {
    db: Db,
    tree: Tree,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> SledTable<T> {
    fn open(db: &Db, name: &str) -> Result<SledTable<T>> {
        let tree = db
            .open_tree(name)
            .map_err(|e| BitmessageError::Database(format!("Failed to open {name} tree: {e}")))?;
        Ok(SledTable {
            db: db.clone(),
            tree,
            _record: PhantomData,
        })
    }

    fn put(&self, id: u64, record: &T) -> Result<()> {
        let value = serialize(record)?;
        self.tree
            .insert(id.to_be_bytes(), value)
            .map_err(|e| BitmessageError::Database(format!("Failed to write {}: {e}", T::KIND)))?;
        Ok(())
    }
}

impl<T: Record> RecordStore<T> for SledTable<T> {
    fn add(&self, record: &mut T) -> Result<u64> {
        // generate_id starts at zero; keep ids positive like the memory store
        let id = self
            .db
            .generate_id()
            .map_err(|e| BitmessageError::Database(format!("Failed to generate id: {e}")))?
            + 1;
        record.set_id(id);
        self.put(id, record)?;
        Ok(id)
    }

    fn update(&self, record: &T) -> Result<()> {
        let id = record.id().ok_or_else(missing_id::<T>)?;
        let exists = self
            .tree
            .contains_key(id.to_be_bytes())
            .map_err(|e| BitmessageError::Database(format!("Failed to read {}: {e}", T::KIND)))?;
        if !exists {
            return Err(not_found::<T>(id));
        }
        self.put(id, record)
    }

    fn delete(&self, id: u64) -> Result<()> {
        self.tree
            .remove(id.to_be_bytes())
            .map_err(|e| BitmessageError::Database(format!("Failed to delete {}: {e}", T::KIND)))?;
        Ok(())
    }

    fn get(&self, id: u64) -> Result<Option<T>> {
        let value = self
            .tree
            .get(id.to_be_bytes())
            .map_err(|e| BitmessageError::Database(format!("Failed to read {}: {e}", T::KIND)))?;
        match value {
            Some(bytes) => Ok(Some(deserialize(bytes.as_ref())?)),
            None => Ok(None),
        }
    }

    fn get_all(&self) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for item in self.tree.iter() {
            let (_, value) = item.map_err(|e| {
                BitmessageError::Database(format!("Failed to iterate {}: {e}", T::KIND))
            })?;
            records.push(deserialize(value.as_ref())?);
        }
        Ok(records)
    }
}

pub struct SledStore {
    db: Db,
    addresses: SledTable<Address>,
    pubkeys: SledTable<Pubkey>,
    messages: SledTable<Message>,
    payloads: SledTable<ObjectPayload>,
    queue: SledTable<QueueRecord>,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<SledStore> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|e| {
            BitmessageError::Database(format!("Failed to open database at {}: {e}", path.display()))
        })?;
        info!("Opened store at {}", path.display());
        Ok(SledStore {
            addresses: SledTable::open(&db, ADDRESS_TREE)?,
            pubkeys: SledTable::open(&db, PUBKEY_TREE)?,
            messages: SledTable::open(&db, MESSAGE_TREE)?,
            payloads: SledTable::open(&db, PAYLOAD_TREE)?,
            queue: SledTable::open(&db, QUEUE_TREE)?,
            db,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl Storage for SledStore {
    fn addresses(&self) -> &dyn RecordStore<Address> {
        &self.addresses
    }

    fn pubkeys(&self) -> &dyn RecordStore<Pubkey> {
        &self.pubkeys
    }

    fn messages(&self) -> &dyn RecordStore<Message> {
        &self.messages
    }

    fn payloads(&self) -> &dyn RecordStore<ObjectPayload> {
        &self.payloads
    }

    fn queue(&self) -> &dyn RecordStore<QueueRecord> {
        &self.queue
    }
}
