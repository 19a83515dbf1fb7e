use crate::core::message::Message;
use crate::core::object::ObjectPayload;
use crate::core::pubkey::Pubkey;
use crate::core::queue::QueueRecord;
use crate::error::{BitmessageError, Result};
use crate::storage::{missing_id, not_found, Record, RecordStore, Storage};
use crate::wallet::identity::Address;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// ( K -> record id, V => record )
pub struct MemoryTable<T> {
    inner: RwLock<(u64, BTreeMap<u64, T>)>,
}

impl<T: Record> Default for MemoryTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> MemoryTable<T> {
    pub fn new() -> MemoryTable<T> {
        MemoryTable {
            inner: RwLock::new((0, BTreeMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(table) => table.1.len(),
            Err(_) => {
                log::error!("Failed to acquire read lock on {} table", T::KIND);
                0
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T: Record>() -> BitmessageError {
    log::error!("Lock on {} table is poisoned", T::KIND);
    BitmessageError::Database(format!("{} table lock poisoned", T::KIND))
}

impl<T: Record> RecordStore<T> for MemoryTable<T> {
    fn add(&self, record: &mut T) -> Result<u64> {
        let mut table = self.inner.write().map_err(|_| poisoned::<T>())?;
        table.0 += 1;
        let id = table.0;
        record.set_id(id);
        table.1.insert(id, record.clone());
        Ok(id)
    }

    fn update(&self, record: &T) -> Result<()> {
        let id = record.id().ok_or_else(missing_id::<T>)?;
        let mut table = self.inner.write().map_err(|_| poisoned::<T>())?;
        match table.1.get_mut(&id) {
            Some(stored) => {
                *stored = record.clone();
                Ok(())
            }
            None => Err(not_found::<T>(id)),
        }
    }

    fn delete(&self, id: u64) -> Result<()> {
        let mut table = self.inner.write().map_err(|_| poisoned::<T>())?;
        table.1.remove(&id);
        Ok(())
    }

    fn get(&self, id: u64) -> Result<Option<T>> {
        let table = self.inner.read().map_err(|_| poisoned::<T>())?;
        Ok(table.1.get(&id).cloned())
    }

    fn get_all(&self) -> Result<Vec<T>> {
        let table = self.inner.read().map_err(|_| poisoned::<T>())?;
        Ok(table.1.values().cloned().collect())
    }
}

/// Everything in memory, lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    addresses: MemoryTable<Address>,
    pubkeys: MemoryTable<Pubkey>,
    messages: MemoryTable<Message>,
    payloads: MemoryTable<ObjectPayload>,
    queue: MemoryTable<QueueRecord>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

impl Storage for MemoryStore {
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
