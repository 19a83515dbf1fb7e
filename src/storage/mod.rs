//! Record storage
//!
//! The engine never owns a database. Pipelines receive a [`Storage`]
//! and treat record ids as opaque foreign keys. Two implementations ship
//! with the crate: [`MemoryStore`] for tests and embedding, and
//! [`SledStore`] for on-disk persistence.

pub mod memory_store;
pub mod sled_store;

pub use memory_store::{MemoryStore, MemoryTable};
pub use sled_store::{SledStore, SledTable};

use crate::core::message::Message;
use crate::core::object::ObjectPayload;
use crate::core::pubkey::Pubkey;
use crate::core::queue::QueueRecord;
use crate::error::{BitmessageError, Result};
use crate::wallet::address::DecodedAddress;
use crate::wallet::identity::Address;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A storable record with an optional id assigned on first insert.
pub trait Record:
    Clone + Send + Sync + Serialize + DeserializeOwned + bincode::Encode + bincode::Decode<()>
{
    const KIND: &'static str;

    fn id(&self) -> Option<u64>;
    fn set_id(&mut self, id: u64);
}

pub trait RecordStore<T: Record>: Send + Sync {
    /// Inserts `record`, assigns its id and returns it.
    fn add(&self, record: &mut T) -> Result<u64>;
    fn update(&self, record: &T) -> Result<()>;
    fn delete(&self, id: u64) -> Result<()>;
    fn get(&self, id: u64) -> Result<Option<T>>;
    /// All records in id order.
    fn get_all(&self) -> Result<Vec<T>>;

    fn search(&self, predicate: &dyn Fn(&T) -> bool) -> Result<Vec<T>> {
        Ok(self
            .get_all()?
            .into_iter()
            .filter(|record| predicate(record))
            .collect())
    }
}

pub trait Storage: Send + Sync {
    fn addresses(&self) -> &dyn RecordStore<Address>;
    fn pubkeys(&self) -> &dyn RecordStore<Pubkey>;
    fn messages(&self) -> &dyn RecordStore<Message>;
    fn payloads(&self) -> &dyn RecordStore<ObjectPayload>;
    fn queue(&self) -> &dyn RecordStore<QueueRecord>;
}

pub(crate) fn missing_id<T: Record>() -> BitmessageError {
    BitmessageError::Database(format!("Cannot update {} without an id", T::KIND))
}

pub(crate) fn not_found<T: Record>(id: u64) -> BitmessageError {
    BitmessageError::Database(format!("No {} with id {id}", T::KIND))
}

pub fn find_address(store: &dyn RecordStore<Address>, address: &str) -> Result<Option<Address>> {
    Ok(store
        .search(&|record: &Address| record.address == address)?
        .into_iter()
        .next())
}

fn pubkey_matches(pubkey: &Pubkey, address: &DecodedAddress) -> bool {
    pubkey.address_version == address.version
        && pubkey.stream == address.stream
        && pubkey.ripe().map(|ripe| ripe == address.ripe).unwrap_or(false)
}

/// The stored pubkey for `address` with the latest expiration, if any.
pub fn find_pubkey(
    store: &dyn RecordStore<Pubkey>,
    address: &DecodedAddress,
) -> Result<Option<Pubkey>> {
    Ok(store
        .search(&|pubkey: &Pubkey| pubkey_matches(pubkey, address))?
        .into_iter()
        .max_by_key(|pubkey| pubkey.expires))
}

/// Stores `pubkey`, keeping one record per address. When a record already
/// exists the one expiring later wins and surplus duplicates are removed.
pub fn upsert_pubkey(store: &dyn RecordStore<Pubkey>, mut pubkey: Pubkey) -> Result<Pubkey> {
    let address = pubkey.decoded_address()?;
    let mut existing = store.search(&|stored: &Pubkey| pubkey_matches(stored, &address))?;
    existing.sort_by_key(|stored| std::cmp::Reverse(stored.expires));

    let mut iter = existing.into_iter();
    let kept = match iter.next() {
        None => {
            store.add(&mut pubkey)?;
            return Ok(pubkey);
        }
        Some(current) if pubkey.expires > current.expires => {
            pubkey.id = current.id;
            pubkey.address_id = pubkey.address_id.or(current.address_id);
            store.update(&pubkey)?;
            pubkey
        }
        Some(current) => current,
    };
    for duplicate in iter {
        if let Some(id) = duplicate.id {
            debug!("Dropping duplicate pubkey record {id}");
            store.delete(id)?;
        }
    }
    Ok(kept)
}
