//! Record encoding for the sled-backed store. Wire formats never go through
//! here; they are hand-encoded in `core`.
use crate::error::{BitmessageError, Result};
use serde::{Deserialize, Serialize};

pub fn serialize<T: Serialize + bincode::Encode>(record: &T) -> Result<Vec<u8>> {
    bincode::encode_to_vec(record, bincode::config::standard())
        .map_err(|e| BitmessageError::Serialization(format!("Record encoding failed: {e}")))
}

pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let (record, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| BitmessageError::Serialization(format!("Record decoding failed: {e}")))?;
    Ok(record)
}
