use crate::error::Result;

/// The peer network as seen by the pipelines. Implementations own their
/// sockets and threading; the engine only hands over and receives bytes.
pub trait Transport: Send + Sync {
    /// Sends a framed, POW-stamped object. `Ok(false)` means no peer took it.
    fn disseminate(&self, framed_object: &[u8]) -> Result<bool>;

    /// Asks the network for the pubkey object matching `identifier` (ripe
    /// up to version 3, tag from version 4). Returns raw object bytes.
    fn request_pubkey(&self, identifier: &[u8], address_version: u64) -> Result<Option<Vec<u8>>>;

    /// Objects received since the last call, as raw object bytes.
    fn fetch_new_objects(&self) -> Result<Vec<Vec<u8>>>;
}
