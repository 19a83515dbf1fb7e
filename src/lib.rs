//! # bitmessage-core
//!
//! The cryptographic object engine of a Bitmessage client: address and key
//! codecs, ECIES encryption, ECDSA signatures, the object wire format, proof
//! of work, and the pipelines that turn messages into stamped network
//! objects and back.
//!
//! ## Layout
//! - `wallet/`: address strings, WIF keys, identity generation
//! - `crypto/`: ECIES and signatures
//! - `core/`: objects, POW, pubkeys, msgs, outgoing/incoming pipelines, retry queue
//! - `network/`: envelope framing and the `Transport` boundary
//! - `storage/`: record traits with in-memory and sled implementations
//! - `config/`: TOML configuration with environment overrides
//! - `utils/`: digests, Base58, varints, byte cursor, time
//! - `cli/`: the `bmcore` developer commands
//!
//! Nothing here opens a socket. Callers supply a [`Storage`] and a
//! [`Transport`] and drive the pipelines themselves.

pub mod cli;
pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

pub use cli::{Command, Opt, OutputFormat};
pub use config::Config;
pub use core::{
    BmObject, IncomingOutcome, IncomingProcessor, Message, MessageStatus, ObjectPayload,
    ObjectType, OutgoingProcessor, PowParams, ProofOfWork, Pubkey, QueueRunner, SendOutcome,
};
pub use crypto::{decrypt, encrypt, sign, verify_signature};
pub use error::{BitmessageError, Result};
pub use network::Transport;
pub use storage::{MemoryStore, Record, RecordStore, SledStore, Storage};
pub use wallet::{decode_address, encode_address, validate_address, Address, AddressGenerator};
