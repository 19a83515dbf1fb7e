//! Core object engine
//!
//! Wire objects, proof of work, pubkeys and msgs, and the pipelines that
//! compose them: outgoing construction, incoming recovery and the retry
//! queue.

pub mod behaviour;
pub mod incoming;
pub mod message;
pub mod object;
pub mod outgoing;
pub mod proof_of_work;
pub mod pubkey;
pub mod queue;

pub use behaviour::{Behaviour, DOES_ACK};
pub use incoming::{IncomingOutcome, IncomingProcessor};
pub use message::{
    decode_message_text, encode_message_text, Message, MessageEncoding, MessageStatus,
    UnencryptedMessage,
};
pub use object::{
    BmObject, ObjectPayload, ObjectType, ProtocolVersion, ACK_DATA_LEN, CLOCK_SKEW, MAX_OBJECT_TTL,
};
pub use outgoing::{OutgoingProcessor, SendOutcome};
pub use proof_of_work::{
    calculate_target, check_pow, do_pow, stamp_object, verify_object, PowCancel, PowFormula,
    PowParams, ProofOfWork,
};
pub use pubkey::{validate_pubkey, Pubkey};
pub use queue::{enqueue, QueueRecord, QueueReport, QueueRunner, QueueTask, RecordRef};
