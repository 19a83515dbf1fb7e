use serde::{Deserialize, Serialize};

/// The sender acknowledges messages it receives.
pub const DOES_ACK: u32 = 1;

/// Behaviour bitfield advertised in pubkeys and msgs.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub struct Behaviour(u32);

impl Behaviour {
    pub fn from_bits(bits: u32) -> Behaviour {
        Behaviour(bits)
    }

    /// What we advertise for our own identities.
    pub fn own() -> Behaviour {
        Behaviour(DOES_ACK)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn does_ack(self) -> bool {
        self.0 & DOES_ACK != 0
    }
}
