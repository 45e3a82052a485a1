use serde::Deserialize;
use serde::Serialize;

use crate::constants::NOTIFY_MESSAGE_VERSION;
use crate::constants::NOTIFY_OP_HEARTBEAT;
use crate::constants::NOTIFY_OP_LOCK_ACQUIRED;
use crate::constants::NOTIFY_OP_LOCK_RELEASED;
use crate::NotifyError;
use crate::Result;

/// Leader notification carried over the watch channel.
///
/// The sender is identified by the channel's notifier id, so none of the
/// variants carry data. Ops this build does not know decode to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    Heartbeat,
    LockAcquired,
    LockReleased,
    Unknown(u32),
}

/// On-wire envelope. Newer senders may append fields; decoding ignores
/// trailing bytes.
#[derive(Debug, Serialize, Deserialize)]
struct NotifyMessage {
    version: u8,
    op: u32,
}

impl Payload {
    pub fn op(&self) -> u32 {
        match self {
            Payload::Heartbeat => NOTIFY_OP_HEARTBEAT,
            Payload::LockAcquired => NOTIFY_OP_LOCK_ACQUIRED,
            Payload::LockReleased => NOTIFY_OP_LOCK_RELEASED,
            Payload::Unknown(op) => *op,
        }
    }

    pub fn from_op(op: u32) -> Self {
        match op {
            NOTIFY_OP_HEARTBEAT => Payload::Heartbeat,
            NOTIFY_OP_LOCK_ACQUIRED => Payload::LockAcquired,
            NOTIFY_OP_LOCK_RELEASED => Payload::LockReleased,
            other => Payload::Unknown(other),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let message = NotifyMessage {
            version: NOTIFY_MESSAGE_VERSION,
            op: self.op(),
        };
        bincode::serialize(&message).map_err(|e| NotifyError::Codec(e).into())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let message: NotifyMessage = bincode::deserialize(bytes).map_err(NotifyError::Codec)?;
        Ok(Self::from_op(message.op))
    }
}
