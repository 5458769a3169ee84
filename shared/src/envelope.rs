use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    errors::{FleetError, FleetResult},
    types::{RunId, SearchRange, WorkerId},
};

pub const WIRE_VERSION: u16 = 1;

/// One unit of work, consumed exactly once by whichever worker pulls it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkAssignment {
    pub worker: WorkerId,
    pub range: SearchRange,
    pub difficulty: u32,
    pub payload: String,
    pub run: RunId,
}

/// A worker's terminal report. `success` is false when the worker swept its
/// whole range without a hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMessage {
    pub worker: WorkerId,
    pub nonce: u64,
    pub digest_hex: String,
    pub leading_zeros: u32,
    pub elapsed_secs: f64,
    pub success: bool,
}

impl ResultMessage {
    pub fn exhausted(worker: WorkerId, elapsed_secs: f64) -> Self {
        Self {
            worker,
            nonce: 0,
            digest_hex: String::new(),
            leading_zeros: 0,
            elapsed_secs,
            success: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSignal {
    pub run: RunId,
    pub collect_logs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageKind {
    Assignment(WorkAssignment),
    Result(ResultMessage),
    Cancel(CancelSignal),
}

impl MessageKind {
    pub fn label(&self) -> &'static str {
        match self {
            MessageKind::Assignment(_) => "assignment",
            MessageKind::Result(_) => "result",
            MessageKind::Cancel(_) => "cancel",
        }
    }
}

/// Versioned wrapper around every channel payload. Decoding rejects unknown
/// versions and malformed bytes instead of guessing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u16,
    pub run: RunId,
    pub kind: MessageKind,
}

impl Envelope {
    pub fn new(run: RunId, kind: MessageKind) -> Self {
        Self { version: WIRE_VERSION, run, kind }
    }

    pub fn to_bytes(&self) -> FleetResult<Bytes> {
        bincode::serialize(self)
            .map(Bytes::from)
            .map_err(|err| FleetError::Protocol(format!("encode {}: {err}", self.kind.label())))
    }

    pub fn from_bytes(data: &[u8]) -> FleetResult<Self> {
        let envelope: Envelope = bincode::deserialize(data)
            .map_err(|err| FleetError::Protocol(format!("decode: {err}")))?;
        if envelope.version != WIRE_VERSION {
            return Err(FleetError::Protocol(format!(
                "unsupported wire version {} (expected {WIRE_VERSION})",
                envelope.version
            )));
        }
        Ok(envelope)
    }
}
