//! Messages exchanged between peers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Claim, MemberId, RecordId, Versioned};

/// Errors decoding or encoding an envelope.
#[derive(Debug, Error)]
pub enum WireError {
    /// The payload was not valid JSON for the expected type.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// One replicated update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message<P> {
    /// The sender claims write authority over a record.
    Authority { record: RecordId, claim: Claim },
    /// The full current value of a record, as one atomic versioned update.
    State { record: RecordId, value: Versioned<P> },
}

impl<P> Message<P> {
    /// The record this message is about.
    pub fn record(&self) -> RecordId {
        match self {
            Message::Authority { record, .. } | Message::State { record, .. } => *record,
        }
    }
}

/// A message plus the peer that sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<P> {
    /// Sending peer.
    pub from: MemberId,
    /// The update.
    pub message: Message<P>,
}

impl<P: Serialize> Envelope<P> {
    /// Encode as JSON.
    pub fn to_json(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl<P: DeserializeOwned> Envelope<P> {
    /// Decode from JSON.
    pub fn from_json(s: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SlotIndex;

    #[test]
    fn envelope_json_shape() {
        let from = MemberId::new(4).unwrap();
        let envelope = Envelope {
            from,
            message: Message::<u8>::Authority {
                record: RecordId::Slot(SlotIndex(2)),
                claim: Claim { epoch: 1, holder: from },
            },
        };

        let json = envelope.to_json().unwrap();
        assert!(json.contains("\"type\":\"Authority\""));
        assert!(json.contains("\"kind\":\"Slot\""));

        let parsed: Envelope<u8> = Envelope::from_json(&json).unwrap();
        assert_eq!(parsed.message.record(), RecordId::Slot(SlotIndex(2)));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = Envelope::<u8>::from_json("{\"from\":0}").unwrap_err();
        assert!(matches!(err, WireError::Malformed(_)));
    }
}
