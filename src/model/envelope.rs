//! Signaling envelopes
//!
//! JSON objects tagged by a `"type"` field, carried as WebSocket text frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EnvelopeError;

const INBOUND_KINDS: &[&str] = &["offer", "answer", "candidate", "endOfCandidates", "ping"];

/// Envelopes a client sends to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Inbound {
    Offer {
        sdp: String,
        room_id: String,
    },
    /// Reply to an offer the hub sent for renegotiation.
    Answer {
        sdp: String,
    },
    Candidate {
        candidate: String,
        #[serde(rename = "sdpMid", default)]
        sdp_mid: Option<String>,
    },
    EndOfCandidates,
    Ping,
}

impl Inbound {
    /// Decode a text frame.
    ///
    /// Unknown kinds are reported separately from malformed known kinds so
    /// the two can be logged apart.
    pub fn decode(text: &str) -> Result<Inbound, EnvelopeError> {
        let value: Value = serde_json::from_str(text).map_err(EnvelopeError::Json)?;

        let kind = match value.get("type").and_then(Value::as_str) {
            Some(kind) => kind.to_string(),
            None => return Err(EnvelopeError::MissingType),
        };

        if !INBOUND_KINDS.contains(&kind.as_str()) {
            return Err(EnvelopeError::UnknownType(kind));
        }

        serde_json::from_value(value).map_err(|source| EnvelopeError::Malformed { kind, source })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::Offer { .. } => "offer",
            Inbound::Answer { .. } => "answer",
            Inbound::Candidate { .. } => "candidate",
            Inbound::EndOfCandidates => "endOfCandidates",
            Inbound::Ping => "ping",
        }
    }
}

/// Envelopes the hub sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outbound {
    Hello {
        id: String,
    },
    Answer {
        sdp: String,
    },
    /// Hub-initiated renegotiation, used when relay legs are added.
    Offer {
        sdp: String,
    },
    Candidate {
        candidate: String,
        #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
        sdp_mid: Option<String>,
    },
    EndOfCandidates,
    Pong,
}

impl Outbound {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::Hello { .. } => "hello",
            Outbound::Answer { .. } => "answer",
            Outbound::Offer { .. } => "offer",
            Outbound::Candidate { .. } => "candidate",
            Outbound::EndOfCandidates => "endOfCandidates",
            Outbound::Pong => "pong",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_offer() {
        let env = Inbound::decode(r#"{"type":"offer","sdp":"v=0","room_id":"42"}"#).unwrap();
        assert_eq!(
            env,
            Inbound::Offer {
                sdp: "v=0".into(),
                room_id: "42".into()
            }
        );
    }

    #[test]
    fn decodes_candidate_with_and_without_mid() {
        let with = Inbound::decode(r#"{"type":"candidate","candidate":"c","sdpMid":"0"}"#).unwrap();
        assert_eq!(
            with,
            Inbound::Candidate {
                candidate: "c".into(),
                sdp_mid: Some("0".into())
            }
        );

        let without = Inbound::decode(r#"{"type":"candidate","candidate":"c"}"#).unwrap();
        assert_eq!(
            without,
            Inbound::Candidate {
                candidate: "c".into(),
                sdp_mid: None
            }
        );
    }

    #[test]
    fn decodes_unit_kinds() {
        assert_eq!(Inbound::decode(r#"{"type":"ping"}"#).unwrap(), Inbound::Ping);
        assert_eq!(
            Inbound::decode(r#"{"type":"endOfCandidates"}"#).unwrap(),
            Inbound::EndOfCandidates
        );
    }

    #[test]
    fn classifies_bad_input() {
        assert!(matches!(Inbound::decode("{not json"), Err(EnvelopeError::Json(_))));
        assert!(matches!(Inbound::decode(r#"{"sdp":"x"}"#), Err(EnvelopeError::MissingType)));
        assert!(matches!(
            Inbound::decode(r#"{"type":"subscribe"}"#),
            Err(EnvelopeError::UnknownType(k)) if k == "subscribe"
        ));
        assert!(matches!(
            Inbound::decode(r#"{"type":"offer","sdp":"v=0"}"#),
            Err(EnvelopeError::Malformed { kind, .. }) if kind == "offer"
        ));
    }

    #[test]
    fn encodes_outbound_wire_names() {
        assert_eq!(Outbound::Pong.encode().unwrap(), r#"{"type":"pong"}"#);
        assert_eq!(
            Outbound::EndOfCandidates.encode().unwrap(),
            r#"{"type":"endOfCandidates"}"#
        );
        assert_eq!(
            Outbound::Hello { id: "3".into() }.encode().unwrap(),
            r#"{"type":"hello","id":"3"}"#
        );

        let cand = Outbound::Candidate {
            candidate: "candidate:1 1 udp 1 10.0.0.1 9 typ host".into(),
            sdp_mid: None,
        };
        assert!(!cand.encode().unwrap().contains("sdpMid"));
    }
}
