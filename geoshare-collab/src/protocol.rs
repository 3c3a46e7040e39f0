//! JSON wire protocol for location sharing.
//!
//! Every frame is a WebSocket text message tagged by `event`:
//! ```text
//! client → relay    {"event":"send-location","latitude":37.0,"longitude":-122.0}
//! relay  → client   {"event":"welcome","identity":"…"}
//! relay  → others   {"event":"receive-location","identity":"…","latitude":37.0,"longitude":-122.0}
//! relay  → others   {"event":"participant-left","identity":"…"}   (opt-in)
//! ```
//!
//! Only the relay writes `identity`. Client frames carry no identity field and
//! one supplied anyway is discarded while decoding.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque per-connection identity assigned by the relay.
///
/// Not stable across reconnects: a new connection always gets a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Fresh random identity for a newly accepted connection.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Geographic position in degrees.
///
/// Always finite, latitude in [-90, 90], longitude in [-180, 180].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    latitude: f64,
    longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ProtocolError> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        if !valid {
            return Err(ProtocolError::InvalidCoordinate { latitude, longitude });
        }
        Ok(Self { latitude, longitude })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

// ───────────────────────────────────────────────────────────────────
// Raw frames (serde shapes, unvalidated)
// ───────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
enum ClientFrame {
    SendLocation { latitude: f64, longitude: f64 },
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
enum RelayFrame {
    Welcome {
        identity: ParticipantId,
    },
    ReceiveLocation {
        identity: ParticipantId,
        latitude: f64,
        longitude: f64,
    },
    ParticipantLeft {
        identity: ParticipantId,
    },
}

// ───────────────────────────────────────────────────────────────────
// Validated messages
// ───────────────────────────────────────────────────────────────────

/// Message sent by a client to the relay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClientMessage {
    SendLocation(Position),
}

impl ClientMessage {
    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let frame = match self {
            ClientMessage::SendLocation(p) => ClientFrame::SendLocation {
                latitude: p.latitude,
                longitude: p.longitude,
            },
        };
        serde_json::to_string(&frame).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Parse and validate a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let frame: ClientFrame = serde_json::from_str(text)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        match frame {
            ClientFrame::SendLocation { latitude, longitude } => {
                Ok(ClientMessage::SendLocation(Position::new(latitude, longitude)?))
            }
        }
    }
}

/// Message sent by the relay to clients.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// Handshake: tells a freshly connected client its identity.
    Welcome { identity: ParticipantId },
    /// A position published by another channel.
    ReceiveLocation {
        identity: ParticipantId,
        position: Position,
    },
    /// A channel closed (only when the relay announces departures).
    ParticipantLeft { identity: ParticipantId },
}

impl RelayMessage {
    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let frame = match self {
            RelayMessage::Welcome { identity } => RelayFrame::Welcome {
                identity: identity.clone(),
            },
            RelayMessage::ReceiveLocation { identity, position } => RelayFrame::ReceiveLocation {
                identity: identity.clone(),
                latitude: position.latitude,
                longitude: position.longitude,
            },
            RelayMessage::ParticipantLeft { identity } => RelayFrame::ParticipantLeft {
                identity: identity.clone(),
            },
        };
        serde_json::to_string(&frame).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Parse and validate a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let frame: RelayFrame = serde_json::from_str(text)
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(match frame {
            RelayFrame::Welcome { identity } => RelayMessage::Welcome { identity },
            RelayFrame::ReceiveLocation {
                identity,
                latitude,
                longitude,
            } => RelayMessage::ReceiveLocation {
                identity,
                position: Position::new(latitude, longitude)?,
            },
            RelayFrame::ParticipantLeft { identity } => RelayMessage::ParticipantLeft { identity },
        })
    }

    /// Identity the message is about.
    pub fn identity(&self) -> &ParticipantId {
        match self {
            RelayMessage::Welcome { identity }
            | RelayMessage::ReceiveLocation { identity, .. }
            | RelayMessage::ParticipantLeft { identity } => identity,
        }
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    InvalidCoordinate { latitude: f64, longitude: f64 },
    /// The relay could not be reached or refused the handshake.
    ConnectionFailed(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidCoordinate { latitude, longitude } => {
                write!(f, "Invalid coordinate ({latitude}, {longitude})")
            }
            Self::ConnectionFailed(e) => write!(f, "Connection failed: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}
