//! # geoshare-collab: Real-time location sharing
//!
//! Participants publish their position to a relay, which fans it out to
//! everybody else. Each client keeps its own view of who is online and
//! evicts participants that go quiet.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     WebSocket      ┌──────────────┐
//! │ Session      │ ◄────────────────► │ RelayServer  │
//! │ (per client) │     JSON frames    │ (central)    │
//! └──────┬───────┘                    └──────┬───────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌──────────────┐                    ┌──────────────┐
//! │ Presence     │                    │ FanoutGroup  │
//! │ Registry     │                    │ (N-1 fan-out)│
//! └──────┬───────┘                    └──────────────┘
//!        │
//!   StalenessReaper ◄── periodic tick
//!   SelfLocationPublisher ◄── PositionSource
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire protocol (`send-location`, `receive-location`)
//! - [`broadcast`]: Fan-out to every channel but the sender
//! - [`server`]: WebSocket relay
//! - [`client`]: WebSocket transport channel with optional reconnect
//! - [`presence`]: Client-side registry of participants
//! - [`reaper`]: Liveness policy evicting silent participants
//! - [`publisher`]: Position sources and the self-location publisher
//! - [`session`]: Event loop tying the client pieces together
//! - [`config`]: Relay and client configuration

pub mod protocol;
pub mod broadcast;
pub mod server;
pub mod client;
pub mod presence;
pub mod reaper;
pub mod publisher;
pub mod session;
pub mod config;

// Re-exports for convenience
pub use protocol::{ClientMessage, ParticipantId, Position, ProtocolError, RelayMessage};
pub use broadcast::{FanoutGroup, FanoutStats, RelayFrame};
pub use server::{RelayServer, RelayStats};
pub use client::{connect, ChannelEvent, ConnectionState, TransportHandle};
pub use presence::{Participant, PresenceChange, PresenceRegistry};
pub use reaper::StalenessReaper;
pub use publisher::{
    ChannelSource, FixOutcome, FixStream, PositionSource, PositioningError,
    PositioningOptions, RouteSource, SelfLocationPublisher,
};
pub use session::{Session, SessionStatus, SessionUpdate};
pub use config::{ClientConfig, ConfigError, RelayConfig};
