//! Signaling and media relay hub
//!
//! Clients connect over WebSocket, join a named room with their first offer,
//! and from then on every message they send on their data channel reaches the
//! rest of the room, while every piece of content they publish is relayed to
//! every other participant through a dedicated relay leg.
//!
//! All session and room state lives on a single [`task_loop`] thread owned by
//! the [`router::Router`].

pub mod config;
pub mod error;
pub mod model;
pub mod router;
pub mod signaling;
pub mod task_loop;
pub mod transport;
pub mod util;
