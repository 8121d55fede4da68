//! Session and room state
//!
//! Everything in here is owned by the task loop thread and mutated only by
//! tasks running on it.

pub mod envelope;
pub mod participant;
pub mod room;
pub mod session;
