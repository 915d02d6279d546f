//! Multi-hop connectivity and command relay for a teleprompter.
//!
//! A wrist remote talks to a handheld over a paired link; the handheld
//! relays commands to the primary display over a peer-to-peer session.

pub mod coordinator;
pub mod domain;
pub mod infrastructure;
