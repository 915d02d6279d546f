//! Command Relay
//!
//! Decodes a payload received on one link and forwards it onto the other.
//! Nothing that fails to decode is ever forwarded. Forwarding is
//! fire-and-forget: the outcome only says whether the hand-off happened.

use crate::domain::command::{Command, CommandEnvelope, PROTOCOL_VERSION};
use crate::domain::errors::{DecodeError, LinkError};
use crate::domain::models::TransportKind;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Inbound link -> outbound link.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: HashMap<TransportKind, TransportKind>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bidirectional(a: TransportKind, b: TransportKind) -> Self {
        let mut table = Self::new();
        table.add(a, b);
        table.add(b, a);
        table
    }

    pub fn add(&mut self, from: TransportKind, to: TransportKind) {
        self.routes.insert(from, to);
    }

    pub fn route(&self, from: TransportKind) -> Option<TransportKind> {
        self.routes.get(&from).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Forwarded(Command),
    /// Decoded and routed, but the outbound link refused the hand-off.
    Undeliverable(Command, LinkError),
    Rejected(DecodeError),
    NoRoute(TransportKind),
}

impl RelayOutcome {
    /// The upstream hop gets an acknowledgement for anything that decoded.
    pub fn accepted(&self) -> bool {
        matches!(
            self,
            RelayOutcome::Forwarded(_) | RelayOutcome::Undeliverable(..)
        )
    }
}

#[derive(Debug, Default)]
pub struct CommandRelay {
    routes: RoutingTable,
    forwarded: u64,
    undeliverable: u64,
    rejected: u64,
}

impl CommandRelay {
    pub fn new(routes: RoutingTable) -> Self {
        Self {
            routes,
            ..Self::default()
        }
    }

    pub fn relay<F>(&mut self, from: TransportKind, payload: &[u8], forward: F) -> RelayOutcome
    where
        F: FnOnce(TransportKind, &CommandEnvelope) -> Result<(), LinkError>,
    {
        let envelope = match CommandEnvelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping undecodable payload from {} link: {}", from, e);
                self.rejected += 1;
                return RelayOutcome::Rejected(e);
            }
        };

        let Some(to) = self.routes.route(from) else {
            warn!("No route for commands arriving on the {} link", from);
            return RelayOutcome::NoRoute(from);
        };

        // Translation: re-stamp the version this build speaks, keep the stamp.
        let outbound = CommandEnvelope {
            version: PROTOCOL_VERSION,
            ..envelope
        };

        match forward(to, &outbound) {
            Ok(()) => {
                debug!("Relayed {} from {} to {}", outbound.command, from, to);
                self.forwarded += 1;
                RelayOutcome::Forwarded(outbound.command)
            }
            Err(e) => {
                warn!("Could not relay {} to {} link: {}", outbound.command, to, e);
                self.undeliverable += 1;
                RelayOutcome::Undeliverable(outbound.command, e)
            }
        }
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    pub fn undeliverable(&self) -> u64 {
        self.undeliverable
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::command::Stamp;

    fn relay() -> CommandRelay {
        CommandRelay::new(RoutingTable::bidirectional(
            TransportKind::Paired,
            TransportKind::PeerToPeer,
        ))
    }

    #[test]
    fn never_forwards_what_it_cannot_decode() {
        let mut relay = relay();
        let garbage: [&[u8]; 7] = [
            b"",
            b"not json",
            b"[\"next\"]",
            br#"{"verb":"next"}"#,
            br#"{"command":""}"#,
            br#"{"command":"rewind"}"#,
            br#"{"command":"next","version":99}"#,
        ];
        for payload in garbage {
            let mut called = false;
            let outcome = relay.relay(TransportKind::Paired, payload, |_, _| {
                called = true;
                Ok(())
            });
            assert!(matches!(outcome, RelayOutcome::Rejected(_)), "{:?}", outcome);
            assert!(!outcome.accepted());
            assert!(!called);
        }
        assert_eq!(relay.rejected(), 7);
        assert_eq!(relay.forwarded(), 0);
    }

    #[test]
    fn forwards_to_the_other_link_keeping_the_stamp() {
        let mut relay = relay();
        let stamp = Stamp { origin: 9, seq: 3 };
        let payload = CommandEnvelope::stamped(Command::Previous, stamp).encode();

        let mut seen = None;
        let outcome = relay.relay(TransportKind::Paired, &payload, |to, envelope| {
            seen = Some((to, envelope.clone()));
            Ok(())
        });

        assert_eq!(outcome, RelayOutcome::Forwarded(Command::Previous));
        let (to, envelope) = seen.unwrap();
        assert_eq!(to, TransportKind::PeerToPeer);
        assert_eq!(envelope.stamp, Some(stamp));

        let back = relay.relay(TransportKind::PeerToPeer, br#"{"command":"x-blank"}"#, |to, _| {
            assert_eq!(to, TransportKind::Paired);
            Ok(())
        });
        assert_eq!(back, RelayOutcome::Forwarded(Command::Extension("x-blank".into())));
    }

    #[test]
    fn undeliverable_is_still_accepted_upstream() {
        let mut relay = relay();
        let outcome = relay.relay(TransportKind::Paired, br#"{"command":"next"}"#, |to, _| {
            Err(LinkError::Unreachable(to))
        });
        assert_eq!(
            outcome,
            RelayOutcome::Undeliverable(
                Command::Next,
                LinkError::Unreachable(TransportKind::PeerToPeer)
            )
        );
        assert!(outcome.accepted());
        assert_eq!(relay.undeliverable(), 1);
    }

    #[test]
    fn missing_route() {
        let mut relay = CommandRelay::new(RoutingTable::new());
        let outcome = relay.relay(TransportKind::Paired, br#"{"command":"next"}"#, |_, _| {
            panic!("must not forward")
        });
        assert_eq!(outcome, RelayOutcome::NoRoute(TransportKind::Paired));
    }
}
