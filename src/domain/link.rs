//! Link state machine
//!
//! One `Link` per transport per endpoint. The state only advances through
//! [`Link::activate`] and [`Link::on_transport_event`]:
//!
//! ```text
//! Idle ──activate──▶ Discovering ──peerFound──▶ Connecting ──peerConnected──▶ Connected
//!                         │        (peer-to-peer)     │                            │
//!                         └──reachable (paired)───────┼────────────────────────────┤
//!                                                     ▼                            ▼
//!                  Discovering ◀──activate── Disconnected(reason) ◀──peerDisconnected | unreachable
//! ```

use crate::domain::command::CommandEnvelope;
use crate::domain::errors::{LinkError, TransportError};
use crate::domain::models::{DisconnectReason, LinkState, PeerIdentity, TransportKind};
use tracing::{debug, warn};

/// Tagged events a transport delivers for one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ReachabilityChanged(bool),
    /// A discovered peer was chosen as counterpart (invitation sent or accepted).
    PeerFound(PeerIdentity),
    PeerConnected(PeerIdentity),
    PeerDisconnected(PeerIdentity, DisconnectReason),
    DataReceived {
        payload: Vec<u8>,
        from: Option<PeerIdentity>,
    },
    /// A previously accepted hand-off could not be delivered.
    DeliveryFailed(String),
}

/// What applying an event did to the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkUpdate {
    Transitioned { from: LinkState, to: LinkState },
    Delivered {
        payload: Vec<u8>,
        from: Option<PeerIdentity>,
    },
    DeliveryFailed(String),
    Unchanged,
    Dropped,
}

#[derive(Debug)]
pub struct Link {
    kind: TransportKind,
    state: LinkState,
    reachable: bool,
    counterpart: Option<PeerIdentity>,
    last_error: Option<LinkError>,
}

impl Link {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            state: LinkState::Idle,
            reachable: false,
            counterpart: None,
            last_error: None,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    pub fn counterpart(&self) -> Option<&PeerIdentity> {
        self.counterpart.as_ref()
    }

    pub fn last_error(&self) -> Option<&LinkError> {
        self.last_error.as_ref()
    }

    /// Returns true when the caller should start discovery (or session
    /// activation) on the transport.
    pub fn activate(&mut self, transport_supported: bool) -> bool {
        match self.state {
            LinkState::Idle | LinkState::Disconnected(_) => {}
            state => {
                debug!("{} link already {}; activate ignored", self.kind, state);
                return false;
            }
        }

        if !transport_supported {
            warn!("{} transport unsupported; link stays {}", self.kind, self.state);
            self.last_error = Some(LinkError::TransportUnsupported(self.kind));
            return false;
        }

        self.counterpart = None;
        self.transition(LinkState::Discovering);
        true
    }

    pub fn on_transport_event(&mut self, event: TransportEvent) -> LinkUpdate {
        let update = match (self.kind, event) {
            (TransportKind::Paired, TransportEvent::ReachabilityChanged(reachable)) => {
                self.on_reachability(reachable)
            }
            (TransportKind::PeerToPeer, TransportEvent::PeerFound(peer)) => self.on_peer_found(peer),
            (TransportKind::PeerToPeer, TransportEvent::PeerConnected(peer)) => {
                self.on_peer_connected(peer)
            }
            (TransportKind::PeerToPeer, TransportEvent::PeerDisconnected(peer, reason)) => {
                self.on_peer_disconnected(peer, reason)
            }
            (_, TransportEvent::DataReceived { payload, from }) => self.on_data(payload, from),
            (_, TransportEvent::DeliveryFailed(reason)) => {
                self.last_error = Some(LinkError::SendFailed(reason.clone()));
                LinkUpdate::DeliveryFailed(reason)
            }
            (kind, event) => {
                warn!("Dropping {:?} on {} link", event, kind);
                LinkUpdate::Dropped
            }
        };
        if update == LinkUpdate::Dropped {
            debug!("{} link state unchanged ({})", self.kind, self.state);
        }
        update
    }

    /// Encodes and hands a command to the transport. Only valid while connected.
    pub fn send<F>(&mut self, envelope: &CommandEnvelope, hand_off: F) -> Result<(), LinkError>
    where
        F: FnOnce(Option<&PeerIdentity>, Vec<u8>) -> Result<(), TransportError>,
    {
        self.send_payload(envelope.encode(), hand_off)
    }

    pub fn send_payload<F>(&mut self, payload: Vec<u8>, hand_off: F) -> Result<(), LinkError>
    where
        F: FnOnce(Option<&PeerIdentity>, Vec<u8>) -> Result<(), TransportError>,
    {
        if !self.state.is_connected() {
            let err = LinkError::Unreachable(self.kind);
            self.last_error = Some(err.clone());
            return Err(err);
        }

        hand_off(self.counterpart.as_ref(), payload).map_err(|e| {
            warn!("{} send failed: {}", self.kind, e);
            let err = LinkError::from(e);
            self.last_error = Some(err.clone());
            err
        })
    }

    fn on_reachability(&mut self, reachable: bool) -> LinkUpdate {
        self.reachable = reachable;
        match (self.state, reachable) {
            (LinkState::Discovering, true) => self.transition(LinkState::Connected),
            (LinkState::Connecting | LinkState::Connected, false) => {
                self.transition(LinkState::Disconnected(DisconnectReason::Unreachable))
            }
            _ => LinkUpdate::Unchanged,
        }
    }

    fn on_peer_found(&mut self, peer: PeerIdentity) -> LinkUpdate {
        match self.state {
            LinkState::Discovering => {
                self.counterpart = Some(peer);
                self.transition(LinkState::Connecting)
            }
            LinkState::Connecting | LinkState::Connected
                if self.counterpart.as_ref() == Some(&peer) =>
            {
                LinkUpdate::Unchanged
            }
            state => {
                warn!("Ignoring peer {} found while {}", peer, state);
                LinkUpdate::Dropped
            }
        }
    }

    fn on_peer_connected(&mut self, peer: PeerIdentity) -> LinkUpdate {
        if self.counterpart.as_ref() != Some(&peer) {
            warn!("Ignoring connection from {} (not the selected counterpart)", peer);
            return LinkUpdate::Dropped;
        }
        match self.state {
            LinkState::Connecting => {
                self.reachable = true;
                self.transition(LinkState::Connected)
            }
            LinkState::Connected => LinkUpdate::Unchanged,
            state => {
                warn!("Ignoring connection from {} while {}", peer, state);
                LinkUpdate::Dropped
            }
        }
    }

    fn on_peer_disconnected(&mut self, peer: PeerIdentity, reason: DisconnectReason) -> LinkUpdate {
        if !self.state.is_engaged() || self.counterpart.as_ref() != Some(&peer) {
            warn!("Ignoring disconnect of {} while {}", peer, self.state);
            return LinkUpdate::Dropped;
        }
        self.reachable = false;
        self.counterpart = None;
        self.transition(LinkState::Disconnected(reason))
    }

    fn on_data(&mut self, payload: Vec<u8>, from: Option<PeerIdentity>) -> LinkUpdate {
        if !self.state.is_connected() {
            warn!("Dropping {} bytes received while {}", payload.len(), self.state);
            return LinkUpdate::Dropped;
        }
        if self.kind == TransportKind::PeerToPeer && from.as_ref() != self.counterpart.as_ref() {
            warn!("Dropping data from non-counterpart {:?}", from);
            return LinkUpdate::Dropped;
        }
        LinkUpdate::Delivered { payload, from }
    }

    fn transition(&mut self, to: LinkState) -> LinkUpdate {
        let from = self.state;
        self.state = to;
        debug!("{} link: {} -> {}", self.kind, from, to);
        LinkUpdate::Transitioned { from, to }
    }
}
