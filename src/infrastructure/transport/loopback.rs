//! Loopback Medium
//!
//! In-process stand-in for the paired link, the local peer network and the
//! network path. Endpoints attached to one medium see each other the same way
//! they would over the air: sightings, invitations, sessions and data all
//! arrive as posted events.

use crate::domain::errors::TransportError;
use crate::domain::link::TransportEvent;
use crate::domain::models::{DisconnectReason, PeerIdentity, TransportKind};
use crate::domain::peers::DiscoveryInfo;
use crate::infrastructure::transport::{
    DiscoveryEvent, EventSink, NetworkPathMonitor, PairedTransport, PeerTransport, TransportInput,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace};

struct PeerNode {
    identity: PeerIdentity,
    sink: EventSink,
    advertising: Option<String>,
    browsing: Option<String>,
}

struct MediumState {
    nodes: HashMap<u64, PeerNode>,
    sessions: HashSet<(u64, u64)>,
    invitations: HashSet<(u64, u64)>,
    path_available: bool,
    path_watchers: HashMap<u64, EventSink>,
    next_id: u64,
}

impl MediumState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn post_to(&self, id: u64, input: TransportInput) {
        if let Some(node) = self.nodes.get(&id) {
            node.sink.post(input);
        }
    }

    fn identity(&self, id: u64) -> Option<PeerIdentity> {
        self.nodes.get(&id).map(|n| n.identity.clone())
    }

    /// Posts `PeerLost(id)` to every node browsing the service `id` advertises.
    fn announce_lost(&self, id: u64, service: &str) {
        let Some(lost) = self.identity(id) else {
            return;
        };
        for (other_id, node) in &self.nodes {
            if *other_id != id && node.browsing.as_deref() == Some(service) {
                node.sink
                    .discovery(DiscoveryEvent::PeerLost(lost.clone()));
            }
        }
    }

    /// Removes every session of `id`, telling the other side why.
    fn end_sessions(&mut self, id: u64, reason: DisconnectReason, notify_self: bool) {
        let ended: Vec<(u64, u64)> = self
            .sessions
            .iter()
            .filter(|(a, b)| *a == id || *b == id)
            .copied()
            .collect();
        for pair in ended {
            self.sessions.remove(&pair);
            let other = if pair.0 == id { pair.1 } else { pair.0 };
            if let Some(me) = self.identity(id) {
                self.post_to(
                    other,
                    TransportInput::Link(
                        TransportKind::PeerToPeer,
                        TransportEvent::PeerDisconnected(me, reason),
                    ),
                );
            }
            if notify_self {
                if let Some(them) = self.identity(other) {
                    self.post_to(
                        id,
                        TransportInput::Link(
                            TransportKind::PeerToPeer,
                            TransportEvent::PeerDisconnected(them, reason),
                        ),
                    );
                }
            }
        }
        self.invitations.retain(|(a, b)| *a != id && *b != id);
    }
}

fn session_key(a: u64, b: u64) -> (u64, u64) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Shared medium; clone freely.
#[derive(Clone)]
pub struct LoopbackMedium {
    inner: Arc<Mutex<MediumState>>,
}

impl Default for LoopbackMedium {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackMedium {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MediumState {
                nodes: HashMap::new(),
                sessions: HashSet::new(),
                invitations: HashSet::new(),
                path_available: true,
                path_watchers: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MediumState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attaches a device to the local peer network.
    pub fn peer_transport(&self, display_name: &str, sink: EventSink) -> LoopbackPeerTransport {
        let mut state = self.state();
        let id = state.allocate_id();
        let identity = PeerIdentity::new(id, display_name);
        state.nodes.insert(
            id,
            PeerNode {
                identity: identity.clone(),
                sink,
                advertising: None,
                browsing: None,
            },
        );
        LoopbackPeerTransport {
            medium: self.clone(),
            identity,
        }
    }

    pub fn path_monitor(&self, sink: EventSink) -> LoopbackPathMonitor {
        let id = self.state().allocate_id();
        LoopbackPathMonitor {
            medium: self.clone(),
            sink,
            id,
            running: false,
        }
    }

    /// Flips network availability. Losing the path drops every session and sighting.
    pub fn set_path_available(&self, available: bool) {
        let mut state = self.state();
        if state.path_available == available {
            return;
        }
        state.path_available = available;
        debug!("Loopback path available: {}", available);

        if !available {
            let ids: Vec<u64> = state.nodes.keys().copied().collect();
            for id in &ids {
                state.end_sessions(*id, DisconnectReason::NetworkUnavailable, false);
            }
            for id in ids {
                let service = state.nodes.get_mut(&id).and_then(|n| n.advertising.take());
                if let Some(service) = service {
                    state.announce_lost(id, &service);
                }
                if let Some(node) = state.nodes.get_mut(&id) {
                    node.browsing = None;
                }
            }
        }

        for sink in state.path_watchers.values() {
            sink.post(TransportInput::NetworkPath(available));
        }
    }

    /// A device walks out of range: sightings and sessions are lost.
    pub fn vanish(&self, peer: &PeerIdentity) {
        let mut state = self.state();
        let id = peer.id();
        state.end_sessions(id, DisconnectReason::PeerLost, false);
        if let Some(service) = state.nodes.get(&id).and_then(|n| n.advertising.clone()) {
            state.announce_lost(id, &service);
        }
        state.nodes.remove(&id);
    }

    pub fn session_count(&self) -> usize {
        self.state().sessions.len()
    }

    pub fn is_session(&self, a: &PeerIdentity, b: &PeerIdentity) -> bool {
        self.state().sessions.contains(&session_key(a.id(), b.id()))
    }
}

pub struct LoopbackPeerTransport {
    medium: LoopbackMedium,
    identity: PeerIdentity,
}

impl PeerTransport for LoopbackPeerTransport {
    fn is_supported(&self) -> bool {
        true
    }

    fn local_peer(&self) -> PeerIdentity {
        self.identity.clone()
    }

    fn start_advertising(&mut self, service_type: &str) {
        let mut state = self.medium.state();
        let id = self.identity.id();
        if !state.path_available {
            state.post_to(
                id,
                TransportInput::Discovery(DiscoveryEvent::AdvertisingFailed(
                    "network unavailable".to_string(),
                )),
            );
            return;
        }
        if let Some(node) = state.nodes.get_mut(&id) {
            node.advertising = Some(service_type.to_string());
        }
        for (other_id, node) in &state.nodes {
            if *other_id != id && node.browsing.as_deref() == Some(service_type) {
                node.sink.discovery(DiscoveryEvent::PeerSighted(
                    self.identity.clone(),
                    discovery_info(service_type),
                ));
            }
        }
    }

    fn stop_advertising(&mut self) {
        let mut state = self.medium.state();
        let id = self.identity.id();
        let service = state.nodes.get_mut(&id).and_then(|n| n.advertising.take());
        if let Some(service) = service {
            state.announce_lost(id, &service);
        }
    }

    fn start_browsing(&mut self, service_type: &str) {
        let mut state = self.medium.state();
        let id = self.identity.id();
        if !state.path_available {
            state.post_to(
                id,
                TransportInput::Discovery(DiscoveryEvent::BrowsingFailed(
                    "network unavailable".to_string(),
                )),
            );
            return;
        }
        let Some(node) = state.nodes.get_mut(&id) else {
            return;
        };
        node.browsing = Some(service_type.to_string());
        let sink = node.sink.clone();
        for (other_id, other) in &state.nodes {
            if *other_id != id && other.advertising.as_deref() == Some(service_type) {
                sink.discovery(DiscoveryEvent::PeerSighted(
                    other.identity.clone(),
                    discovery_info(service_type),
                ));
            }
        }
    }

    fn stop_browsing(&mut self) {
        if let Some(node) = self.medium.state().nodes.get_mut(&self.identity.id()) {
            node.browsing = None;
        }
    }

    fn invite(&mut self, peer: &PeerIdentity, timeout: Duration) -> Result<(), TransportError> {
        let mut state = self.medium.state();
        let (from, to) = (self.identity.id(), peer.id());
        let advertising = state
            .nodes
            .get(&to)
            .map(|n| n.advertising.is_some())
            .unwrap_or(false);
        if !advertising {
            return Err(TransportError::Rejected(format!("{} is not advertising", peer)));
        }
        trace!("{} invites {} (timeout {:?})", self.identity, peer, timeout);
        state.invitations.insert((from, to));
        state.post_to(
            to,
            TransportInput::Discovery(DiscoveryEvent::InvitationReceived(self.identity.clone())),
        );
        Ok(())
    }

    fn respond_to_invitation(&mut self, peer: &PeerIdentity, accept: bool) {
        let mut state = self.medium.state();
        let (me, inviter) = (self.identity.id(), peer.id());
        if !state.invitations.remove(&(inviter, me)) {
            debug!("No pending invitation from {}", peer);
            return;
        }

        if !accept {
            state.post_to(
                inviter,
                TransportInput::Link(
                    TransportKind::PeerToPeer,
                    TransportEvent::PeerDisconnected(self.identity.clone(), DisconnectReason::Declined),
                ),
            );
            return;
        }

        // Mutual invitations collapse into the one session.
        state.invitations.remove(&(me, inviter));
        if !state.sessions.insert(session_key(me, inviter)) {
            return;
        }
        state.post_to(
            me,
            TransportInput::Link(
                TransportKind::PeerToPeer,
                TransportEvent::PeerConnected(peer.clone()),
            ),
        );
        state.post_to(
            inviter,
            TransportInput::Link(
                TransportKind::PeerToPeer,
                TransportEvent::PeerConnected(self.identity.clone()),
            ),
        );
    }

    fn send(&mut self, peer: &PeerIdentity, payload: Vec<u8>) -> Result<(), TransportError> {
        let state = self.medium.state();
        if !state.sessions.contains(&session_key(self.identity.id(), peer.id())) {
            return Err(TransportError::NoSession);
        }
        state.post_to(
            peer.id(),
            TransportInput::Link(
                TransportKind::PeerToPeer,
                TransportEvent::DataReceived {
                    payload,
                    from: Some(self.identity.clone()),
                },
            ),
        );
        Ok(())
    }

    fn disconnect(&mut self) {
        self.medium
            .state()
            .end_sessions(self.identity.id(), DisconnectReason::PeerDisconnected, false);
    }
}

fn discovery_info(service_type: &str) -> DiscoveryInfo {
    DiscoveryInfo {
        metadata: BTreeMap::from([("service".to_string(), service_type.to_string())]),
    }
}

pub struct LoopbackPathMonitor {
    medium: LoopbackMedium,
    sink: EventSink,
    id: u64,
    running: bool,
}

impl NetworkPathMonitor for LoopbackPathMonitor {
    fn start(&mut self) {
        let mut state = self.medium.state();
        state.path_watchers.insert(self.id, self.sink.clone());
        self.running = true;
        // Like a real path monitor, report the current path right away.
        self.sink
            .post(TransportInput::NetworkPath(state.path_available));
    }

    fn cancel(&mut self) {
        if self.running {
            self.medium.state().path_watchers.remove(&self.id);
            self.running = false;
        }
    }
}

#[derive(Default)]
struct PairedSide {
    sink: Option<EventSink>,
    activated: bool,
}

struct PairedState {
    reachable: bool,
    sides: [PairedSide; 2],
}

impl PairedState {
    fn is_reachable(&self) -> bool {
        self.reachable && self.sides.iter().all(|s| s.sink.is_some() && s.activated)
    }
}

const WRIST: usize = 0;
const HANDHELD: usize = 1;

/// One simulated paired link between a wrist device and its handheld.
/// The two devices start in range.
#[derive(Clone)]
pub struct LoopbackPairedLink {
    inner: Arc<Mutex<PairedState>>,
}

impl Default for LoopbackPairedLink {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackPairedLink {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PairedState {
                reachable: true,
                sides: Default::default(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, PairedState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn wrist(&self, sink: EventSink) -> LoopbackPairedTransport {
        self.attach(WRIST, sink)
    }

    pub fn handheld(&self, sink: EventSink) -> LoopbackPairedTransport {
        self.attach(HANDHELD, sink)
    }

    fn attach(&self, side: usize, sink: EventSink) -> LoopbackPairedTransport {
        self.state().sides[side] = PairedSide {
            sink: Some(sink),
            activated: false,
        };
        LoopbackPairedTransport {
            link: self.clone(),
            side,
        }
    }

    /// Whether the two devices are in range of each other.
    pub fn set_in_range(&self, reachable: bool) {
        debug!("Loopback paired devices in range: {}", reachable);
        self.state().reachable = reachable;
    }
}

pub struct LoopbackPairedTransport {
    link: LoopbackPairedLink,
    side: usize,
}

impl PairedTransport for LoopbackPairedTransport {
    fn is_supported(&self) -> bool {
        true
    }

    fn activate_session(&mut self) {
        self.link.state().sides[self.side].activated = true;
    }

    fn is_reachable(&self) -> bool {
        self.link.state().is_reachable()
    }

    fn send(&mut self, payload: Vec<u8>) -> Result<(), TransportError> {
        let state = self.link.state();
        if !state.is_reachable() {
            return Err(TransportError::NotReachable);
        }
        let Some(sink) = &state.sides[1 - self.side].sink else {
            return Err(TransportError::NotReachable);
        };
        if !sink.link(
            TransportKind::Paired,
            TransportEvent::DataReceived {
                payload,
                from: None,
            },
        ) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn drain(rx: &mut UnboundedReceiver<TransportInput>) -> Vec<TransportInput> {
        let mut out = Vec::new();
        while let Ok(input) = rx.try_recv() {
            out.push(input);
        }
        out
    }

    #[test]
    fn browsers_see_advertisers() {
        let medium = LoopbackMedium::new();
        let (sink_a, mut rx_a) = EventSink::channel();
        let (sink_b, _rx_b) = EventSink::channel();
        let mut a = medium.peer_transport("Mac", sink_a);
        let mut b = medium.peer_transport("iPhone", sink_b);

        b.start_advertising("teleprompter");
        a.start_browsing("other-service");
        assert!(drain(&mut rx_a).is_empty());

        a.start_browsing("teleprompter");
        let events = drain(&mut rx_a);
        assert!(matches!(
            &events[..],
            [TransportInput::Discovery(DiscoveryEvent::PeerSighted(p, _))] if *p == b.local_peer()
        ));

        b.stop_advertising();
        assert_eq!(
            drain(&mut rx_a),
            vec![TransportInput::Discovery(DiscoveryEvent::PeerLost(b.local_peer()))]
        );
    }

    #[test]
    fn mutual_invitations_form_one_session() {
        let medium = LoopbackMedium::new();
        let (sink_a, mut rx_a) = EventSink::channel();
        let (sink_b, mut rx_b) = EventSink::channel();
        let mut a = medium.peer_transport("Mac", sink_a);
        let mut b = medium.peer_transport("iPhone", sink_b);
        a.start_advertising("teleprompter");
        b.start_advertising("teleprompter");

        a.invite(&b.local_peer(), Duration::from_secs(10)).unwrap();
        b.invite(&a.local_peer(), Duration::from_secs(10)).unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        b.respond_to_invitation(&a.local_peer(), true);
        a.respond_to_invitation(&b.local_peer(), true);
        assert_eq!(medium.session_count(), 1);
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[test]
    fn paired_send_requires_both_sides_and_range() {
        let (wrist_sink, _wrist_rx) = EventSink::channel();
        let (hand_sink, mut hand_rx) = EventSink::channel();
        let link = LoopbackPairedLink::new();
        let mut wrist = link.wrist(wrist_sink);
        let mut hand = link.handheld(hand_sink);

        wrist.activate_session();
        assert!(!wrist.is_reachable());
        assert_eq!(wrist.send(b"{}".to_vec()), Err(TransportError::NotReachable));

        hand.activate_session();
        assert!(wrist.is_reachable());
        wrist.send(b"{}".to_vec()).unwrap();
        assert_eq!(drain(&mut hand_rx).len(), 1);

        link.set_in_range(false);
        assert!(!hand.is_reachable());
    }
}
