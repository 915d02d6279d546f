//! Peer Session
//!
//! The peer-to-peer [`Link`] with everything that feeds it: discovery, the
//! invitation policy, network-path edges and local-network authorization.
//! Used by the intermediary and the display.
//!
//! ```text
//! activate ──▶ authorization ──granted──▶ setup_connections
//!                   │                      (advertise + browse + link.activate)
//!                   └──denied──▶ parked until refresh / request_authorization
//! ```

use crate::coordinator::discovery::{decide_invitation, DiscoveryCoordinator, InvitationDecision};
use crate::coordinator::status::EventReporter;
use crate::domain::errors::{LinkError, TransportError};
use crate::domain::link::{Link, LinkUpdate, TransportEvent};
use crate::domain::models::{
    AuthorizationState, DisconnectReason, LinkState, MessageSeverity, PeerIdentity, TransportKind,
};
use crate::domain::monitor::{LinkMonitor, PathEdge};
use crate::domain::settings::Settings;
use crate::infrastructure::authorization::LocalNetworkAuthorizer;
use crate::infrastructure::transport::{DiscoveryEvent, NetworkPathMonitor, PeerTransport};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PeerOptions {
    pub service_type: String,
    pub auto_invite: bool,
    pub invite_timeout: Duration,
    pub manual_invite_timeout: Duration,
}

impl PeerOptions {
    pub fn from_settings(settings: &Settings, auto_invite: bool) -> Self {
        Self {
            service_type: settings.service_type.clone(),
            auto_invite,
            invite_timeout: settings.invite_timeout(),
            manual_invite_timeout: settings.manual_invite_timeout(),
        }
    }
}

pub struct PeerSession {
    link: Link,
    transport: Box<dyn PeerTransport>,
    discovery: DiscoveryCoordinator,
    monitor: LinkMonitor,
    path: Box<dyn NetworkPathMonitor>,
    path_watching: bool,
    authorizer: Box<dyn LocalNetworkAuthorizer>,
    authorization: AuthorizationState,
    last_counterpart: Option<PeerIdentity>,
    unsupported_reported: bool,
    options: PeerOptions,
    events: EventReporter,
}

impl PeerSession {
    pub fn new(
        options: PeerOptions,
        transport: Box<dyn PeerTransport>,
        path: Box<dyn NetworkPathMonitor>,
        authorizer: Box<dyn LocalNetworkAuthorizer>,
        events: EventReporter,
    ) -> Self {
        let discovery = DiscoveryCoordinator::new(&options.service_type, transport.local_peer());
        Self {
            link: Link::new(TransportKind::PeerToPeer),
            transport,
            discovery,
            // Path edges are pushed; the interval is unused on this side.
            monitor: LinkMonitor::new(Duration::ZERO),
            path,
            path_watching: false,
            authorizer,
            authorization: AuthorizationState::Unknown,
            last_counterpart: None,
            unsupported_reported: false,
            options,
            events,
        }
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn local_peer(&self) -> &PeerIdentity {
        self.discovery.local()
    }

    pub fn discovery(&self) -> &DiscoveryCoordinator {
        &self.discovery
    }

    pub fn authorization(&self) -> AuthorizationState {
        self.authorization
    }

    pub fn activate(&mut self) {
        if !self.path_watching {
            self.path.start();
            self.path_watching = true;
        }
        match self.authorization {
            AuthorizationState::Granted => self.setup_connections(),
            AuthorizationState::Denied => {
                warn!("Local network access denied; waiting for the user to retry");
            }
            AuthorizationState::Pending => debug!("Authorization already requested"),
            AuthorizationState::Unknown => self.request_authorization(),
        }
    }

    pub fn request_authorization(&mut self) {
        info!("Requesting local network access");
        self.authorization = AuthorizationState::Pending;
        self.authorizer.request_authorization();
    }

    pub fn on_authorization(&mut self, granted: bool) {
        if granted {
            self.authorization = AuthorizationState::Granted;
            self.setup_connections();
            return;
        }
        self.authorization = AuthorizationState::Denied;
        self.discovery.stop(self.transport.as_mut());
        self.disconnect();
        self.events
            .log("Local network access denied", MessageSeverity::Error);
    }

    /// Advertise, browse and activate the link. Requires authorization.
    pub fn setup_connections(&mut self) {
        if self.authorization != AuthorizationState::Granted {
            debug!("setup_connections before authorization; ignored");
            return;
        }
        let supported = self.transport.is_supported();
        self.link.activate(supported);
        if !supported {
            if !self.unsupported_reported {
                self.unsupported_reported = true;
                self.events.log(
                    "Peer-to-peer transport is not supported on this device",
                    MessageSeverity::Error,
                );
            }
            return;
        }
        if !self.link.state().is_engaged() {
            self.discovery.start(self.transport.as_mut());
        }
    }

    /// Tear down discovery and the session, recreate the link, start over.
    pub fn refresh(&mut self) {
        info!("Refreshing peer-to-peer connections");
        self.discovery.stop(self.transport.as_mut());
        self.transport.disconnect();
        self.link = Link::new(TransportKind::PeerToPeer);
        self.discovery.clear();
        self.last_counterpart = None;

        if self.authorization == AuthorizationState::Granted {
            self.setup_connections();
        } else {
            self.request_authorization();
        }
    }

    /// Ends the active session; discovery keeps running.
    pub fn disconnect(&mut self) -> bool {
        if !self.link.state().is_engaged() {
            return false;
        }
        info!("Disconnecting peer session");
        self.transport.disconnect();
        self.end_session(DisconnectReason::PeerDisconnected);
        true
    }

    /// Manual invite from the UI.
    pub fn connect_to_peer(&mut self, peer: &PeerIdentity) -> Result<(), LinkError> {
        match self.authorization {
            AuthorizationState::Granted => {}
            AuthorizationState::Denied => return Err(LinkError::AuthorizationDenied),
            _ => return Err(LinkError::Unreachable(TransportKind::PeerToPeer)),
        }
        if !self.transport.is_supported() {
            return Err(LinkError::TransportUnsupported(TransportKind::PeerToPeer));
        }
        match (self.link.state(), self.link.counterpart()) {
            (LinkState::Idle, _) => return Err(LinkError::Unreachable(TransportKind::PeerToPeer)),
            (LinkState::Connected, Some(current)) if current == peer => return Ok(()),
            (LinkState::Connecting | LinkState::Connected, Some(current)) if current != peer => {
                warn!("Already engaged with {}; not inviting {}", current, peer);
                return Err(LinkError::Unreachable(TransportKind::PeerToPeer));
            }
            _ => {}
        }
        self.invite(peer, self.options.manual_invite_timeout);
        Ok(())
    }

    pub fn send(&mut self, payload: Vec<u8>) -> Result<(), LinkError> {
        let transport = &mut self.transport;
        self.link.send_payload(payload, |to, bytes| match to {
            Some(peer) => transport.send(peer, bytes),
            None => Err(TransportError::NoSession),
        })
    }

    /// Applies a transport event; returns any payload delivered to the owner.
    pub fn on_link_event(&mut self, event: TransportEvent) -> Option<Vec<u8>> {
        let counterpart = self.link.counterpart().cloned();
        match self.link.on_transport_event(event) {
            LinkUpdate::Transitioned { to, .. } => {
                self.on_transition(to, counterpart);
                None
            }
            LinkUpdate::Delivered { payload, .. } => Some(payload),
            LinkUpdate::DeliveryFailed(reason) => {
                self.events.alert(LinkError::SendFailed(reason));
                None
            }
            LinkUpdate::Unchanged | LinkUpdate::Dropped => None,
        }
    }

    pub fn on_discovery(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::PeerSighted(peer, info) => {
                if !self.discovery.is_browsing() {
                    debug!("Ignoring sighting of {} while not browsing", peer);
                    return;
                }
                let counterpart = self.link.counterpart().cloned();
                let added = self
                    .discovery
                    .on_peer_sighted(peer.clone(), info, counterpart.as_ref());
                // A sighting is an external edge, so it may revive a disconnected link.
                if added && self.options.auto_invite && !self.link.state().is_engaged() {
                    self.invite(&peer, self.options.invite_timeout);
                }
            }
            DiscoveryEvent::PeerLost(peer) => {
                self.discovery.on_peer_lost(&peer);
                if self.link.counterpart() == Some(&peer) {
                    self.on_link_event(TransportEvent::PeerDisconnected(
                        peer,
                        DisconnectReason::PeerLost,
                    ));
                }
            }
            DiscoveryEvent::InvitationReceived(peer) => self.on_invitation(peer),
            DiscoveryEvent::AdvertisingFailed(reason) => {
                self.discovery.on_advertising_failed(reason);
                self.events
                    .log("Failed to start advertising", MessageSeverity::Error);
            }
            DiscoveryEvent::BrowsingFailed(reason) => {
                self.discovery.on_browsing_failed(reason);
                self.events
                    .log("Failed to start browsing", MessageSeverity::Error);
            }
        }
    }

    pub fn on_network_path(&mut self, available: bool) {
        match self.monitor.observe_path(available) {
            PathEdge::BecameAvailable => {
                if self.authorization == AuthorizationState::Granted {
                    self.setup_connections();
                }
            }
            PathEdge::BecameUnavailable => {
                self.discovery.stop(self.transport.as_mut());
                if self.link.state().is_engaged() {
                    self.transport.disconnect();
                }
                self.end_session(DisconnectReason::NetworkUnavailable);
                self.events
                    .log("Check network connection", MessageSeverity::Warning);
            }
            PathEdge::Unchanged => {}
        }
    }

    /// Cancels the path subscription and every pending discovery request.
    pub fn teardown(&mut self) {
        if self.path_watching {
            self.path.cancel();
            self.path_watching = false;
        }
        self.discovery.stop(self.transport.as_mut());
        self.transport.disconnect();
        self.end_session(DisconnectReason::TornDown);
        self.discovery.clear();
    }

    pub fn status_line(&self) -> String {
        match self.authorization {
            AuthorizationState::Denied => return "Local network access denied".to_string(),
            AuthorizationState::Pending => {
                return "Waiting for local network access".to_string()
            }
            _ => {}
        }
        if self.monitor.path_available() == Some(false) {
            return "Check network connection".to_string();
        }

        let name = |peer: Option<&PeerIdentity>| {
            peer.map(|p| p.display_name().to_string()).unwrap_or_default()
        };
        match self.link.state() {
            LinkState::Idle => "Disconnected".to_string(),
            LinkState::Discovering => match self.discovery.failure() {
                Some(failure) => failure.status_text().to_string(),
                None => "Ready to connect".to_string(),
            },
            LinkState::Connecting => format!("Connecting to {}...", name(self.link.counterpart())),
            LinkState::Connected => format!("Connected to {}", name(self.link.counterpart())),
            LinkState::Disconnected(
                DisconnectReason::Declined | DisconnectReason::Refreshed | DisconnectReason::TornDown,
            ) => "Not Connected".to_string(),
            LinkState::Disconnected(_) => match &self.last_counterpart {
                Some(peer) => format!("Lost connection to {}", peer.display_name()),
                None => "Not Connected".to_string(),
            },
        }
    }

    fn on_invitation(&mut self, from: PeerIdentity) {
        let decision = decide_invitation(self.link.state(), self.link.counterpart(), &from);
        if decision == InvitationDecision::Reject {
            info!("Rejecting invitation from {} (link {})", from, self.link.state());
            self.transport.respond_to_invitation(&from, false);
            return;
        }

        info!("Accepting invitation from {}", from);
        if matches!(self.link.state(), LinkState::Disconnected(_)) && self.link.activate(true) {
            self.discovery.start(self.transport.as_mut());
        }
        self.on_link_event(TransportEvent::PeerFound(from.clone()));
        self.transport.respond_to_invitation(&from, true);
    }

    fn invite(&mut self, peer: &PeerIdentity, timeout: Duration) {
        if matches!(self.link.state(), LinkState::Disconnected(_)) && self.link.activate(true) {
            self.discovery.start(self.transport.as_mut());
        }
        if self.link.on_transport_event(TransportEvent::PeerFound(peer.clone())) == LinkUpdate::Dropped
        {
            debug!("Not inviting {} while {}", peer, self.link.state());
            return;
        }
        info!("Inviting {}", peer);
        if let Err(e) = self.transport.invite(peer, timeout) {
            warn!("Invitation to {} failed: {}", peer, e);
            self.on_link_event(TransportEvent::PeerDisconnected(
                peer.clone(),
                DisconnectReason::Declined,
            ));
        }
    }

    /// Drives the link to `Disconnected` for a locally decided reason.
    fn end_session(&mut self, reason: DisconnectReason) {
        if let Some(peer) = self.link.counterpart().cloned() {
            if self.link.state().is_engaged() {
                self.on_link_event(TransportEvent::PeerDisconnected(peer, reason));
            }
        }
    }

    fn on_transition(&mut self, to: LinkState, counterpart: Option<PeerIdentity>) {
        match to {
            LinkState::Connected => {
                if let Some(peer) = self.link.counterpart() {
                    self.discovery.peers_mut().promote(peer);
                    self.events
                        .log(format!("Connected to {}", peer.display_name()), MessageSeverity::Success);
                }
            }
            LinkState::Disconnected(reason) => {
                let Some(peer) = counterpart else {
                    return;
                };
                self.monitor.on_disconnected(&peer, self.discovery.peers_mut());
                let severity = match reason {
                    DisconnectReason::PeerLost
                    | DisconnectReason::Unreachable
                    | DisconnectReason::NetworkUnavailable => MessageSeverity::Warning,
                    _ => MessageSeverity::Info,
                };
                self.events.log(
                    format!("Disconnected from {} ({})", peer.display_name(), reason),
                    severity,
                );
                self.last_counterpart = Some(peer);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::testing;
    use crate::domain::models::AppEvent;
    use crate::infrastructure::authorization::FixedAuthorizer;
    use crate::infrastructure::transport::loopback::{LoopbackMedium, LoopbackPeerTransport};
    use crate::infrastructure::transport::{EventSink, TransportInput};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Loopback transport that counts discovery starts and can play unsupported.
    struct Counting {
        inner: LoopbackPeerTransport,
        supported: Arc<AtomicBool>,
        starts: Arc<AtomicUsize>,
    }

    impl PeerTransport for Counting {
        fn is_supported(&self) -> bool {
            self.supported.load(Ordering::SeqCst)
        }

        fn local_peer(&self) -> PeerIdentity {
            self.inner.local_peer()
        }

        fn start_advertising(&mut self, service_type: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.inner.start_advertising(service_type);
        }

        fn stop_advertising(&mut self) {
            self.inner.stop_advertising();
        }

        fn start_browsing(&mut self, service_type: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.inner.start_browsing(service_type);
        }

        fn stop_browsing(&mut self) {
            self.inner.stop_browsing();
        }

        fn invite(&mut self, peer: &PeerIdentity, timeout: Duration) -> Result<(), TransportError> {
            self.inner.invite(peer, timeout)
        }

        fn respond_to_invitation(&mut self, peer: &PeerIdentity, accept: bool) {
            self.inner.respond_to_invitation(peer, accept);
        }

        fn send(&mut self, peer: &PeerIdentity, payload: Vec<u8>) -> Result<(), TransportError> {
            self.inner.send(peer, payload)
        }

        fn disconnect(&mut self) {
            self.inner.disconnect();
        }
    }

    struct Rig {
        session: PeerSession,
        inbox: UnboundedReceiver<TransportInput>,
        events: UnboundedReceiver<AppEvent>,
        medium: LoopbackMedium,
        supported: Arc<AtomicBool>,
        starts: Arc<AtomicUsize>,
    }

    fn rig(granted: bool) -> Rig {
        let medium = LoopbackMedium::new();
        let (sink, inbox) = EventSink::channel();
        let (reporter, events) = EventReporter::channel();
        let supported = Arc::new(AtomicBool::new(true));
        let starts = Arc::new(AtomicUsize::new(0));
        let transport = Counting {
            inner: medium.peer_transport("iPad", sink.clone()),
            supported: supported.clone(),
            starts: starts.clone(),
        };
        let session = PeerSession::new(
            PeerOptions::from_settings(&testing::settings(), false),
            Box::new(transport),
            Box::new(medium.path_monitor(sink.clone())),
            Box::new(FixedAuthorizer::new(granted, sink)),
            reporter,
        );
        Rig {
            session,
            inbox,
            events,
            medium,
            supported,
            starts,
        }
    }

    fn session(granted: bool) -> (PeerSession, UnboundedReceiver<TransportInput>) {
        let rig = rig(granted);
        (rig.session, rig.inbox)
    }

    fn pump(session: &mut PeerSession, inbox: &mut UnboundedReceiver<TransportInput>) {
        while let Ok(input) = inbox.try_recv() {
            match input {
                TransportInput::Link(_, event) => {
                    session.on_link_event(event);
                }
                TransportInput::Discovery(event) => session.on_discovery(event),
                TransportInput::NetworkPath(available) => session.on_network_path(available),
                TransportInput::Authorization(granted) => session.on_authorization(granted),
            }
        }
    }

    #[test]
    fn manual_connect_is_gated_on_authorization() {
        let (mut session, mut inbox) = session(false);
        let target = PeerIdentity::new(1, "Stage Mac");
        assert_eq!(
            session.connect_to_peer(&target),
            Err(LinkError::Unreachable(TransportKind::PeerToPeer))
        );

        session.activate();
        assert_eq!(session.status_line(), "Waiting for local network access");
        pump(&mut session, &mut inbox);

        assert_eq!(session.authorization(), AuthorizationState::Denied);
        assert_eq!(
            session.connect_to_peer(&target),
            Err(LinkError::AuthorizationDenied)
        );

        session.refresh();
        assert_eq!(session.authorization(), AuthorizationState::Pending);
    }

    #[test]
    fn disconnect_without_a_session_is_a_no_op() {
        let (mut session, mut inbox) = session(true);
        session.activate();
        pump(&mut session, &mut inbox);

        assert_eq!(session.link().state(), LinkState::Discovering);
        assert!(session.discovery().is_advertising());
        assert_eq!(session.status_line(), "Ready to connect");
        assert!(!session.disconnect());

        session.teardown();
        assert!(!session.discovery().is_advertising());
    }

    #[test]
    fn activate_while_connected_does_not_restart_discovery() {
        let mut rig = rig(true);
        rig.session.activate();
        pump(&mut rig.session, &mut rig.inbox);
        assert_eq!(rig.starts.load(Ordering::SeqCst), 2);

        let (phone_sink, mut phone_inbox) = EventSink::channel();
        let mut phone = rig.medium.peer_transport("iPhone", phone_sink);
        phone
            .invite(rig.session.local_peer(), Duration::from_secs(10))
            .unwrap();
        pump(&mut rig.session, &mut rig.inbox);
        assert_eq!(rig.session.link().state(), LinkState::Connected);
        assert_eq!(rig.session.link().counterpart(), Some(&phone.local_peer()));
        while phone_inbox.try_recv().is_ok() {}

        for _ in 0..3 {
            rig.session.activate();
            rig.session.setup_connections();
            pump(&mut rig.session, &mut rig.inbox);
        }
        assert_eq!(rig.starts.load(Ordering::SeqCst), 2);
        assert_eq!(rig.session.link().state(), LinkState::Connected);
        assert!(rig.medium.is_session(rig.session.local_peer(), &phone.local_peer()));
    }

    #[test]
    fn unsupported_transport_is_reported_once() {
        let mut rig = rig(true);
        rig.supported.store(false, Ordering::SeqCst);
        rig.session.activate();
        pump(&mut rig.session, &mut rig.inbox);

        // Path edges and refreshes retry setup without repeating the report.
        rig.medium.set_path_available(false);
        rig.medium.set_path_available(true);
        pump(&mut rig.session, &mut rig.inbox);
        rig.session.refresh();
        rig.session.refresh();

        assert_eq!(rig.session.link().state(), LinkState::Idle);
        assert_eq!(rig.starts.load(Ordering::SeqCst), 0);
        let mut reported = 0;
        while let Ok(event) = rig.events.try_recv() {
            if let AppEvent::LogMessage(m) = event {
                if m.message.contains("not supported") {
                    reported += 1;
                }
            }
        }
        assert_eq!(reported, 1);
    }
}
