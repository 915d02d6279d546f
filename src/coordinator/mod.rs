//! Coordinator Module
//!
//! Role wiring on top of the domain state machines.
//!
//! ## Architecture
//!
//! ```text
//!  RemoteEndpoint ──paired──▶ IntermediaryEndpoint ──peer-to-peer──▶ DisplayEndpoint
//!   PairedSession             PairedSession + PeerSession            PeerSession
//!                             CommandRelay                           ScriptCollaborator
//! ```
//!
//! ## Modules
//!
//! - [`status`] - snapshot publishing and alert/log events
//! - [`discovery`] - PeerSet upkeep and the invitation policy
//! - [`relay`] - routing table and command forwarding
//! - [`paired`] / [`peer`] - one link plus everything that drives it
//! - [`remote`], [`intermediary`], [`display`] - the three roles
//! - [`runtime`] - per-endpoint task, queue, ticker and handle

pub mod discovery;
pub mod display;
pub mod intermediary;
pub mod paired;
pub mod peer;
pub mod relay;
pub mod remote;
pub mod runtime;
pub mod status;

pub use display::DisplayEndpoint;
pub use intermediary::IntermediaryEndpoint;
pub use remote::RemoteEndpoint;
pub use runtime::{Endpoint, EndpointHandle};

/// Builders that drive endpoints by hand over the loopback medium.
#[cfg(test)]
pub(crate) mod testing {
    use super::paired::PairedSession;
    use super::peer::{PeerOptions, PeerSession};
    use super::status::EventReporter;
    use super::{DisplayEndpoint, Endpoint, IntermediaryEndpoint, RemoteEndpoint};
    use crate::domain::cursor::SectionCursor;
    use crate::domain::models::AppEvent;
    use crate::domain::settings::Settings;
    use crate::infrastructure::authorization::FixedAuthorizer;
    use crate::infrastructure::transport::loopback::{LoopbackMedium, LoopbackPairedLink};
    use crate::infrastructure::transport::{EventSink, TransportInput};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    pub fn settings() -> Settings {
        Settings {
            reachability_poll_interval_ms: 10,
            ..Settings::default()
        }
    }

    pub struct Node<E> {
        pub endpoint: E,
        pub inbox: UnboundedReceiver<TransportInput>,
        pub events: UnboundedReceiver<AppEvent>,
        pub authorization: Option<Arc<AtomicBool>>,
    }

    impl<E: Endpoint> Node<E> {
        /// Applies everything queued so far; returns how many inputs ran.
        pub fn pump(&mut self) -> usize {
            let mut applied = 0;
            while let Ok(input) = self.inbox.try_recv() {
                self.endpoint.on_transport(input);
                applied += 1;
            }
            applied
        }

        pub fn drain_events(&mut self) -> Vec<AppEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }
    }

    pub trait Pump {
        fn pump(&mut self) -> usize;
    }

    impl<E: Endpoint> Pump for Node<E> {
        fn pump(&mut self) -> usize {
            Node::pump(self)
        }
    }

    /// Pumps every node until no queue has anything left.
    pub fn settle(nodes: &mut [&mut dyn Pump]) {
        for _ in 0..1000 {
            let applied: usize = nodes.iter_mut().map(|n| n.pump()).sum();
            if applied == 0 {
                return;
            }
        }
        panic!("endpoints never settled");
    }

    fn peer_session(
        medium: &LoopbackMedium,
        name: &str,
        auto_invite: bool,
        authorizer: FixedAuthorizer,
        sink: &EventSink,
        events: &EventReporter,
    ) -> PeerSession {
        PeerSession::new(
            PeerOptions::from_settings(&settings(), auto_invite),
            Box::new(medium.peer_transport(name, sink.clone())),
            Box::new(medium.path_monitor(sink.clone())),
            Box::new(authorizer),
            events.clone(),
        )
    }

    pub fn display(medium: &LoopbackMedium, sections: &[&str], granted: bool) -> Node<DisplayEndpoint> {
        let (sink, inbox) = EventSink::channel();
        let (reporter, events) = EventReporter::channel();
        let authorizer = FixedAuthorizer::new(granted, sink.clone());
        let answer = authorizer.answer();
        let peer = peer_session(medium, "Stage Mac", false, authorizer, &sink, &reporter);
        let cursor = SectionCursor::new(sections.iter().map(|s| s.to_string()).collect());
        Node {
            endpoint: DisplayEndpoint::new(peer, cursor, reporter),
            inbox,
            events,
            authorization: Some(answer),
        }
    }

    pub fn intermediary(
        medium: &LoopbackMedium,
        paired: &LoopbackPairedLink,
        granted: bool,
    ) -> Node<IntermediaryEndpoint> {
        let (sink, inbox) = EventSink::channel();
        let (reporter, events) = EventReporter::channel();
        let authorizer = FixedAuthorizer::new(granted, sink.clone());
        let answer = authorizer.answer();
        let peer = peer_session(medium, "iPhone", true, authorizer, &sink, &reporter);
        let paired = PairedSession::new(
            Box::new(paired.handheld(sink.clone())),
            settings().poll_interval(),
            reporter.clone(),
        );
        Node {
            endpoint: IntermediaryEndpoint::new(paired, peer, reporter),
            inbox,
            events,
            authorization: Some(answer),
        }
    }

    pub fn remote(paired: &LoopbackPairedLink) -> Node<RemoteEndpoint> {
        let (sink, inbox) = EventSink::channel();
        let (reporter, events) = EventReporter::channel();
        let paired = PairedSession::new(
            Box::new(paired.wrist(sink)),
            settings().poll_interval(),
            reporter.clone(),
        );
        Node {
            endpoint: RemoteEndpoint::new(paired, reporter),
            inbox,
            events,
            authorization: None,
        }
    }

    /// All three roles on one medium, activated and settled.
    pub struct Trio {
        pub medium: LoopbackMedium,
        pub paired: LoopbackPairedLink,
        pub remote: Node<RemoteEndpoint>,
        pub intermediary: Node<IntermediaryEndpoint>,
        pub display: Node<DisplayEndpoint>,
    }

    impl Trio {
        pub fn connected(sections: &[&str]) -> Self {
            let medium = LoopbackMedium::new();
            let paired = LoopbackPairedLink::new();
            let mut trio = Self {
                remote: remote(&paired),
                intermediary: intermediary(&medium, &paired, true),
                display: display(&medium, sections, true),
                medium,
                paired,
            };
            trio.remote.endpoint.activate();
            trio.intermediary.endpoint.activate();
            trio.display.endpoint.activate();
            trio.settle();
            trio.poll();
            trio
        }

        pub fn settle(&mut self) {
            settle(&mut [
                &mut self.remote as &mut dyn Pump,
                &mut self.intermediary,
                &mut self.display,
            ]);
        }

        /// One reachability tick on both paired roles.
        pub fn poll(&mut self) {
            self.remote.endpoint.on_poll();
            self.intermediary.endpoint.on_poll();
            self.settle();
        }
    }
}
