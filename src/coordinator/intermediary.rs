//! Intermediary Endpoint
//!
//! Handheld role and the only one with two links: the paired session to the
//! remote and a peer-to-peer session to the display. Commands arriving on
//! either link are relayed onto the other.

use crate::coordinator::paired::PairedSession;
use crate::coordinator::peer::PeerSession;
use crate::coordinator::relay::{CommandRelay, RelayOutcome, RoutingTable};
use crate::coordinator::runtime::Endpoint;
use crate::coordinator::status::EventReporter;
use crate::domain::command::{Command, CommandEnvelope, PairedMessage, PairedReply, Sequencer};
use crate::domain::errors::LinkError;
use crate::domain::models::{MessageSeverity, PeerIdentity, StatusSnapshot, TransportKind};
use crate::infrastructure::transport::TransportInput;
use std::time::Duration;
use tracing::{debug, warn};

pub struct IntermediaryEndpoint {
    paired: PairedSession,
    peer: PeerSession,
    relay: CommandRelay,
    sequencer: Sequencer,
    events: EventReporter,
}

impl IntermediaryEndpoint {
    pub fn new(paired: PairedSession, peer: PeerSession, events: EventReporter) -> Self {
        Self {
            paired,
            peer,
            relay: CommandRelay::new(RoutingTable::bidirectional(
                TransportKind::Paired,
                TransportKind::PeerToPeer,
            )),
            sequencer: Sequencer::fresh(),
            events,
        }
    }

    pub fn paired(&self) -> &PairedSession {
        &self.paired
    }

    pub fn peer(&self) -> &PeerSession {
        &self.peer
    }

    pub fn relay(&self) -> &CommandRelay {
        &self.relay
    }

    fn on_paired_payload(&mut self, payload: &[u8]) {
        if let Ok(PairedMessage::Reply(reply)) = PairedMessage::decode(payload) {
            debug!("Remote replied {:?}", reply);
            return;
        }

        let outcome = self.forward(TransportKind::Paired, payload);
        let reply = if outcome.accepted() {
            PairedReply::accepted()
        } else {
            PairedReply::invalid_command()
        };
        if let Err(e) = self.paired.send(reply.encode()) {
            debug!("Could not acknowledge remote: {}", e);
        }
    }

    fn forward(&mut self, from: TransportKind, payload: &[u8]) -> RelayOutcome {
        let paired = &mut self.paired;
        let peer = &mut self.peer;
        let outcome = self.relay.relay(from, payload, |to, envelope| match to {
            TransportKind::Paired => paired.send(envelope.encode()),
            TransportKind::PeerToPeer => peer.send(envelope.encode()),
        });
        if let RelayOutcome::Undeliverable(command, e) = &outcome {
            self.events.log(
                format!("Could not relay {}: {}", command, e),
                MessageSeverity::Warning,
            );
        }
        outcome
    }
}

impl Endpoint for IntermediaryEndpoint {
    fn name(&self) -> &str {
        "intermediary"
    }

    fn poll_interval(&self) -> Option<Duration> {
        Some(self.paired.poll_interval())
    }

    fn on_transport(&mut self, input: TransportInput) {
        match input {
            TransportInput::Link(TransportKind::Paired, event) => {
                if let Some(payload) = self.paired.on_link_event(event) {
                    self.on_paired_payload(&payload);
                }
            }
            TransportInput::Link(TransportKind::PeerToPeer, event) => {
                if let Some(payload) = self.peer.on_link_event(event) {
                    self.forward(TransportKind::PeerToPeer, &payload);
                }
            }
            TransportInput::Discovery(event) => self.peer.on_discovery(event),
            TransportInput::NetworkPath(available) => self.peer.on_network_path(available),
            TransportInput::Authorization(granted) => self.peer.on_authorization(granted),
        }
    }

    fn on_poll(&mut self) {
        self.paired.poll();
    }

    fn activate(&mut self) {
        self.paired.activate();
        self.peer.activate();
    }

    fn refresh(&mut self) {
        self.peer.refresh();
    }

    fn request_authorization(&mut self) {
        self.peer.request_authorization();
    }

    fn disconnect(&mut self) {
        self.peer.disconnect();
    }

    fn connect_to_peer(&mut self, peer: &PeerIdentity) -> Result<(), LinkError> {
        self.peer.connect_to_peer(peer)
    }

    /// Commands from the handheld's own controls go straight to the display.
    fn send_command(&mut self, command: Command) -> Result<(), LinkError> {
        let envelope = CommandEnvelope::stamped(command, self.sequencer.next_stamp());
        self.peer.send(envelope.encode()).map_err(|e| {
            if e.is_alert() {
                warn!("Send to display failed: {}", e);
                self.events.alert(e.clone());
            }
            e
        })
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: self.peer.status_line(),
            paired_reachable: self.paired.link().is_reachable(),
            peer_connected: self.peer.link().state().is_connected(),
            advertising: self.peer.discovery().is_advertising(),
            discoverable_peers: self.peer.discovery().peers().peers(),
            authorization: self.peer.authorization(),
        }
    }

    fn teardown(&mut self) {
        self.peer.teardown();
        self.paired.teardown();
    }
}
