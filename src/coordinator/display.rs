//! Display Endpoint
//!
//! Primary-display role: advertises and browses, holds at most one peer
//! session and applies received commands to the script collaborator. The
//! cursor and the duplicate filter outlive any session.

use crate::coordinator::peer::PeerSession;
use crate::coordinator::runtime::Endpoint;
use crate::coordinator::status::EventReporter;
use crate::domain::command::{Command, CommandEnvelope, DuplicateFilter, Sequencer};
use crate::domain::cursor::{ScriptCollaborator, SectionCursor};
use crate::domain::errors::LinkError;
use crate::domain::models::{PeerIdentity, StatusSnapshot, TransportKind};
use crate::infrastructure::transport::TransportInput;
use tracing::{debug, info, warn};

pub struct DisplayEndpoint<C: ScriptCollaborator = SectionCursor> {
    peer: PeerSession,
    collaborator: C,
    filter: DuplicateFilter,
    sequencer: Sequencer,
    events: EventReporter,
}

impl<C: ScriptCollaborator> DisplayEndpoint<C> {
    pub fn new(peer: PeerSession, collaborator: C, events: EventReporter) -> Self {
        Self {
            peer,
            collaborator,
            filter: DuplicateFilter::default(),
            sequencer: Sequencer::fresh(),
            events,
        }
    }

    pub fn peer(&self) -> &PeerSession {
        &self.peer
    }

    pub fn collaborator(&self) -> &C {
        &self.collaborator
    }

    fn on_peer_payload(&mut self, payload: &[u8]) {
        let envelope = match CommandEnvelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping undecodable command: {}", e);
                return;
            }
        };
        if !self.filter.admit(envelope.stamp) {
            debug!("Dropping stale {} {:?}", envelope.command, envelope.stamp);
            return;
        }
        let index = self.collaborator.apply_command(&envelope.command);
        info!("Applied {}; section {}", envelope.command, index);
        self.events.section_changed(index);
    }
}

impl<C: ScriptCollaborator + 'static> Endpoint for DisplayEndpoint<C> {
    fn name(&self) -> &str {
        "display"
    }

    fn on_transport(&mut self, input: TransportInput) {
        match input {
            TransportInput::Link(TransportKind::PeerToPeer, event) => {
                if let Some(payload) = self.peer.on_link_event(event) {
                    self.on_peer_payload(&payload);
                }
            }
            TransportInput::Link(TransportKind::Paired, event) => {
                warn!("Display has no paired link; dropping {:?}", event);
            }
            TransportInput::Discovery(event) => self.peer.on_discovery(event),
            TransportInput::NetworkPath(available) => self.peer.on_network_path(available),
            TransportInput::Authorization(granted) => self.peer.on_authorization(granted),
        }
    }

    fn activate(&mut self) {
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

    /// Sends back towards the remote through the intermediary.
    fn send_command(&mut self, command: Command) -> Result<(), LinkError> {
        let envelope = CommandEnvelope::stamped(command, self.sequencer.next_stamp());
        self.peer.send(envelope.encode()).map_err(|e| {
            if e.is_alert() {
                self.events.alert(e.clone());
            }
            e
        })
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: self.peer.status_line(),
            paired_reachable: false,
            peer_connected: self.peer.link().state().is_connected(),
            advertising: self.peer.discovery().is_advertising(),
            discoverable_peers: self.peer.discovery().peers().peers(),
            authorization: self.peer.authorization(),
        }
    }

    fn teardown(&mut self) {
        self.peer.teardown();
    }
}
