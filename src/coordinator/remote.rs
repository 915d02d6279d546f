//! Remote Endpoint
//!
//! Wrist role: one paired session to the intermediary, no discovery.

use crate::coordinator::paired::PairedSession;
use crate::coordinator::runtime::Endpoint;
use crate::coordinator::status::EventReporter;
use crate::domain::command::{Command, CommandEnvelope, PairedMessage, PairedReply, Sequencer};
use crate::domain::errors::LinkError;
use crate::domain::models::{MessageSeverity, StatusSnapshot, TransportKind};
use crate::infrastructure::transport::TransportInput;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct RemoteEndpoint {
    paired: PairedSession,
    sequencer: Sequencer,
    events: EventReporter,
}

impl RemoteEndpoint {
    pub fn new(paired: PairedSession, events: EventReporter) -> Self {
        Self {
            paired,
            sequencer: Sequencer::fresh(),
            events,
        }
    }

    pub fn paired(&self) -> &PairedSession {
        &self.paired
    }

    fn on_paired_payload(&mut self, payload: &[u8]) {
        match PairedMessage::decode(payload) {
            Ok(PairedMessage::Reply(PairedReply::Status(status))) => {
                debug!("Intermediary acknowledged: {}", status);
            }
            Ok(PairedMessage::Reply(PairedReply::Error(error))) => {
                debug!("Intermediary refused command: {}", error);
                self.events
                    .log(format!("Command refused: {}", error), MessageSeverity::Warning);
            }
            Ok(PairedMessage::Command(envelope)) => {
                debug!("Display sent {}", envelope.command);
            }
            Err(e) => warn!("Dropping undecodable paired payload: {}", e),
        }
    }
}

impl Endpoint for RemoteEndpoint {
    fn name(&self) -> &str {
        "remote"
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
            other => warn!("Remote has no use for {:?}", other),
        }
    }

    fn on_poll(&mut self) {
        self.paired.poll();
    }

    fn activate(&mut self) {
        self.paired.activate();
    }

    fn refresh(&mut self) {
        info!("Reconnecting paired session");
        self.paired.refresh();
    }

    fn send_command(&mut self, command: Command) -> Result<(), LinkError> {
        let envelope = CommandEnvelope::stamped(command, self.sequencer.next_stamp());
        self.paired.send(envelope.encode()).map_err(|e| {
            if e.is_alert() {
                self.events.alert(e.clone());
            }
            e
        })
    }

    fn snapshot(&self) -> StatusSnapshot {
        let connected = self.paired.link().state().is_connected();
        StatusSnapshot {
            status: if connected { "Connected" } else { "Not Connected" }.to_string(),
            paired_reachable: self.paired.link().is_reachable(),
            ..StatusSnapshot::default()
        }
    }

    fn teardown(&mut self) {
        self.paired.teardown();
    }
}
