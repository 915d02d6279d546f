//! Paired Session
//!
//! The paired [`Link`] together with its transport and the reachability
//! poller. Used by the remote and the intermediary.

use crate::coordinator::status::EventReporter;
use crate::domain::errors::LinkError;
use crate::domain::link::{Link, LinkUpdate, TransportEvent};
use crate::domain::models::{LinkState, MessageSeverity, TransportKind};
use crate::domain::monitor::LinkMonitor;
use crate::infrastructure::transport::PairedTransport;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct PairedSession {
    link: Link,
    transport: Box<dyn PairedTransport>,
    monitor: LinkMonitor,
    unsupported_reported: bool,
    events: EventReporter,
}

impl PairedSession {
    pub fn new(
        transport: Box<dyn PairedTransport>,
        poll_interval: Duration,
        events: EventReporter,
    ) -> Self {
        Self {
            link: Link::new(TransportKind::Paired),
            transport,
            monitor: LinkMonitor::new(poll_interval),
            unsupported_reported: false,
            events,
        }
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn poll_interval(&self) -> Duration {
        self.monitor.poll_interval()
    }

    pub fn activate(&mut self) {
        let supported = self.transport.is_supported();
        if self.link.activate(supported) {
            info!("Activating paired session");
            self.transport.activate_session();
            // Reachability seen before activation must be reported again.
            self.monitor.reset_paired();
        } else if !supported && !self.unsupported_reported {
            self.unsupported_reported = true;
            self.events.log(
                "Paired transport is not supported on this device",
                MessageSeverity::Error,
            );
        }
    }

    /// Re-activates the session only when the counterpart is out of reach.
    pub fn refresh(&mut self) {
        if self.transport.is_reachable() {
            debug!("Paired counterpart reachable; refresh ignored");
            return;
        }
        if matches!(self.link.state(), LinkState::Idle | LinkState::Disconnected(_)) {
            self.activate();
        } else {
            info!("Re-requesting paired session");
            self.transport.activate_session();
        }
    }

    /// One reachability sample. Returns true if it changed anything.
    pub fn poll(&mut self) -> bool {
        let reachable = self.transport.is_reachable();
        let Some(flipped) = self.monitor.observe_paired(reachable) else {
            return false;
        };

        if flipped && matches!(self.link.state(), LinkState::Disconnected(_)) {
            self.link.activate(true);
        }
        self.link
            .on_transport_event(TransportEvent::ReachabilityChanged(flipped));

        if flipped {
            self.events.log("Paired device reachable", MessageSeverity::Info);
        } else {
            self.events
                .log("Paired device unreachable", MessageSeverity::Warning);
        }
        true
    }

    /// Applies a transport event; returns any payload delivered to the owner.
    pub fn on_link_event(&mut self, event: TransportEvent) -> Option<Vec<u8>> {
        match self.link.on_transport_event(event) {
            LinkUpdate::Delivered { payload, .. } => Some(payload),
            LinkUpdate::DeliveryFailed(reason) => {
                self.events.alert(LinkError::SendFailed(reason));
                None
            }
            _ => None,
        }
    }

    pub fn send(&mut self, payload: Vec<u8>) -> Result<(), LinkError> {
        let transport = &mut self.transport;
        self.link
            .send_payload(payload, |_, bytes| transport.send(bytes))
    }

    pub fn teardown(&mut self) {
        if self.link.state().is_connected() {
            warn!("Tearing down a connected paired session");
        }
        self.link = Link::new(TransportKind::Paired);
        self.monitor.reset_paired();
    }
}
