//! Status Surface
//!
//! Two outputs per endpoint: a push-updated [`StatusSnapshot`] on a `watch`
//! channel and a stream of discrete [`AppEvent`]s for alerts and log lines.

use crate::domain::errors::LinkError;
use crate::domain::models::{AppEvent, MessageSeverity, StatusMessage, StatusSnapshot};
use tokio::sync::{mpsc, watch};
use tracing::trace;

/// Publishes snapshots; owned by the endpoint's runtime task.
pub struct StatusSurface {
    published: watch::Sender<StatusSnapshot>,
}

impl StatusSurface {
    pub fn new(initial: StatusSnapshot) -> (Self, watch::Receiver<StatusSnapshot>) {
        let (published, rx) = watch::channel(initial);
        (Self { published }, rx)
    }

    /// Returns true if the snapshot differed from the last one published.
    pub fn publish(&self, snapshot: StatusSnapshot) -> bool {
        self.published.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            trace!("Status: {}", snapshot.status);
            *current = snapshot;
            true
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.published.subscribe()
    }
}

/// Sends alerts, log lines and cursor moves to the UI layer.
#[derive(Clone)]
pub struct EventReporter {
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl EventReporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AppEvent>) {
        let (event_sender, rx) = mpsc::unbounded_channel();
        (Self { event_sender }, rx)
    }

    pub fn alert(&self, error: LinkError) {
        let _ = self.event_sender.send(AppEvent::Alert(error));
    }

    pub fn log(&self, message: impl Into<String>, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.into(),
            severity,
        }));
    }

    pub fn section_changed(&self, index: usize) {
        let _ = self.event_sender.send(AppEvent::SectionChanged(index));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TransportKind;

    #[test]
    fn publishes_only_changes() {
        let (surface, mut rx) = StatusSurface::new(StatusSnapshot::default());
        assert!(!surface.publish(StatusSnapshot::default()));
        assert!(!rx.has_changed().unwrap());

        let connected = StatusSnapshot {
            status: "Connected".to_string(),
            paired_reachable: true,
            ..StatusSnapshot::default()
        };
        assert!(surface.publish(connected.clone()));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), connected);
    }

    #[test]
    fn reporter_survives_a_dropped_receiver() {
        let (reporter, rx) = EventReporter::channel();
        drop(rx);
        reporter.alert(LinkError::Unreachable(TransportKind::Paired));
        reporter.log("still fine", MessageSeverity::Info);
    }
}
