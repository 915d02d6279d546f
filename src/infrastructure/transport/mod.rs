//! Transport Module
//!
//! Platform seams for the two link kinds.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   ┌──────────────────┐   ┌───────────────────┐
//! │ PairedTransport  │   │  PeerTransport   │   │ NetworkPathMonitor│
//! │ - session        │   │ - advertise      │   │ - path edges      │
//! │ - reachability   │   │ - browse/invite  │   │                   │
//! │ - send           │   │ - send           │   │                   │
//! └────────┬─────────┘   └────────┬─────────┘   └─────────┬─────────┘
//!          │                      │                       │
//!          └───────────── EventSink (tagged) ─────────────┘
//!                                 │
//!                                 ▼
//!                  one serialized queue per endpoint
//! ```
//!
//! Transports never touch endpoint state. Everything they observe is posted
//! through an [`EventSink`] as a [`TransportInput`].
//!
//! ## Modules
//!
//! - [`loopback`] - in-process medium connecting any number of endpoints

pub mod loopback;

use crate::domain::errors::TransportError;
use crate::domain::link::TransportEvent;
use crate::domain::models::{PeerIdentity, TransportKind};
use crate::domain::peers::DiscoveryInfo;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Events produced by advertising and browsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    PeerSighted(PeerIdentity, DiscoveryInfo),
    PeerLost(PeerIdentity),
    InvitationReceived(PeerIdentity),
    AdvertisingFailed(String),
    BrowsingFailed(String),
}

/// Everything a transport-side source can post to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportInput {
    Link(TransportKind, TransportEvent),
    Discovery(DiscoveryEvent),
    NetworkPath(bool),
    Authorization(bool),
}

/// Posts transport inputs into an endpoint's queue.
#[derive(Clone)]
pub struct EventSink {
    deliver: Arc<dyn Fn(TransportInput) -> bool + Send + Sync>,
}

impl EventSink {
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(TransportInput) -> bool + Send + Sync + 'static,
    {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// A sink backed by a plain channel, for driving endpoints by hand.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransportInput>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(move |input| tx.send(input).is_ok()), rx)
    }

    /// Returns false once the receiving endpoint is gone.
    pub fn post(&self, input: TransportInput) -> bool {
        (self.deliver)(input)
    }

    pub fn link(&self, kind: TransportKind, event: TransportEvent) -> bool {
        self.post(TransportInput::Link(kind, event))
    }

    pub fn discovery(&self, event: DiscoveryEvent) -> bool {
        self.post(TransportInput::Discovery(event))
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// OS-managed link between the wrist device and its handheld.
pub trait PairedTransport: Send {
    fn is_supported(&self) -> bool;

    /// Asynchronous request to bring the session up.
    fn activate_session(&mut self);

    /// Current reachability; sampled by the poller.
    fn is_reachable(&self) -> bool;

    /// Fire-and-forget hand-off. Late failures arrive as `DeliveryFailed`.
    fn send(&mut self, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Discovery-based local link.
pub trait PeerTransport: Send {
    fn is_supported(&self) -> bool;

    fn local_peer(&self) -> PeerIdentity;

    fn start_advertising(&mut self, service_type: &str);

    fn stop_advertising(&mut self);

    fn start_browsing(&mut self, service_type: &str);

    fn stop_browsing(&mut self);

    fn invite(&mut self, peer: &PeerIdentity, timeout: Duration) -> Result<(), TransportError>;

    fn respond_to_invitation(&mut self, peer: &PeerIdentity, accept: bool);

    fn send(&mut self, peer: &PeerIdentity, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Ends every session this device takes part in.
    fn disconnect(&mut self);
}

/// Push-based network path availability.
pub trait NetworkPathMonitor: Send {
    fn start(&mut self);

    /// After this returns no further path events are posted.
    fn cancel(&mut self);
}
