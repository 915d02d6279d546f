use crate::domain::errors::LinkError;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A discoverable peer-to-peer endpoint.
///
/// Equality, ordering and hashing use only the transport-assigned id; two
/// peers may advertise the same display name.
#[derive(Debug, Clone)]
pub struct PeerIdentity {
    id: u64,
    display_name: String,
}

impl PeerIdentity {
    pub fn new(id: u64, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl PartialEq for PeerIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerIdentity {}

impl Hash for PeerIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for PeerIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeerIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:x}", self.display_name, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// OS-managed one-to-one link between the wrist device and its handheld.
    Paired,
    /// Ad-hoc, discovery-based local link.
    PeerToPeer,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Paired => write!(f, "paired"),
            TransportKind::PeerToPeer => write!(f, "peer-to-peer"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Discovery lost sight of the counterpart.
    PeerLost,
    /// The counterpart (or the local user) ended the session.
    PeerDisconnected,
    /// An invitation was declined or timed out.
    Declined,
    /// Paired reachability dropped.
    Unreachable,
    NetworkUnavailable,
    Refreshed,
    TornDown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DisconnectReason::PeerLost => "peer lost",
            DisconnectReason::PeerDisconnected => "peer disconnected",
            DisconnectReason::Declined => "invitation declined",
            DisconnectReason::Unreachable => "unreachable",
            DisconnectReason::NetworkUnavailable => "network unavailable",
            DisconnectReason::Refreshed => "refreshed",
            DisconnectReason::TornDown => "torn down",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Discovering,
    Connecting,
    Connected,
    Disconnected(DisconnectReason),
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }

    /// Connecting or connected: the link already has a counterpart.
    pub fn is_engaged(&self) -> bool {
        matches!(self, LinkState::Connecting | LinkState::Connected)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Idle => write!(f, "idle"),
            LinkState::Discovering => write!(f, "discovering"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
            LinkState::Disconnected(reason) => write!(f, "disconnected ({})", reason),
        }
    }
}

/// Local-network permission as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthorizationState {
    #[default]
    Unknown,
    Pending,
    Granted,
    /// Terminal until the user retries.
    Denied,
}

/// Read-only view published to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub status: String,
    pub paired_reachable: bool,
    pub peer_connected: bool,
    pub advertising: bool,
    pub discoverable_peers: Vec<PeerIdentity>,
    pub authorization: AuthorizationState,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            status: "Disconnected".to_string(),
            paired_reachable: false,
            peer_connected: false,
            advertising: false,
            discoverable_peers: Vec::new(),
            authorization: AuthorizationState::Unknown,
        }
    }
}

/// Discrete events pushed to the UI layer.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// Needs user acknowledgement (send failures, unreachable counterpart).
    Alert(LinkError),
    LogMessage(StatusMessage),
    /// The display's section cursor moved.
    SectionChanged(usize),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
