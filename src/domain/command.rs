//! Remote-control commands and their wire format.
//!
//! Both links carry the same flat JSON object:
//!
//! ```text
//! {"command": "next", "version": 1, "origin": 1700000000, "seq": 4}
//! ```
//!
//! Only `command` is required. Unknown keys are ignored. The paired link
//! answers commands with `{"status": "received"}` or `{"error": "..."}`.

use crate::domain::errors::DecodeError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Highest envelope version this build understands.
pub const PROTOCOL_VERSION: u32 = 1;

/// Verbs starting with this prefix are relayed without being understood.
pub const EXTENSION_PREFIX: &str = "x-";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    Next,
    Previous,
    /// Escape for verbs newer builds may add.
    Extension(String),
}

impl Command {
    pub fn verb(&self) -> &str {
        match self {
            Command::Next => "next",
            Command::Previous => "previous",
            Command::Extension(verb) => verb,
        }
    }
}

impl FromStr for Command {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err(DecodeError::EmptyCommand),
            "next" => Ok(Command::Next),
            "previous" => Ok(Command::Previous),
            verb if verb.len() > EXTENSION_PREFIX.len() && verb.starts_with(EXTENSION_PREFIX) => {
                Ok(Command::Extension(verb.to_string()))
            }
            verb => Err(DecodeError::UnknownVerb(verb.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Identifies a command by its originating remote session and position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub origin: u64,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEnvelope {
    pub command: Command,
    pub version: u32,
    pub stamp: Option<Stamp>,
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    origin: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seq: Option<u64>,
}

impl CommandEnvelope {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            version: PROTOCOL_VERSION,
            stamp: None,
        }
    }

    pub fn stamped(command: Command, stamp: Stamp) -> Self {
        Self {
            stamp: Some(stamp),
            ..Self::new(command)
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let wire = WireEnvelope {
            command: Some(self.command.verb().to_string()),
            version: Some(self.version),
            origin: self.stamp.map(|s| s.origin),
            seq: self.stamp.map(|s| s.seq),
        };
        // A struct of strings and integers always serializes.
        serde_json::to_vec(&wire).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Self::from_value(parse_object(bytes)?)
    }

    fn from_value(value: serde_json::Value) -> Result<Self, DecodeError> {
        let wire: WireEnvelope =
            serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        let version = wire.version.unwrap_or(1);
        if version > PROTOCOL_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let verb = wire.command.ok_or(DecodeError::MissingCommand)?;
        let command = verb.parse()?;
        let stamp = match (wire.origin, wire.seq) {
            (Some(origin), Some(seq)) => Some(Stamp { origin, seq }),
            _ => None,
        };
        Ok(Self {
            command,
            version,
            stamp,
        })
    }
}

/// Acknowledgement sent back over the paired link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairedReply {
    Status(String),
    Error(String),
}

impl PairedReply {
    /// Accepted for relay; says nothing about the display.
    pub fn accepted() -> Self {
        PairedReply::Status("received".to_string())
    }

    pub fn invalid_command() -> Self {
        PairedReply::Error("Invalid command".to_string())
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Anything that can arrive on the paired link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairedMessage {
    Command(CommandEnvelope),
    Reply(PairedReply),
}

impl PairedMessage {
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let value = parse_object(bytes)?;

        if let Some(object) = value.as_object().filter(|o| !o.contains_key("command")) {
            if let Some(status) = object.get("status").and_then(|v| v.as_str()) {
                return Ok(PairedMessage::Reply(PairedReply::Status(status.to_string())));
            }
            if let Some(error) = object.get("error").and_then(|v| v.as_str()) {
                return Ok(PairedMessage::Reply(PairedReply::Error(error.to_string())));
            }
        }

        CommandEnvelope::from_value(value).map(PairedMessage::Command)
    }
}

fn parse_object(bytes: &[u8]) -> Result<serde_json::Value, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(DecodeError::Malformed("expected a JSON object".to_string()));
    }
    Ok(value)
}

/// Hands out stamps for commands originating on this device.
#[derive(Debug)]
pub struct Sequencer {
    origin: u64,
    next_seq: u64,
}

impl Sequencer {
    pub fn new(origin: u64) -> Self {
        Self { origin, next_seq: 1 }
    }

    /// Origin derived from the wall clock plus a process-wide counter, so two
    /// sequencers created in the same millisecond still differ.
    pub fn fresh() -> Self {
        static CREATED: AtomicU64 = AtomicU64::new(0);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let nth = CREATED.fetch_add(1, Ordering::Relaxed);
        Self::new((millis << 12) | (nth & 0xfff))
    }

    pub fn origin(&self) -> u64 {
        self.origin
    }

    pub fn next_stamp(&mut self) -> Stamp {
        let stamp = Stamp {
            origin: self.origin,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        stamp
    }
}

/// Origins remembered by [`DuplicateFilter`] before the least recent is evicted.
pub const MAX_TRACKED_ORIGINS: usize = 8;

#[derive(Debug, Clone, Copy)]
struct OriginState {
    last_seq: u64,
    last_seen: u64,
}

/// Drops repeated or stale commands, tracking the last `seq` per origin.
#[derive(Debug, Default)]
pub struct DuplicateFilter {
    origins: HashMap<u64, OriginState>,
    admitted: u64,
}

impl DuplicateFilter {
    pub fn admit(&mut self, stamp: Option<Stamp>) -> bool {
        let Some(stamp) = stamp else {
            return true;
        };
        if let Some(known) = self.origins.get(&stamp.origin) {
            if stamp.seq <= known.last_seq {
                return false;
            }
        } else if self.origins.len() >= MAX_TRACKED_ORIGINS {
            self.evict_oldest();
        }

        self.admitted += 1;
        self.origins.insert(
            stamp.origin,
            OriginState {
                last_seq: stamp.seq,
                last_seen: self.admitted,
            },
        );
        true
    }

    pub fn tracked_origins(&self) -> usize {
        self.origins.len()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .origins
            .iter()
            .min_by_key(|(_, state)| state.last_seen)
            .map(|(origin, _)| *origin);
        if let Some(origin) = oldest {
            self.origins.remove(&origin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_bare_command() {
        let env = CommandEnvelope::decode(br#"{"command":"next"}"#).unwrap();
        assert_eq!(env.command, Command::Next);
        assert_eq!(env.version, 1);
        assert_eq!(env.stamp, None);
    }

    #[test]
    fn ignores_unknown_keys() {
        let env =
            CommandEnvelope::decode(br#"{"command":"previous","font":"large","n":3}"#).unwrap();
        assert_eq!(env.command, Command::Previous);
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert_eq!(
            CommandEnvelope::decode(br#"{"verb":"next"}"#),
            Err(DecodeError::MissingCommand)
        );
        assert_eq!(
            CommandEnvelope::decode(br#"{"command":""}"#),
            Err(DecodeError::EmptyCommand)
        );
        assert_eq!(
            CommandEnvelope::decode(br#"{"command":"rewind"}"#),
            Err(DecodeError::UnknownVerb("rewind".to_string()))
        );
        assert_eq!(
            CommandEnvelope::decode(br#"{"command":"next","version":2}"#),
            Err(DecodeError::UnsupportedVersion(2))
        );
        assert!(matches!(
            CommandEnvelope::decode(br#"{"command":5}"#),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            CommandEnvelope::decode(b"not json"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            CommandEnvelope::decode(br#"["next"]"#),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn extension_verbs_pass_through() {
        let env = CommandEnvelope::decode(br#"{"command":"x-pause"}"#).unwrap();
        assert_eq!(env.command, Command::Extension("x-pause".to_string()));
        assert_eq!("x-".parse::<Command>(), Err(DecodeError::UnknownVerb("x-".to_string())));
    }

    #[test]
    fn encoded_envelope_carries_version_and_stamp() {
        let env = CommandEnvelope::stamped(Command::Next, Stamp { origin: 9, seq: 3 });
        let value: serde_json::Value = serde_json::from_slice(&env.encode()).unwrap();
        assert_eq!(value["command"], "next");
        assert_eq!(value["version"], 1);
        assert_eq!(value["origin"], 9);
        assert_eq!(value["seq"], 3);
    }

    #[test]
    fn paired_replies_match_wire_shape() {
        assert_eq!(PairedReply::accepted().encode(), br#"{"status":"received"}"#.to_vec());
        assert_eq!(
            PairedReply::invalid_command().encode(),
            br#"{"error":"Invalid command"}"#.to_vec()
        );
        assert_eq!(
            PairedMessage::decode(br#"{"status":"received"}"#),
            Ok(PairedMessage::Reply(PairedReply::accepted()))
        );
        assert!(matches!(
            PairedMessage::decode(br#"{"command":"next"}"#),
            Ok(PairedMessage::Command(_))
        ));
        assert_eq!(
            PairedMessage::decode(br#"{"hello":"world"}"#),
            Err(DecodeError::MissingCommand)
        );
    }

    #[test]
    fn duplicate_filter_keeps_last_command() {
        let mut filter = DuplicateFilter::default();
        let stamp = |seq| Some(Stamp { origin: 1, seq });

        assert!(filter.admit(stamp(1)));
        assert!(!filter.admit(stamp(1)));
        assert!(filter.admit(stamp(3)));
        assert!(!filter.admit(stamp(2)));
        assert!(filter.admit(None));

        // A restarted remote gets a new origin and starts over.
        assert!(filter.admit(Some(Stamp { origin: 2, seq: 1 })));
    }

    #[test]
    fn interleaved_origins_keep_their_own_sequence() {
        let mut filter = DuplicateFilter::default();
        let stamp = |origin, seq| Some(Stamp { origin, seq });

        assert!(filter.admit(stamp(7, 5)));
        assert!(filter.admit(stamp(8, 1)));
        assert!(!filter.admit(stamp(7, 5)));
        assert!(!filter.admit(stamp(7, 4)));
        assert!(!filter.admit(stamp(8, 1)));
        assert!(filter.admit(stamp(7, 6)));
        assert!(filter.admit(stamp(8, 2)));
    }

    #[test]
    fn least_recent_origin_is_forgotten_first() {
        let mut filter = DuplicateFilter::default();
        let count = MAX_TRACKED_ORIGINS as u64;
        for origin in 0..count {
            assert!(filter.admit(Some(Stamp { origin, seq: 10 })));
        }
        // Origin 0 is used again, so origin 1 becomes the oldest.
        assert!(filter.admit(Some(Stamp { origin: 0, seq: 11 })));
        assert!(filter.admit(Some(Stamp { origin: count, seq: 1 })));
        assert_eq!(filter.tracked_origins(), MAX_TRACKED_ORIGINS);

        assert!(!filter.admit(Some(Stamp { origin: 0, seq: 11 })));
        assert!(filter.admit(Some(Stamp { origin: 1, seq: 10 })));
    }

    #[test]
    fn sequencer_is_monotonic() {
        let mut seq = Sequencer::new(5);
        assert_eq!(seq.next_stamp(), Stamp { origin: 5, seq: 1 });
        assert_eq!(seq.next_stamp(), Stamp { origin: 5, seq: 2 });
    }

    #[test]
    fn fresh_sequencers_have_distinct_origins() {
        let a = Sequencer::fresh();
        let b = Sequencer::fresh();
        assert_ne!(a.origin(), b.origin());
    }
}
