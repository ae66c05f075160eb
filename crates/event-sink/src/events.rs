//! Machine lifecycle events.
//!
//! Machines publish a fixed set of event kinds. Each frame on the wire is a
//! JSON envelope naming its kind through a protobuf-style `type_url`; it is
//! decoded here into [`EventPayload`], a closed enum with an explicit
//! [`EventPayload::Unknown`] variant for kinds this build does not know.

use crate::error::DecodeError;
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// A decoded event together with its source node.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    /// Identity of the reporting node
    pub node: String,
    /// Opaque event id assigned by the node
    pub id: String,
    /// When the node emitted the event (receive time if the node did not say)
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Address(AddressEvent),
    ConfigValidationError(ConfigValidationErrorEvent),
    ConfigLoadError(ConfigLoadErrorEvent),
    Phase(PhaseEvent),
    Task(TaskEvent),
    ServiceState(ServiceStateEvent),
    Sequence(SequenceEvent),
    Unknown { type_url: String },
}

impl EventPayload {
    /// Short, stable name of the kind (used for logs and metric labels).
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Address(_) => "address",
            EventPayload::ConfigValidationError(_) => "config_validation_error",
            EventPayload::ConfigLoadError(_) => "config_load_error",
            EventPayload::Phase(_) => "phase",
            EventPayload::Task(_) => "task",
            EventPayload::ServiceState(_) => "service_state",
            EventPayload::Sequence(_) => "sequence",
            EventPayload::Unknown { .. } => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AddressEvent {
    #[serde(default)]
    pub hostname: String,
    /// Addresses as reported, either `ip` or `ip/prefix-len`
    #[serde(default)]
    pub addresses: Vec<String>,
}

impl AddressEvent {
    /// Parses a reported address, returning the IP it refers to.
    pub fn parse_address(address: &str) -> Option<IpAddr> {
        if address.contains('/') {
            address.parse::<IpNet>().ok().map(|net| net.addr())
        } else {
            address.parse::<IpAddr>().ok()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigValidationErrorEvent {
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigLoadErrorEvent {
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartStop {
    Start,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseEvent {
    pub phase: String,
    pub action: StartStop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task: String,
    pub action: StartStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceAction {
    Initialized,
    Preparing,
    Waiting,
    Running,
    Stopping,
    Finished,
    Failed,
    Skipped,
    Starting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServiceHealth {
    #[serde(default)]
    pub unknown: bool,
    #[serde(default)]
    pub healthy: bool,
    #[serde(default)]
    pub last_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStateEvent {
    pub service: String,
    pub action: ServiceAction,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<ServiceHealth>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SequenceAction {
    Noop,
    Start,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceEvent {
    pub sequence: String,
    pub action: SequenceAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SequenceError>,
}

/// Envelope as it appears on the wire.
#[derive(Debug, Deserialize)]
struct WireEnvelope {
    node: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    type_url: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Message name from a type URL, e.g. `talos/runtime/machine.AddressEvent` -> `AddressEvent`.
fn message_name(type_url: &str) -> &str {
    let name = type_url.rsplit('/').next().unwrap_or(type_url);
    name.strip_prefix("machine.").unwrap_or(name)
}

impl EventEnvelope {
    /// Decodes one wire frame. `received_at` stands in for a missing timestamp.
    pub fn decode(frame: &[u8], received_at: DateTime<Utc>) -> Result<Self, DecodeError> {
        let wire: WireEnvelope = serde_json::from_slice(frame).map_err(DecodeError::Envelope)?;

        fn payload<T: serde::de::DeserializeOwned>(
            wire: &WireEnvelope,
        ) -> Result<T, DecodeError> {
            serde_json::from_value(wire.data.clone()).map_err(|source| DecodeError::Payload {
                type_url: wire.type_url.clone(),
                source,
            })
        }

        let payload = match message_name(&wire.type_url) {
            "AddressEvent" => EventPayload::Address(payload(&wire)?),
            "ConfigValidationErrorEvent" => EventPayload::ConfigValidationError(payload(&wire)?),
            "ConfigLoadErrorEvent" => EventPayload::ConfigLoadError(payload(&wire)?),
            "PhaseEvent" => EventPayload::Phase(payload(&wire)?),
            "TaskEvent" => EventPayload::Task(payload(&wire)?),
            "ServiceStateEvent" => EventPayload::ServiceState(payload(&wire)?),
            "SequenceEvent" => EventPayload::Sequence(payload(&wire)?),
            _ => EventPayload::Unknown {
                type_url: wire.type_url.clone(),
            },
        };

        Ok(Self {
            node: wire.node,
            id: wire.id,
            timestamp: wire.timestamp.unwrap_or(received_at),
            payload,
        })
    }
}
