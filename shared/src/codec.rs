//! JSON codec for the command and telemetry envelopes
//!
//! Inbound commands on the command topic:
//! ```text
//! { "CMD": "INSPECT_PANEL", "CMD_COUNTER": 7, "CMD_HASH": "ab12" }
//! ```
//!
//! Outbound telemetry on the telemetry topic is a single JSON object with a
//! fixed envelope (`msg_id`, `message`, `msg_time`, `system_state`) plus extra
//! fields merged in. Extra fields win over envelope fields of the same name.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::state_machine::ModuleState;

/// Errors that can occur while decoding an inbound envelope
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Empty payload")]
    Empty,

    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Errors that can occur while encoding an outbound envelope
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("JSON encode error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Telemetry envelope did not encode to an object")]
    NotAnObject,
}

/// A command issued by the host. Missing fields decode to empty/zero values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "CMD", default)]
    pub name: String,
    #[serde(rename = "CMD_COUNTER", default)]
    pub counter: i64,
    #[serde(rename = "CMD_HASH", default)]
    pub hash: String,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// True for the zero-valued command a failed decode would stand in for
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.counter == 0 && self.hash.is_empty()
    }
}

/// Command vocabulary understood by the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    InspectPanel,
    PerformManeuver,
    Resume,
    HealthCheck,
    HeatAndClear,
    InjectFault,
}

impl CommandKind {
    pub const ALL: [CommandKind; 6] = [
        CommandKind::InspectPanel,
        CommandKind::PerformManeuver,
        CommandKind::Resume,
        CommandKind::HealthCheck,
        CommandKind::HeatAndClear,
        CommandKind::InjectFault,
    ];

    /// Look up a command by its wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::InspectPanel => "INSPECT_PANEL",
            CommandKind::PerformManeuver => "PERFORM_MANEUVER",
            CommandKind::Resume => "RESUME",
            CommandKind::HealthCheck => "HEALTH_CHECK",
            CommandKind::HeatAndClear => "HEAT_AND_CLEAR",
            CommandKind::InjectFault => "INJECT_FAULT",
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode a command envelope from a raw payload
pub fn decode_command(payload: &[u8]) -> Result<Command, DecodeError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::Empty);
    }
    Ok(serde_json::from_slice(payload)?)
}

/// Encode a command envelope (host side and tests)
pub fn encode_command(command: &Command) -> Result<Bytes, EncodeError> {
    Ok(Bytes::from(serde_json::to_vec(command)?))
}

/// Classification carried in the `type` field of a telemetry record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordKind {
    Status,
    RetValue,
    Warning,
    Fault,
    Healthy,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Status => "STATUS",
            RecordKind::RetValue => "RET_VALUE",
            RecordKind::Warning => "WARNING",
            RecordKind::Fault => "FAULT",
            RecordKind::Healthy => "HEALTHY",
        }
    }
}

/// A structured telemetry record published by the module
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    pub msg_id: String,
    pub message: String,
    pub msg_time: String,
    pub system_state: ModuleState,
    /// Extension fields merged over the envelope on encode
    #[serde(skip)]
    pub extra: Map<String, Value>,
}

impl TelemetryRecord {
    /// Create a record stamped with the current time
    pub fn new(
        msg_id: impl Into<String>,
        message: impl Into<String>,
        system_state: ModuleState,
    ) -> Self {
        Self {
            msg_id: msg_id.into(),
            message: message.into(),
            msg_time: crate::now_rfc3339(),
            system_state,
            extra: Map::new(),
        }
    }

    /// Set the `type` field
    pub fn kind(self, kind: RecordKind) -> Self {
        self.field("type", kind.as_str())
    }

    /// Set the `return_params` field
    pub fn return_params<I, S>(self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let params: Vec<Value> = params.into_iter().map(|p| Value::String(p.into())).collect();
        self.field("return_params", Value::Array(params))
    }

    /// Set an arbitrary extension field
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Envelope plus extension fields as one JSON object
    pub fn to_json(&self) -> Result<Map<String, Value>, EncodeError> {
        let mut object = match serde_json::to_value(self)? {
            Value::Object(object) => object,
            _ => return Err(EncodeError::NotAnObject),
        };
        for (key, value) in &self.extra {
            object.insert(key.clone(), value.clone());
        }
        Ok(object)
    }
}

/// Encode a telemetry record for the wire
pub fn encode_telemetry(record: &TelemetryRecord) -> Result<Bytes, EncodeError> {
    let object = record.to_json()?;
    Ok(Bytes::from(serde_json::to_vec(&object)?))
}

/// Decode a telemetry record into its JSON object (host side and tests)
pub fn decode_telemetry(payload: &[u8]) -> Result<Map<String, Value>, DecodeError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::Empty);
    }
    Ok(serde_json::from_slice(payload)?)
}
