//! Decoding of audit-log notifications delivered through Pub/Sub.
//!
//! A delivery carries a base64 encoded JSON log entry. Two payload schemas
//! are recognized:
//!
//! | Schema | Source | Normalized from |
//! |--------|--------|-----------------|
//! | `jsonPayload` | Compute activity log | `resource.type`, `event_subtype`, `resource.name`, `actor` |
//! | `protoPayload` | Cloud Audit Logs | `serviceName`, `methodName`, `resourceName`, `authenticationInfo.principalEmail` |

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GuardError, Result};
use crate::policy::BindingDelta;

/// The transport envelope: a Pub/Sub message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Map<String, Value>>,
}

impl Envelope {
    /// Wrap a JSON log entry the way Pub/Sub would.
    pub fn from_log_entry(entry: &Value) -> Self {
        Self {
            data: STANDARD.encode(entry.to_string()),
            ..Self::default()
        }
    }
}

/// Body of a Pub/Sub push delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct PushRequest {
    pub message: Envelope,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PayloadSchema {
    JsonPayload,
    ProtoPayload,
}

/// A decoded audit notification, normalized across both schemas.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub schema: PayloadSchema,
    pub resource_type: String,
    pub operation_kind: String,
    pub resource_name: String,
    pub actor: String,
    /// The payload object the fields above were taken from.
    pub raw: Value,
}

pub const UNKNOWN_ACTOR: &str = "unknown";

impl ChangeEvent {
    /// `jsonPayload.event_type`, e.g. `GCE_OPERATION_DONE`.
    pub fn event_type(&self) -> Option<&str> {
        self.raw.get("event_type").and_then(Value::as_str)
    }

    /// Binding deltas of an IAM change. A payload without a policy delta
    /// has no deltas; a delta list that does not parse is malformed.
    pub fn binding_deltas(&self) -> Result<Vec<BindingDelta>> {
        match self.raw.pointer("/serviceData/policyDelta/bindingDeltas") {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(deltas) => serde_json::from_value(deltas.clone())
                .map_err(|e| GuardError::MalformedEvent(format!("invalid bindingDeltas: {}", e))),
        }
    }
}

/// Decode a transport envelope into a [`ChangeEvent`].
pub fn decode(envelope: &Envelope) -> Result<ChangeEvent> {
    let bytes = STANDARD
        .decode(envelope.data.trim())
        .map_err(|e| GuardError::MalformedEvent(format!("invalid base64: {}", e)))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| GuardError::MalformedEvent(format!("invalid UTF-8: {}", e)))?;
    let entry: Value = serde_json::from_str(&text)
        .map_err(|e| GuardError::MalformedEvent(format!("invalid JSON: {}", e)))?;

    decode_entry(entry)
}

/// Normalize an already-parsed log entry.
pub fn decode_entry(mut entry: Value) -> Result<ChangeEvent> {
    if let Some(payload) = entry.get_mut("jsonPayload").map(Value::take) {
        return from_json_payload(payload);
    }
    if let Some(payload) = entry.get_mut("protoPayload").map(Value::take) {
        return from_proto_payload(payload);
    }
    Err(GuardError::UnrecognizedSchema(
        "neither jsonPayload nor protoPayload present".to_string(),
    ))
}

fn required<'a>(payload: &'a Value, pointer: &str) -> Result<&'a str> {
    payload
        .pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| GuardError::UnrecognizedSchema(format!("missing required field {}", pointer)))
}

fn from_json_payload(payload: Value) -> Result<ChangeEvent> {
    let resource_type = required(&payload, "/resource/type")?.to_string();
    let resource_name = required(&payload, "/resource/name")?.to_string();
    let operation_kind = required(&payload, "/event_subtype")?.to_string();

    let actor = match payload.get("actor") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(obj)) => obj
            .get("user")
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_ACTOR)
            .to_string(),
        _ => UNKNOWN_ACTOR.to_string(),
    };

    Ok(ChangeEvent {
        schema: PayloadSchema::JsonPayload,
        resource_type,
        operation_kind,
        resource_name,
        actor,
        raw: payload,
    })
}

fn from_proto_payload(payload: Value) -> Result<ChangeEvent> {
    let resource_type = required(&payload, "/serviceName")?.to_string();
    let operation_kind = required(&payload, "/methodName")?.to_string();
    let resource_name = required(&payload, "/resourceName")?.to_string();
    let actor = payload
        .pointer("/authenticationInfo/principalEmail")
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_ACTOR)
        .to_string();

    Ok(ChangeEvent {
        schema: PayloadSchema::ProtoPayload,
        resource_type,
        operation_kind,
        resource_name,
        actor,
        raw: payload,
    })
}
