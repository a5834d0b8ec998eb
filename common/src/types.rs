use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub name: String,
    pub uid: String,
}

impl DeviceIdentity {
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: uid.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
}

/// Successful top-level response: `{status:"ok", payload:...}`.
#[derive(Debug, Clone, Serialize)]
pub struct OkEnvelope<T> {
    pub status: ReplyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<T>,
}

impl<T> OkEnvelope<T> {
    pub fn with_payload(payload: T) -> Self {
        Self {
            status: ReplyStatus::Ok,
            payload: Some(payload),
        }
    }
}

impl OkEnvelope<()> {
    pub fn bare() -> Self {
        Self {
            status: ReplyStatus::Ok,
            payload: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub status: ReplyStatus,
    pub error_message: String,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Error,
            error_message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfoPayload {
    pub name: String,
    pub uid: String,
    pub firmware: &'static str,
    pub fields: Vec<FieldInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub state: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateUpdateRequest {
    #[serde(default)]
    pub fields: Vec<FieldUpdate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldUpdate {
    pub id: String,
    #[serde(default)]
    pub state: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldResult {
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldError {
    FieldNotFound,
    HandlerInternalError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldOutcome {
    pub id: String,
    pub result: FieldResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FieldError>,
}

impl FieldOutcome {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: FieldResult::Ok,
            error: None,
        }
    }

    pub fn failed(id: impl Into<String>, error: FieldError) -> Self {
        Self {
            id: id.into(),
            result: FieldResult::Error,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StateUpdatePayload {
    pub fields: Vec<FieldOutcome>,
}
