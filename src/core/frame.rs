//! Wire frames exchanged over the training WebSocket.
//!
//! Inbound frames are decoded leniently: a field with the wrong JSON type is
//! treated as absent instead of rejecting the whole frame, so one malformed
//! metric never hides the rest of a message.

use serde::Deserialize;
use serde_json::{Map, Value};

/// Why an inbound text frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame has no string `type` field")]
    MissingType,
}

/// Value of the `status` field of a `status` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusKind {
    Started,
    Completed,
    Stopped,
    Failed,
    Connected,
    Disconnected,
    Unknown(String),
}

impl StatusKind {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "started" => Self::Started,
            "completed" => Self::Completed,
            "stopped" => Self::Stopped,
            "failed" => Self::Failed,
            "connected" => Self::Connected,
            "disconnected" => Self::Disconnected,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Unknown(s) => s,
        }
    }
}

/// The three training losses carried by a `metrics` frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossMetrics {
    pub box_loss: Option<f64>,
    pub obj_loss: Option<f64>,
    pub cls_loss: Option<f64>,
}

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Status {
        status: Option<StatusKind>,
        message: Option<String>,
    },
    RawLog {
        content: Option<String>,
    },
    EpochProgress {
        current_epoch: Option<i64>,
        total_epochs: Option<i64>,
    },
    Metrics {
        metrics: Option<LossMetrics>,
    },
    Validation {
        class: Option<String>,
        map50: Option<f64>,
        map50_95: Option<f64>,
    },
    Error {
        message: Option<String>,
    },
    /// A frame whose `type` this client does not act on (e.g. `log`).
    Other {
        kind: String,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    kind: Value,
    #[serde(default)]
    status: Value,
    #[serde(default)]
    message: Value,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    current_epoch: Value,
    #[serde(default)]
    total_epochs: Value,
    #[serde(default)]
    metrics: Value,
    #[serde(default)]
    class: Value,
    #[serde(rename = "mAP50", default)]
    map50: Value,
    #[serde(rename = "mAP50-95", default)]
    map50_95: Value,
}

impl Frame {
    /// Decode one text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let raw: RawFrame = serde_json::from_str(text)?;
        let kind = raw.kind.as_str().ok_or(FrameError::MissingType)?;

        let frame = match kind {
            "status" => Frame::Status {
                status: raw.status.as_str().map(StatusKind::from_wire),
                message: non_empty_string(&raw.message),
            },
            "raw_log" => Frame::RawLog {
                content: text_content(&raw.content),
            },
            "epoch_progress" => Frame::EpochProgress {
                current_epoch: whole_number(&raw.current_epoch),
                total_epochs: whole_number(&raw.total_epochs),
            },
            "metrics" => Frame::Metrics {
                metrics: raw.metrics.as_object().map(|m| LossMetrics {
                    box_loss: m.get("box_loss").and_then(finite_number),
                    obj_loss: m.get("obj_loss").and_then(finite_number),
                    cls_loss: m.get("cls_loss").and_then(finite_number),
                }),
            },
            "validation" => Frame::Validation {
                class: raw.class.as_str().map(str::to_string),
                map50: finite_number(&raw.map50),
                map50_95: finite_number(&raw.map50_95),
            },
            "error" => Frame::Error {
                message: non_empty_string(&raw.message),
            },
            other => Frame::Other {
                kind: other.to_string(),
            },
        };
        Ok(frame)
    }

    /// A status frame synthesized locally (connectivity changes).
    pub fn status(status: StatusKind, message: impl Into<String>) -> Self {
        Frame::Status {
            status: Some(status),
            message: Some(message.into()),
        }
    }

    /// The `type` discriminant this frame was decoded from.
    pub fn kind(&self) -> &str {
        match self {
            Frame::Status { .. } => "status",
            Frame::RawLog { .. } => "raw_log",
            Frame::EpochProgress { .. } => "epoch_progress",
            Frame::Metrics { .. } => "metrics",
            Frame::Validation { .. } => "validation",
            Frame::Error { .. } => "error",
            Frame::Other { kind } => kind,
        }
    }
}

/// A number is accepted only when JSON carries it as a finite number.
fn finite_number(v: &Value) -> Option<f64> {
    v.as_f64().filter(|f| f.is_finite())
}

fn whole_number(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| finite_number(v).map(|f| f.trunc() as i64))
}

fn non_empty_string(v: &Value) -> Option<String> {
    v.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

/// Log content: non-empty strings, non-zero numbers and `true`. Zero, `false`
/// and containers count as absent.
fn text_content(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Outbound
// ═══════════════════════════════════════════════════════════════════════════

pub const ACTION_START_TRAINING: &str = "start_training";
pub const ACTION_STOP_TRAINING: &str = "stop_training";

/// Serialize `{action, ...payload}` as sent to the training socket.
///
/// Payload keys are spread after `action`, so an `action` key inside
/// `payload` replaces it.
pub fn encode_action(action: &str, payload: Map<String, Value>) -> String {
    let mut obj = Map::with_capacity(payload.len() + 1);
    obj.insert("action".to_string(), Value::String(action.to_string()));
    obj.extend(payload);
    Value::Object(obj).to_string()
}

/// Payload of a `start_training` frame: `{config: ...}`.
pub fn start_training_payload(config: Value) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("config".to_string(), config);
    payload
}
