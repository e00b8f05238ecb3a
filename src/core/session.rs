//! Training session state, folded from inbound frames.
//!
//! The reducer is deterministic: the same frame sequence always yields the
//! same state. Frames are applied in arrival order and never reordered.
//! Training progress is derived from the epoch counters on demand.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::frame::{Frame, LossMetrics, StatusKind};
use crate::training_log::{TrainingLog, LOG_CAPACITY};

pub const LINE_STARTED: &str = "Bắt đầu quá trình huấn luyện...";
pub const LINE_COMPLETED: &str = "Quá trình huấn luyện đã hoàn thành.";
pub const LINE_STOPPED: &str = "Quá trình huấn luyện đã bị dừng.";
pub const LINE_FAILED: &str = "Quá trình huấn luyện thất bại.";
pub const ERROR_PREFIX: &str = "Lỗi: ";

/// Metric keys written by `validation` frames.
pub const METRIC_MAP50: &str = "mAP50";
pub const METRIC_MAP50_95: &str = "mAP5095";

/// Lifecycle of one training run as seen by this client.
///
/// A `stopped` status frame returns the session to `Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStatus {
    #[default]
    Idle,
    Training,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Session {
    status: TrainingStatus,
    current_epoch: u32,
    total_epochs: u32,
    metrics: HashMap<String, f64>,
    log: TrainingLog,
    error: Option<String>,
    connected: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_log_capacity(LOG_CAPACITY)
    }

    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            status: TrainingStatus::Idle,
            current_epoch: 0,
            total_epochs: 0,
            metrics: HashMap::new(),
            log: TrainingLog::with_capacity(capacity),
            error: None,
            connected: false,
        }
    }

    pub fn status(&self) -> TrainingStatus {
        self.status
    }

    pub fn is_training(&self) -> bool {
        self.status == TrainingStatus::Training
    }

    pub fn current_epoch(&self) -> u32 {
        self.current_epoch
    }

    pub fn total_epochs(&self) -> u32 {
        self.total_epochs
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn metrics(&self) -> &HashMap<String, f64> {
        &self.metrics
    }

    pub fn log(&self) -> &TrainingLog {
        &self.log
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Percentage of epochs done, in `[0, 100]`.
    pub fn progress(&self) -> f64 {
        if self.total_epochs == 0 {
            return 0.0;
        }
        f64::from(self.current_epoch) / f64::from(self.total_epochs) * 100.0
    }

    /// Fold one frame into the session. Returns `false` if the frame was ignored.
    pub fn apply(&mut self, frame: &Frame) -> bool {
        match frame {
            Frame::Status {
                status: Some(status),
                ..
            } => self.apply_status(status),
            Frame::RawLog {
                content: Some(content),
            } => {
                self.log.push(content.as_str());
                true
            }
            Frame::EpochProgress {
                current_epoch: Some(current),
                total_epochs: Some(total),
            } => {
                let total = clamp_u32((*total).max(1));
                let current = clamp_u32((*current).max(0)).min(total);
                self.current_epoch = current;
                self.total_epochs = total;
                true
            }
            Frame::Metrics {
                metrics: Some(losses),
            } => {
                self.apply_losses(losses);
                true
            }
            Frame::Validation {
                class: Some(class),
                map50: Some(map50),
                map50_95: Some(map50_95),
            } if class == "all" => {
                self.metrics.insert(METRIC_MAP50.to_string(), *map50);
                self.metrics.insert(METRIC_MAP50_95.to_string(), *map50_95);
                self.log
                    .push(format!("Validation: mAP50={map50}, mAP50-95={map50_95}"));
                true
            }
            Frame::Error {
                message: Some(message),
            } => {
                self.log.push(format!("{ERROR_PREFIX}{message}"));
                self.error = Some(message.clone());
                true
            }
            other => {
                debug!(kind = other.kind(), "ignoring frame");
                false
            }
        }
    }

    fn apply_status(&mut self, status: &StatusKind) -> bool {
        match status {
            StatusKind::Started => {
                self.status = TrainingStatus::Training;
                self.current_epoch = 0;
                self.metrics.clear();
                self.error = None;
                self.log.reset_with(LINE_STARTED);
            }
            StatusKind::Completed => {
                self.status = TrainingStatus::Completed;
                self.error = None;
                self.log.retain_summary();
                self.log.push(LINE_COMPLETED);
            }
            StatusKind::Stopped => {
                self.status = TrainingStatus::Idle;
                self.error = None;
                self.log.push(LINE_STOPPED);
            }
            StatusKind::Failed => {
                self.status = TrainingStatus::Failed;
                self.log.push(LINE_FAILED);
            }
            StatusKind::Connected => self.connected = true,
            StatusKind::Disconnected => self.connected = false,
            StatusKind::Unknown(s) => {
                debug!(status = %s, "ignoring unknown status");
                return false;
            }
        }
        true
    }

    fn apply_losses(&mut self, losses: &LossMetrics) {
        let fields = [
            ("box_loss", losses.box_loss),
            ("obj_loss", losses.obj_loss),
            ("cls_loss", losses.cls_loss),
        ];
        for (name, value) in fields {
            if let Some(v) = value {
                self.metrics.insert(name.to_string(), v);
            }
        }
        self.log.push(format!(
            "Metrics: box_loss={}, obj_loss={}, cls_loss={}",
            fmt_metric(losses.box_loss),
            fmt_metric(losses.obj_loss),
            fmt_metric(losses.cls_loss),
        ));
    }
}

fn clamp_u32(v: i64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

fn fmt_metric(v: Option<f64>) -> String {
    match v {
        Some(v) => v.to_string(),
        None => "-".to_string(),
    }
}
