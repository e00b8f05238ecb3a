use serde::{Deserialize, Serialize};

use crate::session::{Session, TrainingStatus};

/// A read-only snapshot of a training session.
///
/// Design intent:
/// - Observers cannot mutate the session; snapshotting clones what it needs.
/// - Progress is recomputed from the epoch counters at snapshot time.
/// - Only the newest `log_tail` lines travel with a snapshot; use the full log
///   request for the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: TrainingStatus,
    pub connected: bool,
    pub current_epoch: u32,
    pub total_epochs: u32,
    pub progress: f64,
    /// Sorted by metric name.
    pub metrics: Vec<(String, f64)>,
    pub error: Option<String>,
    pub log_len: usize,
    #[serde(default)]
    pub log_tail: Vec<String>,
}

pub struct SessionAdapter<'a> {
    session: &'a Session,
}

impl<'a> SessionAdapter<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    pub fn snapshot(&self, log_tail: usize) -> SessionSnapshot {
        let s = self.session;
        let mut metrics: Vec<(String, f64)> =
            s.metrics().iter().map(|(k, v)| (k.clone(), *v)).collect();
        metrics.sort_by(|a, b| a.0.cmp(&b.0));

        SessionSnapshot {
            status: s.status(),
            connected: s.is_connected(),
            current_epoch: s.current_epoch(),
            total_epochs: s.total_epochs(),
            progress: s.progress(),
            metrics,
            error: s.error().map(str::to_string),
            log_len: s.log().len(),
            log_tail: s.log().tail(log_tail),
        }
    }
}

impl SessionSnapshot {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| *v)
    }
}
