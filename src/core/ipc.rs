//! Local control protocol between `cardtrain-cli` and the `cardtraind` daemon.
//!
//! One JSON object per line in each direction; every request gets exactly one
//! response.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;
use crate::observer::SessionSnapshot;
use crate::records::{ExtractedCard, ModelType, NewCardZoneMetric};

pub const DEFAULT_IPC_ADDR: &str = "127.0.0.1:9877";

fn default_log_tail() -> usize {
    20
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    GetState {
        #[serde(default = "default_log_tail")]
        log_tail: usize,
    },
    GetLog,
    Reconnect,
    Disconnect,
    Login {
        username: String,
        password: String,
    },
    Logout,
    WhoAmI,
    /// Start a run through the REST endpoint.
    StartTraining {
        config: TrainingConfig,
    },
    StopTraining,
    /// Start a run through the training socket.
    StartTrainingWs {
        config: TrainingConfig,
    },
    StopTrainingWs,
    UploadDataset {
        paths: Vec<PathBuf>,
    },
    UploadWeights {
        path: PathBuf,
    },
    DeleteDataset,
    Extract {
        path: PathBuf,
        #[serde(default)]
        model_type: ModelType,
    },
    SaveIdCard {
        card: ExtractedCard,
        #[serde(default = "default_user_id")]
        user_id: u64,
    },
    GetCardZoneMetrics,
    CreateCardZoneMetrics {
        metric: NewCardZoneMetric,
    },
    DownloadModel {
        output: PathBuf,
    },
    Shutdown,
}

fn default_user_id() -> u64 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    State(SessionSnapshot),
    Log { lines: Vec<String> },
    Success { message: String },
    Data { value: serde_json::Value },
    Error { message: String },
}

impl Response {
    pub fn success(message: impl Into<String>) -> Self {
        Self::Success {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_are_tagged_by_type() {
        let json = serde_json::to_string(&Request::StopTraining).unwrap();
        assert_eq!(json, r#"{"type":"StopTraining"}"#);

        let req: Request = serde_json::from_str(r#"{"type":"GetState"}"#).unwrap();
        assert_eq!(req, Request::GetState { log_tail: 20 });

        let req: Request =
            serde_json::from_str(r#"{"type":"Extract","path":"front.jpg"}"#).unwrap();
        assert_eq!(
            req,
            Request::Extract {
                path: PathBuf::from("front.jpg"),
                model_type: ModelType::Yolo
            }
        );
    }

    #[test]
    fn responses_round_trip_through_lines() {
        let resp = Response::success("Training started");
        let line = serde_json::to_string(&resp).unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(serde_json::from_str::<Response>(&line).unwrap(), resp);
    }
}
