//! # cardtrain
//!
//! Client-side core for the identity-card (CCCD) recognition backend.
//!
//! The backend trains a card-zone detector and streams progress over a
//! WebSocket. This crate turns that stream into a training [`session`]:
//! status, epoch counters, last-known metrics and a bounded log.
//!
//! ## Quick Start
//!
//! ```
//! use cardtrain::prelude::*;
//!
//! let mut session = Session::new();
//! for line in [
//!     r#"{"type":"status","status":"started"}"#,
//!     r#"{"type":"epoch_progress","current_epoch":2,"total_epochs":8}"#,
//! ] {
//!     let frame = Frame::parse(line).unwrap();
//!     session.apply(&frame);
//! }
//! assert_eq!(session.progress(), 25.0);
//! ```
//!
//! ## Modules
//!
//! - [`frame`]: Wire frames (inbound decoding, outbound actions)
//! - [`session`]: The session reducer
//! - [`training_log`]: Bounded training log
//! - [`config`]: Training hyperparameters and validation
//! - [`dataset`]: Image / annotation pairing for YOLO uploads
//! - [`records`]: REST payloads (extracted cards, metrics, user profile)
//! - [`observer`]: Read-only session snapshots
//! - [`ipc`]: Daemon control protocol

#[path = "core/frame.rs"]
pub mod frame;

#[path = "core/training_log.rs"]
pub mod training_log;

#[path = "core/session.rs"]
pub mod session;

#[path = "core/config.rs"]
pub mod config;

#[path = "core/dataset.rs"]
pub mod dataset;

#[path = "core/records.rs"]
pub mod records;

#[path = "core/ipc.rs"]
pub mod ipc;

pub mod observer;

pub mod prelude {
    pub use crate::config::TrainingConfig;
    pub use crate::frame::{Frame, StatusKind};
    pub use crate::observer::{SessionAdapter, SessionSnapshot};
    pub use crate::session::{Session, TrainingStatus};
}
