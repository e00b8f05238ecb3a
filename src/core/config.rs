//! Hyperparameters for one training run, as submitted to the backend.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config validation error: {0}")]
    Validation(String),
}

pub const BATCH_SIZE_RANGE: std::ops::RangeInclusive<u32> = 1..=64;
pub const EPOCHS_RANGE: std::ops::RangeInclusive<u32> = 1..=100;
pub const LEARNING_RATE_RANGE: std::ops::RangeInclusive<f64> = 0.0001..=0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrainingConfig {
    pub batch_size: u32,
    pub epochs: u32,
    pub learning_rate: f64,
    pub model_name: String,
    pub dataset_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pretrained_weight_path: Option<String>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            epochs: 3,
            learning_rate: 0.01,
            model_name: model_name_for(Utc::now().date_naive()),
            dataset_path: "/dataset/yolo".to_string(),
            pretrained_weight_path: None,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !BATCH_SIZE_RANGE.contains(&self.batch_size) {
            return Err(ConfigError::Validation(format!(
                "batchSize must be in {}..={}",
                BATCH_SIZE_RANGE.start(),
                BATCH_SIZE_RANGE.end()
            )));
        }
        if !EPOCHS_RANGE.contains(&self.epochs) {
            return Err(ConfigError::Validation(format!(
                "epochs must be in {}..={}",
                EPOCHS_RANGE.start(),
                EPOCHS_RANGE.end()
            )));
        }
        if !LEARNING_RATE_RANGE.contains(&self.learning_rate) {
            return Err(ConfigError::Validation(format!(
                "learningRate must be in {}..={}",
                LEARNING_RATE_RANGE.start(),
                LEARNING_RATE_RANGE.end()
            )));
        }
        if self.model_name.trim().is_empty() {
            return Err(ConfigError::Validation("modelName must not be empty".into()));
        }
        Ok(())
    }
}

/// `model_YYYYMMDD`, the name given to runs started on `date`.
pub fn model_name_for(date: NaiveDate) -> String {
    format!("model_{}", date.format("%Y%m%d"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = TrainingConfig::default();
        cfg.validate().unwrap();
        assert!(cfg.model_name.starts_with("model_"));
        assert_eq!(cfg.model_name.len(), "model_20250101".len());
    }

    #[test]
    fn model_name_uses_compact_date() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        assert_eq!(model_name_for(date), "model_20250307");
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut cfg = TrainingConfig {
            batch_size: 65,
            ..TrainingConfig::default()
        };
        assert!(cfg.validate().is_err());
        cfg.batch_size = 8;
        cfg.epochs = 0;
        assert!(cfg.validate().is_err());
        cfg.epochs = 100;
        cfg.learning_rate = 0.5;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().starts_with("config validation error: learningRate"));
    }

    #[test]
    fn serializes_camel_case_without_missing_weights() {
        let cfg = TrainingConfig {
            model_name: "model_x".into(),
            ..TrainingConfig::default()
        };
        let v = serde_json::to_value(&cfg).unwrap();
        assert_eq!(v["batchSize"], 16);
        assert_eq!(v["learningRate"], 0.01);
        assert_eq!(v["datasetPath"], "/dataset/yolo");
        assert!(v.get("pretrainedWeightPath").is_none());

        let back: TrainingConfig =
            serde_json::from_str(r#"{"epochs":7,"modelName":"m"}"#).unwrap();
        assert_eq!(back.epochs, 7);
        assert_eq!(back.batch_size, 16);
    }
}
