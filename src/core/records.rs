//! Records exchanged with the REST backend.

use serde::{Deserialize, Serialize};

/// Fields extracted from an identity-card image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedCard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dob: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nationality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_date: Option<String>,
    /// Portrait crop, base64.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_avt: Option<String>,
}

/// Which extractor the backend should run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    #[default]
    Yolo,
    Ocr,
}

impl ModelType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yolo => "yolo",
            Self::Ocr => "ocr",
        }
    }
}

impl std::str::FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yolo" => Ok(Self::Yolo),
            "ocr" => Ok(Self::Ocr),
            other => Err(format!("unknown model type '{other}' (yolo|ocr)")),
        }
    }
}

/// Per-epoch metrics of the card-zone detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardZoneMetric {
    pub epoch: u32,
    pub train_box_loss: f64,
    pub train_obj_loss: f64,
    pub train_cls_loss: f64,
    pub precision: f64,
    pub recall: f64,
    pub val_box_loss: f64,
    pub val_obj_loss: f64,
    pub val_cls_loss: f64,
    pub created_at: String,
    #[serde(default)]
    pub confusion_matrix_path: String,
    #[serde(default)]
    pub results_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCardZoneMetric {
    pub epoch: u32,
    pub train_box_loss: f64,
    pub train_obj_loss: f64,
    pub train_cls_loss: f64,
    pub precision: f64,
    pub recall: f64,
    pub val_box_loss: f64,
    pub val_obj_loss: f64,
    pub val_cls_loss: f64,
    pub created_at: String,
    pub user_id: u64,
}

/// Profile of the logged-in user, stored alongside the auth token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: u64,
    pub email: String,
    pub username: String,
}
