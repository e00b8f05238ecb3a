//! REST client for the recognition backend.
//!
//! Every request carries `Authorization: Bearer <token>` when the credential
//! store holds a live token. Failures are returned to the caller, never
//! retried.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use cardtrain::config::TrainingConfig;
use cardtrain::dataset::pair_dataset;
use cardtrain::records::{
    CardZoneMetric, ExtractedCard, ModelType, NewCardZoneMetric, UserProfile,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::cookies::CredentialStore;
use crate::error::RequestError;

pub const PATH_LOGIN: &str = "/api/v1/auth/login";
pub const PATH_START: &str = "/api/v1/start";
pub const PATH_STOP: &str = "/api/v1/stop";
pub const PATH_EXTRACT: &str = "/api/v1/idcard/extract";
pub const PATH_SAVE_CARD: &str = "/api/v1/idcard/save";
pub const PATH_DATASET: &str = "/api/v1/upload/dataset-yolo";
pub const PATH_WEIGHTS: &str = "/api/v1/upload/weight-yolo";
pub const PATH_CARD_ZONE: &str = "/api/v1/metrics/card-zone";
pub const PATH_DOWNLOAD: &str = "/api/v1/metrics/download";

#[derive(Debug, Deserialize)]
struct LoginReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: String,
    user: Option<UserProfile>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Listing<T> {
    data: Vec<T>,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<Mutex<CredentialStore>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, credentials: Arc<Mutex<CredentialStore>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn store(&self) -> MutexGuard<'_, CredentialStore> {
        self.credentials
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A request to `path` with the bearer token attached, if any.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.http.request(method, url);
        match self.store().token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Auth
    // ═══════════════════════════════════════════════════════════════════════

    /// Log in and persist the returned token and profile.
    pub async fn login(&self, username: &str, password: &str) -> Result<UserProfile, RequestError> {
        let reply: LoginReply = send_json(
            self.request(Method::POST, PATH_LOGIN)
                .json(&serde_json::json!({ "username": username, "password": password })),
        )
        .await?;

        let (true, Some(user), Some(token)) = (reply.success, reply.user, reply.token) else {
            return Err(RequestError::Rejected(if reply.message.is_empty() {
                "login failed".to_string()
            } else {
                reply.message
            }));
        };
        self.store().store_login(&token, &user)?;
        info!("logged in as {}", user.username);
        Ok(user)
    }

    pub fn logout(&self) -> Result<(), RequestError> {
        self.store().clear()?;
        Ok(())
    }

    pub fn current_user(&self) -> Result<Option<UserProfile>, RequestError> {
        Ok(self.store().user()?)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Training
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn start_training(&self, config: &TrainingConfig) -> Result<Value, RequestError> {
        config
            .validate()
            .map_err(|e| RequestError::Invalid(e.to_string()))?;
        send_json(self.request(Method::POST, PATH_START).json(config)).await
    }

    pub async fn stop_training(&self) -> Result<Value, RequestError> {
        send_json(self.request(Method::POST, PATH_STOP)).await
    }

    pub async fn download_model(&self) -> Result<Vec<u8>, RequestError> {
        let resp = check(self.request(Method::GET, PATH_DOWNLOAD).send().await?).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Uploads
    // ═══════════════════════════════════════════════════════════════════════

    /// Pair images with annotations and upload them in one multipart form.
    pub async fn upload_dataset<P: AsRef<Path>>(&self, files: &[P]) -> Result<Value, RequestError> {
        let pairing = pair_dataset(files).map_err(|e| RequestError::Invalid(e.to_string()))?;
        info!(
            "uploading dataset: {} images, {} annotated, {} unmatched",
            pairing.image_count(),
            pairing.matched_count(),
            pairing.unmatched_images.len()
        );

        let mut form = Form::new();
        for path in pairing.upload_order() {
            form = form.part("files", file_part(path).await?);
        }
        let reply = send_json(self.request(Method::POST, PATH_DATASET).multipart(form)).await?;
        ack(reply)
    }

    pub async fn upload_weights(&self, path: &Path) -> Result<Value, RequestError> {
        let form = Form::new().part("file", file_part(path).await?);
        let reply = send_json(self.request(Method::POST, PATH_WEIGHTS).multipart(form)).await?;
        ack(reply)
    }

    pub async fn delete_dataset(&self) -> Result<Value, RequestError> {
        let reply = send_json(self.request(Method::DELETE, PATH_DATASET)).await?;
        ack(reply)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Identity cards
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn extract_id_card(
        &self,
        image: &Path,
        model_type: ModelType,
    ) -> Result<ExtractedCard, RequestError> {
        let form = Form::new()
            .part("file", file_part(image).await?)
            .text("modelType", model_type.as_str());
        send_json(self.request(Method::POST, PATH_EXTRACT).multipart(form)).await
    }

    pub fn save_id_card_request(&self, card: &ExtractedCard, user_id: u64) -> RequestBuilder {
        self.request(Method::POST, PATH_SAVE_CARD)
            .query(&[("userId", user_id)])
            .json(card)
    }

    pub async fn save_id_card(&self, card: &ExtractedCard, user_id: u64) -> Result<Value, RequestError> {
        let reply = send_json(self.save_id_card_request(card, user_id)).await?;
        ack(reply)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Metrics
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn card_zone_metrics(&self) -> Result<Vec<CardZoneMetric>, RequestError> {
        let listing: Listing<CardZoneMetric> =
            send_json(self.request(Method::GET, PATH_CARD_ZONE)).await?;
        Ok(listing.data)
    }

    pub async fn create_card_zone_metrics(
        &self,
        metric: &NewCardZoneMetric,
    ) -> Result<Value, RequestError> {
        send_json(self.request(Method::POST, PATH_CARD_ZONE).json(metric)).await
    }
}

async fn file_part(path: &Path) -> Result<Part, RequestError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| RequestError::File {
        path: path.to_path_buf(),
        source: e,
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    Ok(Part::bytes(bytes).file_name(name))
}

/// Map a non-2xx response to `RequestError::Status`, preferring the body's
/// `message` field.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response, RequestError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(RequestError::Status {
        status: status.as_u16(),
        message: error_message(&body, status.canonical_reason().unwrap_or("error")),
    })
}

fn error_message(body: &str, fallback: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()))
        .unwrap_or_else(|| fallback.to_string())
}

async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, RequestError> {
    let resp = check(builder.send().await?).await?;
    debug!("{} {}", resp.status(), resp.url());
    Ok(resp.json().await?)
}

/// Bodies shaped `{success, message}` report failure in-band.
fn ack(reply: Value) -> Result<Value, RequestError> {
    if reply.get("success") == Some(&Value::Bool(false)) {
        let message = reply
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("request rejected")
            .to_string();
        return Err(RequestError::Rejected(message));
    }
    Ok(reply)
}
