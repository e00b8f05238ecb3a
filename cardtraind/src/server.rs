//! Local control surface: one JSON request per line, one response per line.

use std::error::Error;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use cardtrain::ipc::{Request, Response};
use cardtrain::observer::SessionAdapter;
use cardtrain::session::Session;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::connection::{ConnectionManager, Subscription};

/// Requests larger than this are rejected by the codec.
const MAX_LINE: usize = 1 << 20;

pub struct Daemon {
    session: Arc<Mutex<Session>>,
    connection: ConnectionManager,
    api: ApiClient,
    shutdown: Notify,
    _frames: Subscription,
}

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn data<T: Serialize>(value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::Data { value },
        Err(e) => Response::error(format!("failed to encode reply: {}", e)),
    }
}

impl Daemon {
    /// Wire the session reducer to the socket's frame stream.
    pub fn new(session: Session, connection: ConnectionManager, api: ApiClient) -> Self {
        let session = Arc::new(Mutex::new(session));
        let frames = {
            let session = Arc::clone(&session);
            connection.subscribe(move |frame| {
                if lock(&session).apply(frame) {
                    debug!("session updated by '{}' frame", frame.kind());
                }
            })
        };
        Self {
            session,
            connection,
            api,
            shutdown: Notify::new(),
            _frames: frames,
        }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Connect the training socket and mirror the outcome into the session.
    pub async fn connect(&self) -> bool {
        let connected = self.connection.connect().await;
        lock(&self.session).set_connected(connected);
        connected
    }

    /// Resolves once a `Shutdown` request has been served.
    pub async fn shutdown_requested(&self) {
        self.shutdown.notified().await;
    }

    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::GetState { log_tail } => {
                let snapshot = {
                    let session = lock(&self.session);
                    SessionAdapter::new(&session).snapshot(log_tail)
                };
                Response::State(snapshot)
            }
            Request::GetLog => {
                let lines = lock(&self.session).log().to_vec();
                Response::Log { lines }
            }
            Request::Reconnect => {
                if self.connect().await {
                    Response::success(format!("Connected to {}", self.connection.url()))
                } else {
                    Response::error(format!(
                        "Could not connect to {}; retrying in the background",
                        self.connection.url()
                    ))
                }
            }
            Request::Disconnect => {
                self.connection.disconnect();
                lock(&self.session).set_connected(false);
                Response::success("Disconnected")
            }

            Request::Login { username, password } => match self.api.login(&username, &password).await {
                Ok(user) => data(&user),
                Err(e) => Response::error(e.to_string()),
            },
            Request::Logout => match self.api.logout() {
                Ok(()) => Response::success("Logged out"),
                Err(e) => Response::error(e.to_string()),
            },
            Request::WhoAmI => match self.api.current_user() {
                Ok(Some(user)) => data(&user),
                Ok(None) => Response::error("Not logged in"),
                Err(e) => Response::error(e.to_string()),
            },

            Request::StartTraining { config } => {
                if !self.connection.is_connected() && !self.connect().await {
                    warn!("starting training without a live training socket");
                }
                match self.api.start_training(&config).await {
                    Ok(value) => Response::Data { value },
                    Err(e) => Response::error(e.to_string()),
                }
            }
            Request::StopTraining => match self.api.stop_training().await {
                Ok(value) => Response::Data { value },
                Err(e) => Response::error(e.to_string()),
            },
            Request::StartTrainingWs { config } => {
                if let Err(e) = config.validate() {
                    return Response::error(e.to_string());
                }
                match self.connection.start_training(&config).await {
                    Ok(()) => Response::success("start_training sent"),
                    Err(e) => Response::error(e.to_string()),
                }
            }
            Request::StopTrainingWs => match self.connection.stop_training().await {
                Ok(()) => Response::success("stop_training sent"),
                Err(e) => Response::error(e.to_string()),
            },

            Request::UploadDataset { paths } => match self.api.upload_dataset(&paths).await {
                Ok(value) => Response::Data { value },
                Err(e) => Response::error(e.to_string()),
            },
            Request::UploadWeights { path } => match self.api.upload_weights(&path).await {
                Ok(value) => Response::Data { value },
                Err(e) => Response::error(e.to_string()),
            },
            Request::DeleteDataset => match self.api.delete_dataset().await {
                Ok(value) => Response::Data { value },
                Err(e) => Response::error(e.to_string()),
            },

            Request::Extract { path, model_type } => {
                match self.api.extract_id_card(&path, model_type).await {
                    Ok(card) => data(&card),
                    Err(e) => Response::error(e.to_string()),
                }
            }
            Request::SaveIdCard { card, user_id } => {
                match self.api.save_id_card(&card, user_id).await {
                    Ok(value) => Response::Data { value },
                    Err(e) => Response::error(e.to_string()),
                }
            }
            Request::GetCardZoneMetrics => match self.api.card_zone_metrics().await {
                Ok(rows) => data(&rows),
                Err(e) => Response::error(e.to_string()),
            },
            Request::CreateCardZoneMetrics { metric } => {
                match self.api.create_card_zone_metrics(&metric).await {
                    Ok(value) => Response::Data { value },
                    Err(e) => Response::error(e.to_string()),
                }
            }
            Request::DownloadModel { output } => self.download_model(&output).await,

            Request::Shutdown => {
                info!("Shutdown requested");
                self.shutdown.notify_one();
                Response::success("Shutting down")
            }
        }
    }

    async fn download_model(&self, output: &Path) -> Response {
        let bytes = match self.api.download_model().await {
            Ok(bytes) => bytes,
            Err(e) => return Response::error(e.to_string()),
        };
        match tokio::fs::write(output, &bytes).await {
            Ok(()) => {
                info!("model saved to {:?} ({} bytes)", output, bytes.len());
                Response::success(format!("Saved {} bytes to {}", bytes.len(), output.display()))
            }
            Err(e) => Response::error(format!("failed to write {}: {}", output.display(), e)),
        }
    }
}

pub async fn serve_client(
    stream: TcpStream,
    daemon: Arc<Daemon>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE));

    while let Some(line) = lines.next().await {
        let line = line?;
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => daemon.handle(request).await,
            Err(e) => Response::error(format!("Invalid request: {}", e)),
        };
        lines.send(serde_json::to_string(&response)?).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionConfig;
    use crate::cookies::CredentialStore;
    use cardtrain::frame::Frame;
    use cardtrain::session::TrainingStatus;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    fn daemon(dir: &tempfile::TempDir) -> Daemon {
        let store = CredentialStore::open(dir.path().join("cookies.json"), 1).unwrap();
        let api = ApiClient::new("http://127.0.0.1:9", Arc::new(Mutex::new(store)));
        let connection = ConnectionManager::with_websocket(ConnectionConfig {
            url: "ws://127.0.0.1:9/ws".to_string(),
            handshake_timeout: Duration::from_millis(200),
            reconnect_delay: Duration::from_secs(5),
        });
        Daemon::new(Session::new(), connection, api)
    }

    #[tokio::test]
    async fn state_reflects_applied_frames() {
        let dir = tempfile::tempdir().unwrap();
        let d = daemon(&dir);
        {
            let mut s = lock(&d.session);
            s.apply(&Frame::parse(r#"{"type":"status","status":"started"}"#).unwrap());
            s.apply(&Frame::parse(r#"{"type":"epoch_progress","current_epoch":1,"total_epochs":4}"#).unwrap());
        }

        let Response::State(snap) = d.handle(Request::GetState { log_tail: 5 }).await else {
            panic!("expected state");
        };
        assert_eq!(snap.status, TrainingStatus::Training);
        assert_eq!(snap.progress, 25.0);

        let Response::Log { lines } = d.handle(Request::GetLog).await else {
            panic!("expected log");
        };
        assert_eq!(lines.len(), 1);
    }

    #[tokio::test]
    async fn socket_actions_need_connection() {
        let dir = tempfile::tempdir().unwrap();
        let d = daemon(&dir);
        let resp = d.handle(Request::StopTrainingWs).await;
        assert!(matches!(resp, Response::Error { .. }));

        let bad = cardtrain::config::TrainingConfig {
            epochs: 0,
            ..Default::default()
        };
        let resp = d.handle(Request::StartTrainingWs { config: bad }).await;
        assert!(matches!(resp, Response::Error { .. }));
    }

    #[tokio::test]
    async fn whoami_without_login() {
        let dir = tempfile::tempdir().unwrap();
        let d = daemon(&dir);
        assert_eq!(
            d.handle(Request::WhoAmI).await,
            Response::error("Not logged in")
        );
    }

    #[tokio::test]
    async fn serves_line_delimited_json() {
        let dir = tempfile::tempdir().unwrap();
        let d = Arc::new(daemon(&dir));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = {
            let d = Arc::clone(&d);
            tokio::spawn(async move {
                let (stream, _) = listener.accept().await.unwrap();
                serve_client(stream, d).await.unwrap();
            })
        };

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader).lines();

        writer.write_all(b"not json\n").await.unwrap();
        let reply: Response = serde_json::from_str(&reader.next_line().await.unwrap().unwrap()).unwrap();
        assert!(matches!(reply, Response::Error { message } if message.starts_with("Invalid request")));

        writer.write_all(b"{\"type\":\"GetState\"}\n").await.unwrap();
        let reply: Response = serde_json::from_str(&reader.next_line().await.unwrap().unwrap()).unwrap();
        assert!(matches!(reply, Response::State(s) if s.status == TrainingStatus::Idle));

        writer.write_all(b"{\"type\":\"Shutdown\"}\n").await.unwrap();
        reader.next_line().await.unwrap().unwrap();
        d.shutdown_requested().await;

        drop(writer);
        server.await.unwrap();
    }
}
