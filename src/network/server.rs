//! HTTP Game Server
//!
//! Axum transport around the buzzer core. Hosts and players subscribe with
//! long-lived Server-Sent-Events streams; session creation and actions are
//! one-shot POST requests.
//!
//! ```text
//! GET  /                    liveness probe
//! POST /host                create session -> {"sessionCode": n}
//! GET  /host/{code}         host event stream
//! POST /host/{code}/lock    lock every player's buzzer
//! POST /host/{code}/reset   re-arm every player's buzzer
//! GET  /play/{code}?name=   player event stream
//! POST /play/{code}/buzz    {"playerID": n}
//! ```

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{Stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, instrument, warn};

use crate::game::events::Action;
use crate::network::connection::{
    ConnectionConfig, ConnectionManager, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_SUBSCRIBER_BUFFER,
};
use crate::network::protocol::{
    BuzzRequest, CreateSessionResponse, ErrorBody, JoinQuery, ServerFrame,
};
use crate::network::router::{EventRouter, RouterTasks, DEFAULT_QUEUE_CAPACITY};
use crate::network::session::{SessionError, SessionRegistry};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Host heartbeat period. `None` disables heartbeats.
    pub heartbeat_interval: Option<Duration>,
    /// Frames buffered per stream.
    pub subscriber_buffer: usize,
    /// Inbound events buffered per dispatch loop.
    pub queue_capacity: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL),
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables, keeping defaults for
    /// anything unset or unparsable.
    ///
    /// `BUZZER_HEARTBEAT_MS=0` disables host heartbeats.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let heartbeat_ms = env_or(
            "BUZZER_HEARTBEAT_MS",
            DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64,
        );

        Self {
            bind_addr: env_or("BUZZER_BIND_ADDR", defaults.bind_addr),
            heartbeat_interval: (heartbeat_ms > 0).then(|| Duration::from_millis(heartbeat_ms)),
            subscriber_buffer: env_or("BUZZER_SUBSCRIBER_BUFFER", defaults.subscriber_buffer)
                .max(1),
            queue_capacity: env_or("BUZZER_QUEUE_CAPACITY", defaults.queue_capacity).max(1),
            version: defaults.version,
        }
    }

    /// Settings handed to each connection.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            subscriber_buffer: self.subscriber_buffer,
            heartbeat_interval: self.heartbeat_interval,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(std::io::Error),

    /// Listener or connection I/O failed while serving.
    #[error("Serve error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SessionError::BadRequest(_) => StatusCode::BAD_REQUEST,
            SessionError::NotFound(_) | SessionError::ParticipantNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            SessionError::Collision(_) | SessionError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            debug!("Request rejected: {}", self);
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

/// The buzzer server.
pub struct BuzzerServer {
    /// Server configuration.
    config: ServerConfig,
    /// Registry, router and connection lifecycle.
    connections: ConnectionManager,
    /// Running dispatch loops.
    tasks: RouterTasks,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl BuzzerServer {
    /// Create a server with an empty registry and start the dispatch loops.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_registry(config, Arc::new(SessionRegistry::new()))
    }

    /// Create a server over an existing registry.
    pub fn with_registry(config: ServerConfig, registry: Arc<SessionRegistry>) -> Self {
        let (router, tasks) = EventRouter::spawn(registry.clone(), config.queue_capacity);
        let connections = ConnectionManager::new(registry, router, config.connection_config());
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            connections,
            tasks,
            shutdown_tx,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(index_handler))
            .route("/host", post(create_session_handler))
            .route("/host/{code}", get(host_listen_handler))
            .route("/host/{code}/lock", post(lock_handler))
            .route("/host/{code}/reset", post(reset_handler))
            .route("/play/{code}", get(play_handler))
            .route("/play/{code}/buzz", post(buzz_handler))
            .with_state(self.connections.clone())
            .layer(CorsLayer::permissive())
    }

    /// Run the server until [`shutdown`](Self::shutdown) is called.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(ServerError::Bind)?;
        info!("Buzzer server v{} listening on {}", self.config.version, listener.local_addr()?);

        let registry = self.connections.registry().clone();

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Shutdown signal received");
                // Ends every open stream so graceful shutdown can finish
                let closed = registry.clear().await;
                info!("Closed {} sessions", closed);
            })
            .await?;

        self.tasks.abort();
        Ok(())
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Connection manager shared with the handlers.
    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get live session count.
    pub async fn session_count(&self) -> usize {
        self.connections.registry().session_count().await
    }
}

/// Serialize frames as SSE `data:` events. A frame that fails to serialize
/// ends the stream, which closes that connection only.
fn sse_frames(
    frames: impl Stream<Item = ServerFrame> + Send + 'static,
) -> impl Stream<Item = Result<SseEvent, serde_json::Error>> + Send + 'static {
    frames.map(|frame| {
        frame
            .to_json()
            .map(|json| SseEvent::default().data(json))
            .map_err(|e| {
                error!("Failed to encode frame: {}", e);
                e
            })
    })
}

/// GET /
async fn index_handler() -> StatusCode {
    StatusCode::OK
}

/// POST /host
async fn create_session_handler(
    State(connections): State<ConnectionManager>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), SessionError> {
    let session_code = connections.create_session().await?;
    Ok((StatusCode::CREATED, Json(CreateSessionResponse { session_code })))
}

/// GET /host/{code}
async fn host_listen_handler(
    State(connections): State<ConnectionManager>,
    Path(code): Path<String>,
) -> Result<
    Sse<impl Stream<Item = Result<SseEvent, serde_json::Error>> + Send + 'static>,
    SessionError,
> {
    let host = connections.open_host(&code).await?;
    Ok(Sse::new(sse_frames(host.into_stream())))
}

/// POST /host/{code}/lock
async fn lock_handler(
    State(connections): State<ConnectionManager>,
    Path(code): Path<String>,
) -> Result<StatusCode, SessionError> {
    connections.host_action(&code, Action::Lock).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /host/{code}/reset
async fn reset_handler(
    State(connections): State<ConnectionManager>,
    Path(code): Path<String>,
) -> Result<StatusCode, SessionError> {
    connections.host_action(&code, Action::Reset).await?;
    Ok(StatusCode::ACCEPTED)
}

/// GET /play/{code}?name=
async fn play_handler(
    State(connections): State<ConnectionManager>,
    Path(code): Path<String>,
    Query(query): Query<JoinQuery>,
) -> Result<
    Sse<impl Stream<Item = Result<SseEvent, serde_json::Error>> + Send + 'static>,
    SessionError,
> {
    let player = connections.open_player(&code, query.name).await?;
    Ok(Sse::new(sse_frames(player.into_stream())))
}

/// POST /play/{code}/buzz
async fn buzz_handler(
    State(connections): State<ConnectionManager>,
    Path(code): Path<String>,
    Json(request): Json<BuzzRequest>,
) -> Result<StatusCode, SessionError> {
    connections.buzz(&code, request.player_id).await?;
    Ok(StatusCode::CREATED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    use crate::core::ids::FixedIds;
    use crate::game::state::SessionCode;

    const WAIT: Duration = Duration::from_secs(1);

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            heartbeat_interval: None,
            ..Default::default()
        }
    }

    fn make_server(ids: impl IntoIterator<Item = u32>) -> BuzzerServer {
        let registry = Arc::new(SessionRegistry::with_id_generator(FixedIds::new(ids)));
        BuzzerServer::with_registry(test_config(), registry)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, json: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    /// Reads SSE events off a streaming body.
    struct EventReader {
        body: axum::body::BodyDataStream,
        buffer: String,
    }

    impl EventReader {
        fn new(resp: Response) -> Self {
            Self {
                body: resp.into_body().into_data_stream(),
                buffer: String::new(),
            }
        }

        async fn next_json(&mut self) -> serde_json::Value {
            loop {
                if let Some(end) = self.buffer.find("\n\n") {
                    let event: String = self.buffer.drain(..end + 2).collect();
                    let data = event
                        .lines()
                        .find_map(|line| line.strip_prefix("data:"))
                        .expect("event without data line");
                    return serde_json::from_str(data.trim()).unwrap();
                }

                let chunk = tokio::time::timeout(WAIT, self.body.next())
                    .await
                    .expect("timed out waiting for event")
                    .expect("stream ended")
                    .unwrap();
                self.buffer.push_str(std::str::from_utf8(&chunk).unwrap());
            }
        }

        async fn next_action(&mut self, action: &str) -> serde_json::Value {
            loop {
                let event = self.next_json().await;
                if event["action"] == action {
                    return event;
                }
            }
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.heartbeat_interval, Some(Duration::from_secs(1)));
        assert_eq!(config.subscriber_buffer, DEFAULT_SUBSCRIBER_BUFFER);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            SessionError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SessionError::NotFound(SessionCode(1)).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            SessionError::Collision("session code").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            SessionError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_server_creation_and_shutdown() {
        let server = BuzzerServer::new(test_config());
        assert_eq!(server.session_count().await, 0);
        server.shutdown();
        // Should not panic
    }

    #[tokio::test]
    async fn test_index_returns_ok() {
        let server = make_server([482913]);
        let resp = server.router().oneshot(get_request("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_returns_404() {
        let server = make_server([482913]);
        let resp = server.router().oneshot(get_request("/nonexistent")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_session() {
        let server = make_server([482913]);
        let resp = server.router().oneshot(post_request("/host")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let body = json_body(resp).await;
        assert_eq!(body["sessionCode"], 482913);
        assert_eq!(server.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_create_session_collision_is_server_error() {
        let server = make_server([482913, 482913]);
        server.router().oneshot(post_request("/host")).await.unwrap();

        let resp = server.router().oneshot(post_request("/host")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json_body(resp).await["error"].as_str().unwrap().contains("collision"));
        assert_eq!(server.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_subscribe_to_missing_session() {
        let server = make_server([482913]);
        server.router().oneshot(post_request("/host")).await.unwrap();

        let resp = server.router().oneshot(get_request("/play/1?name=Ann")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(resp).await["error"], "session [1] not found");

        let resp = server.router().oneshot(get_request("/host/1")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = server.router().oneshot(get_request("/host/4294967296")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = server.router().oneshot(get_request("/play/abc")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let registry = server.connections().registry();
        assert_eq!(registry.session_count().await, 1);
        assert_eq!(registry.participant_count().await, 0);
    }

    #[tokio::test]
    async fn test_malformed_buzz_is_rejected() {
        let server = make_server([482913]);
        server.router().oneshot(post_request("/host")).await.unwrap();

        let resp = server
            .router()
            .oneshot(post_json("/play/482913/buzz", r#"{"playerID": "nope"}"#))
            .await
            .unwrap();
        assert!(resp.status().is_client_error());

        let resp = server
            .router()
            .oneshot(post_json("/play/482913/buzz", "not json"))
            .await
            .unwrap();
        assert!(resp.status().is_client_error());

        let resp = server
            .router()
            .oneshot(post_json("/play/482913/buzz", r#"{"playerID": 42}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_host_controls() {
        let server = make_server([482913]);
        server.router().oneshot(post_request("/host")).await.unwrap();

        for uri in ["/host/482913/lock", "/host/482913/reset"] {
            let resp = server.router().oneshot(post_request(uri)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::ACCEPTED);
        }

        let resp = server.router().oneshot(post_request("/host/1/lock")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_player_stream_starts_with_ack() {
        let server = make_server([482913, 700001]);
        server.router().oneshot(post_request("/host")).await.unwrap();

        let resp = server
            .router()
            .oneshot(get_request("/play/482913?name=Ann"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "text/event-stream"
        );

        let mut events = EventReader::new(resp);
        let ack = events.next_json().await;
        assert_eq!(ack["sessionCode"], 482913);
        assert_eq!(ack["playerID"], 700001);
        assert_eq!(ack["playerName"], "Ann");
        assert!(ack.get("action").is_none());
    }

    #[tokio::test]
    async fn test_buzz_scenario_over_http() {
        let server = make_server([482913, 700001]);
        server.router().oneshot(post_request("/host")).await.unwrap();

        let mut ann = EventReader::new(
            server
                .router()
                .oneshot(get_request("/play/482913?name=Ann"))
                .await
                .unwrap(),
        );
        let ack = ann.next_json().await;
        let ann_id = ack["playerID"].as_u64().unwrap();

        let mut host =
            EventReader::new(server.router().oneshot(get_request("/host/482913")).await.unwrap());

        let resp = server
            .router()
            .oneshot(post_json(
                "/play/482913/buzz",
                &format!(r#"{{"playerID": {ann_id}}}"#),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let seen_by_host = host.next_action("buzz").await;
        assert_eq!(seen_by_host["sessionCode"], 482913);
        assert_eq!(seen_by_host["playerID"], ann_id);

        let seen_by_ann = ann.next_action("buzz").await;
        assert_eq!(seen_by_ann["playerName"], "Ann");

        // Host lock reaches the player
        server.router().oneshot(post_request("/host/482913/lock")).await.unwrap();
        ann.next_action("lock").await;
    }

    #[tokio::test]
    async fn test_closing_host_stream_ends_session() {
        let server = make_server([482913]);
        server.router().oneshot(post_request("/host")).await.unwrap();

        let resp = server.router().oneshot(get_request("/host/482913")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        drop(resp);

        tokio::time::timeout(WAIT, async {
            while server.session_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("session not removed");
    }

    #[tokio::test]
    async fn test_run_and_shutdown() {
        let server = Arc::new(make_server([482913]));
        let runner = server.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        server.shutdown();

        let result = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_run_reports_bind_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig {
            bind_addr: taken.local_addr().unwrap(),
            ..test_config()
        };
        let server = BuzzerServer::new(config);

        let result = server.run().await;
        assert!(matches!(result, Err(ServerError::Bind(_))));
        assert!(result.unwrap_err().to_string().starts_with("Failed to bind"));
    }
}
