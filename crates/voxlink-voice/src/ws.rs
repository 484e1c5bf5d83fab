//! WebSocket client for the voice service.
//!
//! One task owns each socket. It forwards outbound audio frames, parses
//! inbound text frames into [`InboundEvent`]s and reports exactly one
//! `Closed` when the socket goes away.

use crate::config::{Credentials, ServiceConfig};
use crate::error::VoiceError;
use crate::transport::{ConnectOptions, Transport, TransportEvent, TransportEvents, VoiceClient};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;
use voxlink_types::{InboundEvent, OutboundFrame};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long to wait for the peer to answer our close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Audio frames queued for a socket that is not keeping up. About three
/// seconds of capture at the default chunk interval.
const OUTBOUND_BUFFER: usize = 32;

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// [`VoiceClient`] speaking the service's JSON-over-WebSocket protocol.
pub struct WsVoiceClient {
    config: ServiceConfig,
    credentials: Credentials,
    http: reqwest::Client,
}

impl std::fmt::Debug for WsVoiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsVoiceClient")
            .field("url", &self.config.url)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl WsVoiceClient {
    pub fn new(config: ServiceConfig, credentials: Credentials) -> Result<Self, VoiceError> {
        Url::parse(&config.url)
            .map_err(|e| VoiceError::Config(format!("invalid service url: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            credentials,
            http,
        })
    }

    /// Exchanges the key and secret for a short-lived access token.
    async fn fetch_access_token(&self, token_url: &str) -> Result<String, VoiceError> {
        let response = self
            .http
            .post(token_url)
            .basic_auth(
                self.credentials.api_key(),
                Some(self.credentials.secret_key()),
            )
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| VoiceError::Connection(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VoiceError::Connection(format!(
                "token request rejected with {status}"
            )));
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Connection(format!("invalid token response: {e}")))?;
        Ok(body.access_token)
    }

    async fn endpoint(&self, options: &ConnectOptions) -> Result<Url, VoiceError> {
        let access_token = match &self.config.token_url {
            Some(token_url) => Some(self.fetch_access_token(token_url).await?),
            None => None,
        };

        let mut url = Url::parse(&self.config.url)
            .map_err(|e| VoiceError::Config(format!("invalid service url: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(token) = &access_token {
                query.append_pair("access_token", token);
            }
            if let Some(config_id) = self.credentials.config_id() {
                query.append_pair("config_id", config_id);
            }
            if let Some(group_id) = &options.resume_group_id {
                query.append_pair("resumed_chat_group_id", group_id);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl VoiceClient for WsVoiceClient {
    async fn connect(
        &self,
        options: ConnectOptions,
        events: TransportEvents,
    ) -> Result<Arc<dyn Transport>, VoiceError> {
        let url = self.endpoint(&options).await?;
        let host = url.host_str().unwrap_or_default().to_string();

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| VoiceError::Connection(format!("invalid websocket request: {e}")))?;
        if self.config.token_url.is_none() {
            let key = HeaderValue::from_str(self.credentials.api_key())
                .map_err(|_| VoiceError::Config("API key is not a valid header value".to_string()))?;
            request.headers_mut().insert(API_KEY_HEADER, key);
        }

        let (socket, response) = connect_async(request)
            .await
            .map_err(|e| VoiceError::Connection(format!("websocket handshake failed: {e}")))?;
        info!(
            %host,
            status = %response.status(),
            generation = events.generation(),
            "voice service socket open"
        );

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let close = Arc::new(Notify::new());
        events.emit(TransportEvent::Opened);
        tokio::spawn(pump(socket, outbound_rx, close.clone(), events));

        Ok(Arc::new(WsTransport {
            outbound: outbound_tx,
            close,
            closed: AtomicBool::new(false),
        }))
    }
}

#[derive(Debug)]
struct WsTransport {
    outbound: mpsc::Sender<String>,
    close: Arc<Notify>,
    closed: AtomicBool,
}

impl Transport for WsTransport {
    fn send_audio_input(&self, encoded: String) -> Result<(), VoiceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VoiceError::Transport("transport is closed".to_string()));
        }
        let frame = serde_json::to_string(&OutboundFrame::AudioInput { data: encoded })
            .map_err(|e| VoiceError::Transport(format!("failed to encode frame: {e}")))?;
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => VoiceError::Transport(format!(
                "outbound buffer full ({OUTBOUND_BUFFER} frames), socket is not keeping up"
            )),
            mpsc::error::TrySendError::Closed(_) => {
                VoiceError::Transport("socket task has stopped".to_string())
            }
        })
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close.notify_one();
        }
    }
}

/// Drives one socket until it closes, then reports `Closed` once.
async fn pump(
    mut socket: Socket,
    mut outbound: mpsc::Receiver<String>,
    close: Arc<Notify>,
    events: TransportEvents,
) {
    let mut closing = false;
    let reason = loop {
        tokio::select! {
            frame = outbound.recv(), if !closing => match frame {
                Some(text) => {
                    if let Err(e) = socket.send(Message::Text(text.into())).await {
                        events.emit(TransportEvent::Error(format!("send failed: {e}")));
                        break format!("send failed: {e}");
                    }
                }
                None => {
                    closing = true;
                    if let Err(e) = socket.close(None).await {
                        debug!(error = %e, "close handshake failed");
                        break "closed by client".to_string();
                    }
                }
            },
            () = close.notified(), if !closing => {
                closing = true;
                if let Err(e) = socket.close(None).await {
                    debug!(error = %e, "close handshake failed");
                    break "closed by client".to_string();
                }
            },
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let event = match serde_json::from_str::<InboundEvent>(text.as_str()) {
                        Ok(event) => TransportEvent::Message(event),
                        Err(e) => TransportEvent::Error(format!("unparseable service frame: {e}")),
                    };
                    events.emit(event);
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => format!("{} {}", frame.code, frame.reason),
                        None if closing => "closed by client".to_string(),
                        None => "closed by peer".to_string(),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if closing {
                        break "closed by client".to_string();
                    }
                    warn!(error = %e, "voice service socket error");
                    events.emit(TransportEvent::Error(e.to_string()));
                    break e.to_string();
                }
                None => break "connection ended".to_string(),
            },
            _ = tokio::time::sleep(CLOSE_GRACE), if closing => {
                break "closed by client".to_string();
            }
        }
    };
    debug!(generation = events.generation(), %reason, "voice service socket closed");
    events.emit(TransportEvent::Closed { reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Signal;
    use axum::extract::ws::{Message as ServerMessage, WebSocket, WebSocketUpgrade};
    use axum::extract::{Query, State};
    use axum::http::HeaderMap;
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Default)]
    struct Seen {
        query: HashMap<String, String>,
        api_key: Option<String>,
        authorization: Option<String>,
        token_body: Option<String>,
    }

    type Shared = Arc<Mutex<Seen>>;

    async fn chat(
        ws: WebSocketUpgrade,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
        State(seen): State<Shared>,
    ) -> impl IntoResponse {
        {
            let mut seen = seen.lock().unwrap();
            seen.query = query;
            seen.api_key = headers
                .get(API_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
        }
        ws.on_upgrade(echo_session)
    }

    /// Sends metadata, then answers every audio input with audio output.
    async fn echo_session(mut socket: WebSocket) {
        let metadata = r#"{"type":"chat_metadata","chat_group_id":"grp-1","chat_id":"c-1"}"#;
        if socket.send(ServerMessage::Text(metadata.into())).await.is_err() {
            return;
        }
        while let Some(Ok(message)) = socket.recv().await {
            if let ServerMessage::Text(text) = message {
                let frame: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                let reply = serde_json::json!({
                    "type": "audio_output",
                    "data": frame["data"],
                });
                let _ = socket
                    .send(ServerMessage::Text(reply.to_string().into()))
                    .await;
            }
        }
    }

    async fn garbage(ws: WebSocketUpgrade) -> impl IntoResponse {
        ws.on_upgrade(|mut socket: WebSocket| async move {
            let _ = socket.send(ServerMessage::Text("not json".into())).await;
            let _ = socket.send(ServerMessage::Close(None)).await;
        })
    }

    async fn token(
        headers: HeaderMap,
        State(seen): State<Shared>,
        body: String,
    ) -> Json<serde_json::Value> {
        let mut seen = seen.lock().unwrap();
        seen.authorization = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        seen.token_body = Some(body);
        Json(serde_json::json!({ "access_token": "tok-1", "expires_in": 600 }))
    }

    async fn serve() -> (SocketAddr, Shared) {
        let seen = Shared::default();
        let app = Router::new()
            .route("/v0/chat", get(chat))
            .route("/garbage", get(garbage))
            .route("/oauth/token", post(token))
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, seen)
    }

    fn config(url: String, token_url: Option<String>) -> ServiceConfig {
        ServiceConfig {
            url,
            token_url,
            ..Default::default()
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<Signal>) -> TransportEvent {
        let signal = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("signal channel closed");
        match signal {
            Signal::Transport { generation, event } => {
                assert_eq!(generation, 7);
                event
            }
            other => panic!("unexpected signal: {other:?}"),
        }
    }

    #[tokio::test]
    async fn exchanges_frames_with_api_key_auth() {
        let (addr, seen) = serve().await;
        let credentials = Credentials::new("key-1", "secret-1", Some("cfg-1".into())).unwrap();
        let client =
            WsVoiceClient::new(config(format!("ws://{addr}/v0/chat"), None), credentials).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = ConnectOptions {
            resume_group_id: Some("grp-0".to_string()),
        };
        let transport = client
            .connect(options, TransportEvents::new(7, tx))
            .await
            .unwrap();

        assert_eq!(next_event(&mut rx).await, TransportEvent::Opened);
        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::Message(InboundEvent::ChatMetadata {
                chat_group_id: "grp-1".to_string(),
                chat_id: Some("c-1".to_string()),
            })
        );

        transport.send_audio_input("aGk=".to_string()).unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            TransportEvent::Message(InboundEvent::AudioOutput {
                data: "aGk=".to_string(),
                id: None,
            })
        );

        {
            let seen = seen.lock().unwrap();
            assert_eq!(seen.api_key.as_deref(), Some("key-1"));
            assert_eq!(seen.query.get("config_id").map(String::as_str), Some("cfg-1"));
            assert_eq!(
                seen.query.get("resumed_chat_group_id").map(String::as_str),
                Some("grp-0")
            );
            assert!(!seen.query.contains_key("access_token"));
        }

        transport.close();
        transport.close();
        assert!(matches!(
            next_event(&mut rx).await,
            TransportEvent::Closed { .. }
        ));
        assert!(transport.send_audio_input("aGk=".to_string()).is_err());
    }

    #[tokio::test]
    async fn bad_frames_become_errors_then_close() {
        let (addr, _seen) = serve().await;
        let credentials = Credentials::new("key-1", "secret-1", None).unwrap();
        let client =
            WsVoiceClient::new(config(format!("ws://{addr}/garbage"), None), credentials).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _transport = client
            .connect(ConnectOptions::default(), TransportEvents::new(7, tx))
            .await
            .unwrap();

        assert_eq!(next_event(&mut rx).await, TransportEvent::Opened);
        assert!(matches!(next_event(&mut rx).await, TransportEvent::Error(_)));
        assert!(matches!(
            next_event(&mut rx).await,
            TransportEvent::Closed { .. }
        ));
    }

    #[tokio::test]
    async fn token_exchange_replaces_api_key_header() {
        let (addr, seen) = serve().await;
        let credentials = Credentials::new("key-1", "secret-1", None).unwrap();
        let client = WsVoiceClient::new(
            config(
                format!("ws://{addr}/v0/chat"),
                Some(format!("http://{addr}/oauth/token")),
            ),
            credentials,
        )
        .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _transport = client
            .connect(ConnectOptions::default(), TransportEvents::new(7, tx))
            .await
            .unwrap();
        assert_eq!(next_event(&mut rx).await, TransportEvent::Opened);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.api_key, None);
        assert_eq!(
            seen.query.get("access_token").map(String::as_str),
            Some("tok-1")
        );
        assert!(!seen.query.contains_key("resumed_chat_group_id"));
        assert_eq!(
            seen.token_body.as_deref(),
            Some("grant_type=client_credentials")
        );
        let expected = format!("Basic {}", {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.encode("key-1:secret-1")
        });
        assert_eq!(seen.authorization.as_deref(), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn refused_handshake_is_a_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let credentials = Credentials::new("key-1", "secret-1", None).unwrap();
        let client =
            WsVoiceClient::new(config(format!("ws://{addr}/v0/chat"), None), credentials).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = client
            .connect(ConnectOptions::default(), TransportEvents::new(7, tx))
            .await;
        assert!(matches!(result, Err(VoiceError::Connection(_))));
    }

    fn idle_transport() -> (WsTransport, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let transport = WsTransport {
            outbound: tx,
            close: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
        };
        (transport, rx)
    }

    #[test]
    fn stalled_socket_reports_backpressure() {
        let (transport, mut rx) = idle_transport();
        for _ in 0..OUTBOUND_BUFFER {
            transport.send_audio_input("AAAA".to_string()).unwrap();
        }
        let err = transport.send_audio_input("AAAA".to_string()).unwrap_err();
        assert!(matches!(&err, VoiceError::Transport(m) if m.contains("buffer full")));

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame, r#"{"type":"audio_input","data":"AAAA"}"#);
        transport.send_audio_input("BBBB".to_string()).unwrap();

        drop(rx);
        let err = transport.send_audio_input("CCCC".to_string()).unwrap_err();
        assert!(matches!(&err, VoiceError::Transport(m) if m.contains("stopped")));
    }

    #[tokio::test]
    async fn close_is_delivered_even_with_a_full_buffer() {
        let (transport, _rx) = idle_transport();
        for _ in 0..OUTBOUND_BUFFER {
            transport.send_audio_input("AAAA".to_string()).unwrap();
        }
        transport.close();
        transport.close();

        tokio::time::timeout(Duration::from_secs(1), transport.close.notified())
            .await
            .expect("close request was lost");
        assert!(transport.send_audio_input("BBBB".to_string()).is_err());
    }
}
