//! ControlChannel: the bridge's single outbound WebSocket to the platform.
//!
//! One session at a time. A session opens the socket, identifies, then pumps
//! frames until the socket closes; on close the channel goes back to idle and
//! schedules a reconnect with jittered exponential backoff. Requests are
//! dispatched on their own tasks so a slow handler never stalls the reader.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tether_core::{Backoff, ConnectionMachine, ConnectionState};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ControlLink;
use super::protocol::{ClientMessage, ServerMessage, parse_server_message};
use crate::dispatch::Dispatcher;
use crate::metrics::BridgeMetrics;

#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub url: String,
    pub identity_token: String,
    pub registration_token: Option<String>,
    pub backoff: Backoff,
    pub connect_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("handshake did not complete within {0:?}")]
    ConnectTimeout(Duration),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct ControlChannel {
    config: ControlConfig,
    machine: Mutex<ConnectionMachine>,
    /// Writer queue of the live session, if any.
    outbound: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<BridgeMetrics>,
    cancel: CancellationToken,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ControlChannel {
    pub fn new(
        config: ControlConfig,
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<BridgeMetrics>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            machine: Mutex::new(ConnectionMachine::new()),
            outbound: Mutex::new(None),
            dispatcher,
            metrics,
            cancel,
        })
    }

    /// Start a session if the channel is idle. Calling this while a session
    /// is connecting or ready is a no-op and returns false.
    pub fn connect(self: &Arc<Self>) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        if !lock(&self.machine).begin_connect() {
            debug!("control channel already active, ignoring connect");
            return false;
        }
        let this = Arc::clone(self);
        tokio::spawn(this.run_session());
        true
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.machine).state()
    }

    /// Stop reconnecting and close the live session.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Queue a message on the live session. Refused unless identified.
    pub fn send(&self, msg: ClientMessage) -> bool {
        if !lock(&self.machine).is_ready() {
            warn!(kind = msg.kind(), "control channel not ready, dropping message");
            self.metrics.message_dropped();
            return false;
        }
        let kind = msg.kind();
        let sent = lock(&self.outbound)
            .as_ref()
            .is_some_and(|tx| tx.send(msg).is_ok());
        if !sent {
            warn!(kind, "control session gone, dropping message");
            self.metrics.message_dropped();
        }
        sent
    }

    async fn run_session(self: Arc<Self>) {
        if let Err(e) = self.session().await {
            warn!(url = %self.config.url, error = %e, "control session ended with error");
        }

        *lock(&self.outbound) = None;
        let attempt = lock(&self.machine).on_close();

        if self.cancel.is_cancelled() {
            info!("control channel shut down");
            return;
        }
        let Some(attempt) = attempt else {
            return;
        };

        let delay = self.config.backoff.jittered(attempt, &mut rand::rng());
        self.metrics.reconnect_scheduled();
        info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling control reconnect");

        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                self.connect();
            }
        }
    }

    async fn session(self: &Arc<Self>) -> Result<(), ControlError> {
        let handshake = tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(self.config.url.as_str()),
        );
        let (ws, _) = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            result = handshake => result
                .map_err(|_| ControlError::ConnectTimeout(self.config.connect_timeout))??,
        };
        lock(&self.machine).on_open();
        self.metrics.session_opened();
        info!(url = %self.config.url, "control channel open");

        let (mut ws_write, mut ws_read) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel();
        *lock(&self.outbound) = Some(tx.clone());

        // Identify goes out before the readiness gate opens
        let _ = tx.send(ClientMessage::Identify {
            identity_token: self.config.identity_token.clone(),
            registration_token: self.config.registration_token.clone(),
        });

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = ws_write.send(Message::Close(None)).await;
                    return Ok(());
                }

                Some(msg) = rx.recv() => {
                    let json = serde_json::to_string(&msg)?;
                    ws_write.send(Message::Text(json.into())).await?;
                    self.metrics.message_sent();
                }

                frame = ws_read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str(), &tx),
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "control channel closed by peer");
                        return Ok(());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(len = data.len(), "ignoring binary control frame");
                        self.metrics.protocol_error();
                    }
                    // tungstenite answers transport pings itself
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                },
            }
        }
    }

    fn handle_text(self: &Arc<Self>, text: &str, tx: &mpsc::UnboundedSender<ClientMessage>) {
        let msg = match parse_server_message(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "ignoring malformed control frame");
                self.metrics.protocol_error();
                return;
            }
        };

        match msg {
            ServerMessage::IdentifyResponse { error: Some(err) } => {
                let mut machine = lock(&self.machine);
                let was_ready = machine.is_ready();
                machine.on_identified(true);
                drop(machine);
                if was_ready {
                    error!(error = %err, "platform revoked identity, sends paused");
                } else {
                    error!(error = %err, "platform rejected identify");
                }
            }
            ServerMessage::IdentifyResponse { error: None } => {
                if lock(&self.machine).on_identified(false) {
                    info!("control channel identified");
                }
            }
            ServerMessage::ConnectionConfirmed => {
                info!("platform confirmed connection");
            }
            ServerMessage::Request {
                request_id,
                payload,
            } => {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let response = this.dispatcher.dispatch(request_id, payload).await;
                    this.send(response);
                });
            }
            ServerMessage::Ping => {
                let _ = tx.send(ClientMessage::Pong);
            }
            ServerMessage::Error { message, code } => {
                warn!(?message, ?code, "platform reported an error");
            }
            ServerMessage::Unknown => {
                warn!("ignoring control message of unknown type");
                self.metrics.protocol_error();
            }
        }
    }
}

impl ControlLink for ControlChannel {
    fn send(&self, msg: ClientMessage) -> bool {
        ControlChannel::send(self, msg)
    }

    fn state(&self) -> ConnectionState {
        ControlChannel::state(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::test_context;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::WebSocketStream;

    type ServerSocket = WebSocketStream<tokio::net::TcpStream>;

    async fn next_json(ws: &mut ServerSocket) -> Value {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {other:?}"),
            }
        }
    }

    async fn send_json(ws: &mut ServerSocket, value: Value) {
        ws.send(Message::Text(value.to_string().into())).await.unwrap();
    }

    fn channel_for(url: String) -> Arc<ControlChannel> {
        channel_with_timeout(url, Duration::from_secs(2))
    }

    fn channel_with_timeout(url: String, connect_timeout: Duration) -> Arc<ControlChannel> {
        let (ctx, _game) = test_context(Duration::from_millis(200));
        let metrics = ctx.metrics.clone();
        let dispatcher = Arc::new(Dispatcher::new(ctx));
        ControlChannel::new(
            ControlConfig {
                url,
                identity_token: "ident".into(),
                registration_token: Some("reg".into()),
                backoff: Backoff::new(Duration::from_millis(10), Duration::from_millis(50)),
                connect_timeout,
            },
            dispatcher,
            metrics,
            CancellationToken::new(),
        )
    }

    async fn wait_for_state(channel: &ControlChannel, want: ConnectionState) {
        for _ in 0..200 {
            if channel.state() == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("channel never reached {want}");
    }

    #[tokio::test]
    async fn test_send_refused_until_identified() {
        let channel = channel_for("ws://127.0.0.1:9/unused".into());
        assert_eq!(channel.state(), ConnectionState::Idle);
        assert!(!channel.send(ClientMessage::Pong));
        assert_eq!(channel.metrics.snapshot().control.messages_dropped, 1);
    }

    #[tokio::test]
    async fn test_session_identify_request_and_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let channel = channel_for(format!("ws://{addr}"));

        assert!(channel.connect());
        // A second connect while a session is active is ignored
        assert!(!channel.connect());

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let identify = next_json(&mut ws).await;
        assert_eq!(
            identify,
            json!({"type": "identify", "identityToken": "ident", "registrationToken": "reg"})
        );

        send_json(&mut ws, json!({"type": "identify_response", "error": null})).await;
        wait_for_state(&channel, ConnectionState::Ready).await;

        send_json(&mut ws, json!({"type": "ping"})).await;
        assert_eq!(next_json(&mut ws).await, json!({"type": "pong"}));

        send_json(
            &mut ws,
            json!({"type": "request", "requestId": "req-7", "payload": {"action": "listOperators", "args": {}}}),
        )
        .await;
        assert_eq!(
            next_json(&mut ws).await,
            json!({"type": "response", "requestId": "req-7", "payload": []})
        );

        // Garbage is counted and ignored; the session survives
        ws.send(Message::Text("{oops".into())).await.unwrap();
        send_json(&mut ws, json!({"type": "request", "requestId": "req-8", "payload": {"action": "nope"}})).await;
        assert_eq!(
            next_json(&mut ws).await,
            json!({"type": "response", "requestId": "req-8", "payload": {"error": "Unknown action: nope"}})
        );
        assert_eq!(channel.metrics.snapshot().control.protocol_errors, 1);

        // Server drops the session; the channel comes back and identifies again
        ws.close(None).await.unwrap();
        drop(ws);

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        assert_eq!(next_json(&mut ws).await["type"], "identify");
        assert_eq!(channel.state(), ConnectionState::Connecting);
        assert!(channel.metrics.snapshot().control.reconnects_scheduled >= 1);

        channel.shutdown();
    }

    #[tokio::test]
    async fn test_rejected_identify_stays_unready() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let channel = channel_for(format!("ws://{addr}"));
        channel.connect();

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        next_json(&mut ws).await;

        send_json(&mut ws, json!({"type": "identify_response", "error": "bad token"})).await;
        send_json(&mut ws, json!({"type": "connection_confirmed"})).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(channel.state(), ConnectionState::Connecting);
        assert!(!channel.send(ClientMessage::Pong));
        channel.shutdown();
    }

    #[tokio::test]
    async fn test_rejection_after_ready_pauses_sends() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let channel = channel_for(format!("ws://{addr}"));
        channel.connect();

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        next_json(&mut ws).await;

        send_json(&mut ws, json!({"type": "identify_response", "error": null})).await;
        wait_for_state(&channel, ConnectionState::Ready).await;

        send_json(&mut ws, json!({"type": "identify_response", "error": "token revoked"})).await;
        wait_for_state(&channel, ConnectionState::Connecting).await;
        assert!(!channel.send(ClientMessage::Pong));
        channel.shutdown();
    }

    #[tokio::test]
    async fn test_binary_frame_counted_and_ignored() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let channel = channel_for(format!("ws://{addr}"));
        channel.connect();

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        next_json(&mut ws).await;
        send_json(&mut ws, json!({"type": "identify_response", "error": null})).await;
        wait_for_state(&channel, ConnectionState::Ready).await;

        ws.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();
        send_json(
            &mut ws,
            json!({"type": "request", "requestId": "req-9", "payload": {"action": "listOperators"}}),
        )
        .await;
        assert_eq!(
            next_json(&mut ws).await,
            json!({"type": "response", "requestId": "req-9", "payload": []})
        );
        assert_eq!(channel.metrics.snapshot().control.protocol_errors, 1);
        assert_eq!(channel.state(), ConnectionState::Ready);
        channel.shutdown();
    }

    #[tokio::test]
    async fn test_stalled_handshake_times_out_and_retries() {
        // Accepted by the kernel backlog but never upgraded
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let channel = channel_with_timeout(format!("ws://{addr}"), Duration::from_millis(50));
        channel.connect();

        for _ in 0..200 {
            if channel.metrics.snapshot().control.reconnects_scheduled >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let control = channel.metrics.snapshot().control;
        assert!(control.reconnects_scheduled >= 2);
        assert_eq!(control.sessions_opened, 0);

        channel.shutdown();
        drop(listener);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let channel = channel_with_timeout(format!("ws://{addr}"), Duration::from_secs(30));
        channel.connect();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(channel.state(), ConnectionState::Connecting);

        channel.shutdown();
        wait_for_state(&channel, ConnectionState::Idle).await;
        assert_eq!(channel.metrics.snapshot().control.reconnects_scheduled, 0);
        drop(listener);
    }
}
