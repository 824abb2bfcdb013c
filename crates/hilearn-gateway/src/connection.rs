use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hilearn_db::Database;
use hilearn_types::api::Claims;
use hilearn_types::events::{ErrorCode, GatewayCommand, GatewayEvent};

use crate::auth::verify_token;
use crate::chat;
use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long an unauthenticated socket may stay open waiting for `identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket timing knobs. Defaults are the production values.
#[derive(Debug, Clone, Copy)]
pub struct GatewayTimings {
    pub heartbeat_interval: Duration,
    pub identify_timeout: Duration,
}

impl Default for GatewayTimings {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            identify_timeout: IDENTIFY_TIMEOUT,
        }
    }
}

/// Everything a connection needs from the server.
#[derive(Clone)]
pub struct GatewayContext {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: Arc<str>,
    pub timings: GatewayTimings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Disconnected -> Connecting -> Connected -> Disconnected. A handshake
    /// may also fail straight from Connecting back to Disconnected.
    pub fn advance(self, next: ConnectionState) -> Option<ConnectionState> {
        use ConnectionState::*;
        match (self, next) {
            (Disconnected, Connecting)
            | (Connecting, Connected)
            | (Connecting, Disconnected)
            | (Connected, Disconnected) => Some(next),
            _ => None,
        }
    }
}

/// Tracks one socket's lifecycle and logs each step.
struct Lifecycle {
    state: ConnectionState,
}

impl Lifecycle {
    fn new() -> Self {
        let mut lifecycle = Self {
            state: ConnectionState::Disconnected,
        };
        lifecycle.to(ConnectionState::Connecting);
        lifecycle
    }

    fn to(&mut self, next: ConnectionState) {
        match self.state.advance(next) {
            Some(state) => {
                debug!("connection {:?} -> {:?}", self.state, state);
                self.state = state;
            }
            None => warn!("ignored connection transition {:?} -> {:?}", self.state, next),
        }
    }
}

/// Handle a connection whose token was validated at the HTTP upgrade.
pub async fn handle_connection_authenticated(socket: WebSocket, ctx: GatewayContext, claims: Claims) {
    let mut lifecycle = Lifecycle::new();
    let (sender, receiver) = socket.split();
    run_connection_loop(sender, receiver, ctx, claims, &mut lifecycle).await;
    lifecycle.to(ConnectionState::Disconnected);
}

/// Handle a connection that did not present a token at upgrade time.
/// The first frame must be `identify`; anything else closes the socket.
pub async fn handle_connection(socket: WebSocket, ctx: GatewayContext) {
    let mut lifecycle = Lifecycle::new();
    let (mut sender, mut receiver) = socket.split();

    let Some(claims) =
        wait_for_identify(&mut receiver, &ctx.jwt_secret, ctx.timings.identify_timeout).await
    else {
        warn!("WebSocket client failed to identify, closing");
        let _ = sender.send(Message::Close(None)).await;
        lifecycle.to(ConnectionState::Disconnected);
        return;
    };

    run_connection_loop(sender, receiver, ctx, claims, &mut lifecycle).await;
    lifecycle.to(ConnectionState::Disconnected);
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    ctx: GatewayContext,
    claims: Claims,
    lifecycle: &mut Lifecycle,
) {
    let user_id = claims.sub;
    let name = claims.name.clone();

    let ready = GatewayEvent::Ready {
        user_id,
        name: name.clone(),
        role: claims.role,
    };
    // Joined before `ready`, so room events sent after it always arrive
    let (conn_id, mut room_rx) = ctx.dispatcher.join(user_id).await;

    let sent = match encode(&ready) {
        Some(frame) => sender.send(frame).await.is_ok(),
        None => false,
    };
    if !sent {
        ctx.dispatcher.leave(user_id, conn_id).await;
        return;
    }

    lifecycle.to(ConnectionState::Connected);
    info!("{} ({}) connected to gateway", name, user_id);

    // Events meant for this connection only (command errors)
    let (direct_tx, mut direct_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let heartbeat_interval = ctx.timings.heartbeat_interval;
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            let event = tokio::select! {
                event = room_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                event = direct_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let Some(frame) = encode(&event) else { continue };
            if sender.send(frame).await.is_err() {
                break;
            }
        }
    });

    let recv_ctx = ctx.clone();
    let recv_name = name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(text.as_str()) {
                    Ok(cmd) => handle_command(&recv_ctx, user_id, &recv_name, cmd, &direct_tx).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_name,
                            user_id,
                            e,
                            text.as_str().chars().take(200).collect::<String>()
                        );
                        let _ = direct_tx.send(GatewayEvent::Error {
                            code: ErrorCode::BadCommand,
                            message: "unrecognized command".into(),
                        });
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    ctx.dispatcher.leave(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", name, user_id);
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
    timeout: Duration,
) -> Option<Claims> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                return match serde_json::from_str::<GatewayCommand>(text.as_str()) {
                    Ok(GatewayCommand::Identify { token }) => verify_token(jwt_secret, &token),
                    _ => None,
                };
            }
        }
        None
    };

    tokio::time::timeout(timeout, identify).await.ok().flatten()
}

async fn handle_command(
    ctx: &GatewayContext,
    user_id: Uuid,
    name: &str,
    cmd: GatewayCommand,
    direct_tx: &mpsc::UnboundedSender<GatewayEvent>,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already authenticated

        GatewayCommand::SendMessage { receiver_id, message } => {
            debug!("{} ({}) -> message to {}", name, user_id, receiver_id);
            if let Err(e) =
                chat::send_message(&ctx.db, &ctx.dispatcher, user_id, receiver_id, &message).await
            {
                warn!("{} ({}) sendMessage to {} failed: {}", name, user_id, receiver_id, e);
                let _ = direct_tx.send(e.to_event());
            }
        }
    }
}

fn encode(event: &GatewayEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            None
        }
    }
}
