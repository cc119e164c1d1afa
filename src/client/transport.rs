//! Session transport for talking to the room authority.
//!
//! [`SessionTransport`] is a thin handle in front of a background loop that
//! owns the websocket. Commands are matched to their acknowledgements by a
//! connection-local request id; room events broadcast by the authority are
//! surfaced on a bounded event channel. When the connection drops the loop
//! reconnects with exponential backoff and re-announces the registered
//! player, so a transient outage does not cost the player their seat.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::protocol::{
    AckPayload, ClientCommand, CommandKind, CommandOutcome, RejectCode, RoomSnapshot,
    ServerMessage,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const RECONNECT_INITIAL_DELAY: Duration = Duration::from_millis(500);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("session closed")]
    Closed,
}

/// Failure of a single command: either the authority said no, or the
/// connection went away before the acknowledgement arrived.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("rejected: {0}")]
    Rejected(RejectCode),
    #[error(transparent)]
    Transport(TransportError),
    #[error("acknowledgement carried an unexpected payload")]
    UnexpectedPayload,
}

/// Connection-level notifications plus every non-acknowledgement message
/// from the authority. Delivered on a bounded channel; when the consumer
/// falls behind, room events are dropped (each one carries a full snapshot,
/// so a later event restores a consistent view).
#[derive(Debug)]
pub enum SessionEvent {
    Connected,
    Reconnected,
    Disconnected { reason: Option<String> },
    Message(ServerMessage),
}

/// Raw text-frame connection. Split out as a trait so the session loop can
/// be driven by a scripted peer in tests.
#[async_trait]
pub trait Connection: Send + 'static {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;
    async fn close(&mut self);
}

/// Produces fresh connections for the initial connect and every reconnect.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    async fn connect(&self) -> Result<Self::Conn, TransportError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsConnection {
    stream: WsStream,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::ConnectionLost(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(_)) => return None,
                // Pings are answered by tungstenite itself.
                Ok(_) => continue,
                Err(e) => return Some(Err(TransportError::ConnectionLost(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Conn = WsConnection;

    async fn connect(&self) -> Result<WsConnection, TransportError> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(WsConnection { stream })
    }
}

struct Request {
    kind: CommandKind,
    reply: oneshot::Sender<Result<CommandOutcome, CommandError>>,
}

/// State shared between the handle and the session loop.
struct SessionState {
    player_id: StdMutex<Option<Uuid>>,
}

/// Handle to a running session. Dropping the handle closes the command
/// channel, which shuts the background loop down.
pub struct SessionTransport {
    cmd_tx: mpsc::UnboundedSender<Request>,
    state: Arc<SessionState>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl SessionTransport {
    /// Connect to the authority's websocket endpoint and start the session
    /// loop. Fails fast if the initial connect fails; reconnects after that
    /// are handled inside the loop.
    pub async fn connect(
        url: impl Into<String>,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), TransportError> {
        Self::start(WsConnector::new(url)).await
    }

    /// Start a session over any [`Connector`].
    pub async fn start<C: Connector>(
        connector: C,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), TransportError> {
        let initial = connector.connect().await?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Request>();
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(EVENT_CHANNEL_CAPACITY);
        let state = Arc::new(SessionState {
            player_id: StdMutex::new(None),
        });

        let task = tokio::spawn(session_loop(
            connector,
            initial,
            cmd_rx,
            event_tx,
            Arc::clone(&state),
        ));

        let transport = Self {
            cmd_tx,
            state,
            task: Some(task),
        };
        Ok((transport, event_rx))
    }

    /// The player id the authority assigned at registration, if any.
    pub fn player_id(&self) -> Option<Uuid> {
        *self.state.player_id.lock().expect("player id lock poisoned")
    }

    /// Send a command and await its acknowledgement.
    pub async fn command(&self, kind: CommandKind) -> Result<CommandOutcome, CommandError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Request {
                kind,
                reply: reply_tx,
            })
            .map_err(|_| CommandError::Transport(TransportError::Closed))?;
        reply_rx
            .await
            .map_err(|_| CommandError::Transport(TransportError::Closed))?
    }

    pub async fn register(&self, name: &str) -> Result<Uuid, CommandError> {
        match self
            .command(CommandKind::Register {
                name: name.to_string(),
            })
            .await?
        {
            CommandOutcome::Accepted {
                payload: AckPayload::Registered { player_id },
            } => Ok(player_id),
            outcome => Err(unexpected(outcome)),
        }
    }

    pub async fn create_room(
        &self,
        player_name: &str,
        max_players: u8,
    ) -> Result<RoomSnapshot, CommandError> {
        match self
            .command(CommandKind::CreateRoom {
                player_name: player_name.to_string(),
                max_players,
            })
            .await?
        {
            CommandOutcome::Accepted {
                payload: AckPayload::Room { room },
            } => Ok(room),
            outcome => Err(unexpected(outcome)),
        }
    }

    pub async fn join_room(&self, room_code: &str) -> Result<RoomSnapshot, CommandError> {
        match self
            .command(CommandKind::JoinRoom {
                room_code: room_code.to_string(),
            })
            .await?
        {
            CommandOutcome::Accepted {
                payload: AckPayload::Room { room },
            } => Ok(room),
            outcome => Err(unexpected(outcome)),
        }
    }

    pub async fn set_ready(&self, is_ready: bool) -> Result<(), CommandError> {
        match self.command(CommandKind::SetReady { is_ready }).await? {
            CommandOutcome::Accepted { .. } => Ok(()),
            outcome => Err(unexpected(outcome)),
        }
    }

    pub async fn leave_room(&self) -> Result<(), CommandError> {
        match self.command(CommandKind::LeaveRoom).await? {
            CommandOutcome::Accepted { .. } => Ok(()),
            outcome => Err(unexpected(outcome)),
        }
    }

    pub async fn start_game(&self, room_code: &str) -> Result<Uuid, CommandError> {
        match self
            .command(CommandKind::StartGame {
                room_code: room_code.to_string(),
            })
            .await?
        {
            CommandOutcome::Accepted {
                payload: AckPayload::GameStarted { game_id },
            } => Ok(game_id),
            outcome => Err(unexpected(outcome)),
        }
    }

    pub async fn room_info(&self) -> Result<Option<RoomSnapshot>, CommandError> {
        match self.command(CommandKind::GetPlayerRoomInfo).await? {
            CommandOutcome::Accepted {
                payload: AckPayload::RoomInfo { room },
            } => Ok(room),
            outcome => Err(unexpected(outcome)),
        }
    }

    /// Close the session and wait for the loop to exit.
    pub async fn close(mut self) {
        // Closing the command channel is the shutdown signal.
        drop(std::mem::replace(&mut self.cmd_tx, mpsc::unbounded_channel().0));
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(Duration::from_secs(1), task).await.is_err() {
                warn!("Session loop did not exit in time");
            }
        }
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        // The loop notices the closed command channel on its own; abort only
        // so the task cannot outlive the runtime during teardown.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn unexpected(outcome: CommandOutcome) -> CommandError {
    match outcome {
        CommandOutcome::Rejected { code } => CommandError::Rejected(code),
        CommandOutcome::Accepted { .. } => CommandError::UnexpectedPayload,
    }
}

async fn session_loop<C: Connector>(
    connector: C,
    initial: C::Conn,
    mut cmd_rx: mpsc::UnboundedReceiver<Request>,
    event_tx: mpsc::Sender<SessionEvent>,
    state: Arc<SessionState>,
) {
    let mut conn = Some(initial);
    let mut pending: HashMap<u64, oneshot::Sender<Result<CommandOutcome, CommandError>>> =
        HashMap::new();
    let mut next_id: u64 = 1;
    let mut first_connect = true;

    loop {
        let mut transport = match conn.take() {
            Some(t) => t,
            None => match wait_for_reconnect(&connector, &mut cmd_rx, &event_tx).await {
                Some(t) => t,
                None => return,
            },
        };

        if first_connect {
            emit_event(&event_tx, SessionEvent::Connected);
            first_connect = false;
        } else {
            emit_event(&event_tx, SessionEvent::Reconnected);
            // Re-announce the registered player so the authority re-binds
            // the event channel for this connection.
            let known = *state.player_id.lock().expect("player id lock poisoned");
            if let Some(player_id) = known {
                let id = next_id;
                next_id += 1;
                let frame = ClientCommand {
                    id,
                    kind: CommandKind::Rejoin { player_id },
                };
                if let Ok(json) = serde_json::to_string(&frame) {
                    if let Err(e) = transport.send(json).await {
                        warn!(%e, "Rejoin send failed");
                        continue;
                    }
                }
            }
        }

        let reason = serve(
            &mut transport,
            &mut cmd_rx,
            &event_tx,
            &state,
            &mut pending,
            &mut next_id,
        )
        .await;

        // Callers that were waiting on this connection can never get their
        // acknowledgements now.
        fail_pending(&mut pending);

        match reason {
            ServeExit::Shutdown => {
                transport.close().await;
                let _ = event_tx
                    .send(SessionEvent::Disconnected {
                        reason: Some("session closed".to_string()),
                    })
                    .await;
                return;
            }
            ServeExit::ConnectionLost(reason) => {
                emit_event(&event_tx, SessionEvent::Disconnected { reason });
            }
        }
    }
}

enum ServeExit {
    /// Handle dropped or [`SessionTransport::close`] called.
    Shutdown,
    ConnectionLost(Option<String>),
}

async fn serve<T: Connection>(
    transport: &mut T,
    cmd_rx: &mut mpsc::UnboundedReceiver<Request>,
    event_tx: &mpsc::Sender<SessionEvent>,
    state: &SessionState,
    pending: &mut HashMap<u64, oneshot::Sender<Result<CommandOutcome, CommandError>>>,
    next_id: &mut u64,
) -> ServeExit {
    loop {
        tokio::select! {
            request = cmd_rx.recv() => {
                let Some(Request { kind, reply }) = request else {
                    debug!("Command channel closed, shutting down session loop");
                    return ServeExit::Shutdown;
                };
                let id = *next_id;
                *next_id += 1;
                let frame = ClientCommand { id, kind };
                match serde_json::to_string(&frame) {
                    Ok(json) => {
                        if let Err(e) = transport.send(json).await {
                            let reason = e.to_string();
                            let _ = reply.send(Err(CommandError::Transport(
                                TransportError::ConnectionLost(reason.clone()),
                            )));
                            return ServeExit::ConnectionLost(Some(reason));
                        }
                        pending.insert(id, reply);
                    }
                    Err(e) => {
                        error!(%e, "Failed to serialize command");
                        let _ = reply.send(Err(CommandError::Transport(
                            TransportError::ConnectionLost(e.to_string()),
                        )));
                    }
                }
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => handle_incoming(&text, event_tx, state, pending),
                    Some(Err(e)) => {
                        warn!(%e, "Transport receive error");
                        return ServeExit::ConnectionLost(Some(e.to_string()));
                    }
                    None => {
                        debug!("Connection closed by authority");
                        return ServeExit::ConnectionLost(None);
                    }
                }
            }
        }
    }
}

fn handle_incoming(
    text: &str,
    event_tx: &mpsc::Sender<SessionEvent>,
    state: &SessionState,
    pending: &mut HashMap<u64, oneshot::Sender<Result<CommandOutcome, CommandError>>>,
) {
    let message = match serde_json::from_str::<ServerMessage>(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(%e, raw = text, "Unparseable message from authority");
            return;
        }
    };

    match message {
        ServerMessage::Ack { id, result } => {
            if let CommandOutcome::Accepted {
                payload: AckPayload::Registered { player_id },
            } = &result
            {
                *state.player_id.lock().expect("player id lock poisoned") = Some(*player_id);
                info!(%player_id, "Registered with authority");
            }
            match pending.remove(&id) {
                Some(reply) => {
                    let _ = reply.send(Ok(result));
                }
                // Acks for fire-and-forget frames (rejoin) land here.
                None => debug!(id, "Acknowledgement without a waiting caller"),
            }
        }
        other => emit_event(event_tx, SessionEvent::Message(other)),
    }
}

fn fail_pending(
    pending: &mut HashMap<u64, oneshot::Sender<Result<CommandOutcome, CommandError>>>,
) {
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(CommandError::Transport(TransportError::ConnectionLost(
            "connection lost before acknowledgement".to_string(),
        ))));
    }
}

/// Reconnect with exponential backoff. Requests arriving while disconnected
/// fail fast instead of queueing against a dead connection. Returns `None`
/// when the handle is dropped mid-backoff.
async fn wait_for_reconnect<C: Connector>(
    connector: &C,
    cmd_rx: &mut mpsc::UnboundedReceiver<Request>,
    event_tx: &mpsc::Sender<SessionEvent>,
) -> Option<C::Conn> {
    let mut delay = RECONNECT_INITIAL_DELAY;
    loop {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                request = cmd_rx.recv() => {
                    let Some(Request { reply, .. }) = request else {
                        let _ = event_tx
                            .send(SessionEvent::Disconnected {
                                reason: Some("session closed".to_string()),
                            })
                            .await;
                        return None;
                    };
                    let _ = reply.send(Err(CommandError::Transport(
                        TransportError::ConnectionLost("reconnecting".to_string()),
                    )));
                }
            }
        }

        match connector.connect().await {
            Ok(conn) => {
                info!("Reconnected to authority");
                return Some(conn);
            }
            Err(e) => {
                warn!(%e, next_retry = ?delay, "Reconnect attempt failed");
                delay = (delay * 2).min(RECONNECT_MAX_DELAY);
            }
        }
    }
}

/// Forward an event without blocking the session loop. `Disconnected` is
/// sent with `send().await` at the loop's exit points instead, so the final
/// event is never dropped.
fn emit_event(event_tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!("Event channel full, dropping {:?}", std::mem::discriminant(&dropped));
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Event channel closed, receiver dropped");
        }
    }
}
