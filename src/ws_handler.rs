use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{
    AckPayload, ClientCommand, CommandKind, CommandOutcome, RejectCode, ServerMessage,
};
use crate::AppState;

struct ConnectionContext {
    player_id: Option<Uuid>,
    player_name: String,
}

pub async fn handle_connection(socket: WebSocket, state: AppState) {
    info!("New WebSocket connection");
    let (mut sender, receiver) = socket.split();
    let (tx, mut rx) = broadcast::channel::<ServerMessage>(32);

    let send_task = tokio::spawn(async move {
        while let Ok(msg) = rx.recv().await {
            debug!(?msg, "Sending message to client");
            let json = serde_json::to_string(&msg).expect("server message serializes");
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let state_clone = state.clone();
    let recv_task = tokio::spawn(handle_incoming(receiver, tx, state_clone));

    tokio::select! {
        _ = send_task => {},
        result = recv_task => {
            if let Ok(Some(player_id)) = result {
                state.rooms.handle_disconnect(player_id);
            }
        },
    }

    info!("WebSocket connection closed");
}

async fn handle_incoming(
    mut receiver: futures_util::stream::SplitStream<WebSocket>,
    tx: broadcast::Sender<ServerMessage>,
    state: AppState,
) -> Option<Uuid> {
    let mut ctx = ConnectionContext {
        player_id: None,
        player_name: String::new(),
    };

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else {
            debug!("Received non-text message, ignoring");
            continue;
        };

        debug!(raw = %text, "Received command");

        let Ok(command) = serde_json::from_str::<ClientCommand>(&text) else {
            warn!(raw = %text, "Failed to parse client command");
            let _ = tx.send(ServerMessage::Error {
                message: "malformed command".to_string(),
            });
            continue;
        };

        let result = handle_command(command.kind, &tx, &state, &mut ctx).await;
        let _ = tx.send(ServerMessage::Ack {
            id: command.id,
            result,
        });
    }

    ctx.player_id
}

async fn handle_command(
    kind: CommandKind,
    tx: &broadcast::Sender<ServerMessage>,
    state: &AppState,
    ctx: &mut ConnectionContext,
) -> CommandOutcome {
    match kind {
        CommandKind::Register { name } => {
            let player_id = Uuid::new_v4();
            info!(%player_id, name, "Player registered");
            ctx.player_id = Some(player_id);
            ctx.player_name = name;
            state.rooms.register_channel(player_id, tx.clone());
            accepted(AckPayload::Registered { player_id })
        }
        CommandKind::Rejoin { player_id } => {
            // Idempotent presence re-announcement: rebind the channel so
            // the authority resumes delivery, never add a second member.
            info!(%player_id, "Player rejoined");
            ctx.player_id = Some(player_id);
            state.rooms.register_channel(player_id, tx.clone());
            accepted(AckPayload::RoomInfo {
                room: state.rooms.player_room_info(player_id),
            })
        }
        CommandKind::CreateRoom {
            player_name,
            max_players,
        } => {
            let Some(player_id) = ctx.player_id else {
                return rejected(RejectCode::NotRegistered);
            };
            ctx.player_name = player_name;
            match state
                .rooms
                .create_room(player_id, &ctx.player_name, max_players)
            {
                Ok(room) => accepted(AckPayload::Room { room }),
                Err(code) => rejected(code),
            }
        }
        CommandKind::JoinRoom { room_code } => {
            let Some(player_id) = ctx.player_id else {
                return rejected(RejectCode::NotRegistered);
            };
            match state
                .rooms
                .join_room(player_id, &ctx.player_name, &room_code)
            {
                Ok(room) => accepted(AckPayload::Room { room }),
                Err(code) => rejected(code),
            }
        }
        CommandKind::SetReady { is_ready } => {
            let Some(player_id) = ctx.player_id else {
                return rejected(RejectCode::NotRegistered);
            };
            match state.rooms.set_ready(player_id, is_ready) {
                Ok(room) => accepted(AckPayload::Room { room }),
                Err(code) => rejected(code),
            }
        }
        CommandKind::LeaveRoom => {
            let Some(player_id) = ctx.player_id else {
                return rejected(RejectCode::NotRegistered);
            };
            match state.rooms.leave_room(player_id) {
                Ok(()) => accepted(AckPayload::Ack),
                Err(code) => rejected(code),
            }
        }
        CommandKind::StartGame { room_code } => {
            let Some(player_id) = ctx.player_id else {
                return rejected(RejectCode::NotRegistered);
            };
            match state
                .rooms
                .start_game(player_id, &room_code, &state.challenges, &state.games)
                .await
            {
                Ok(game_id) => accepted(AckPayload::GameStarted { game_id }),
                Err(code) => rejected(code),
            }
        }
        CommandKind::GetPlayerRoomInfo => {
            let Some(player_id) = ctx.player_id else {
                return rejected(RejectCode::NotRegistered);
            };
            accepted(AckPayload::RoomInfo {
                room: state.rooms.player_room_info(player_id),
            })
        }
    }
}

fn accepted(payload: AckPayload) -> CommandOutcome {
    CommandOutcome::Accepted { payload }
}

fn rejected(code: RejectCode) -> CommandOutcome {
    CommandOutcome::Rejected { code }
}
