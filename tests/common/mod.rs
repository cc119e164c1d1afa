use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use uuid::Uuid;

use testclash::protocol::{
    AckPayload, ClientCommand, CommandKind, CommandOutcome, RoomSnapshot, ServerMessage,
};

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestServer {
    base_url: String,
}

impl TestServer {
    pub fn ws_url(&self) -> String {
        format!("{}/ws", self.base_url)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!(
            "http://{}{}",
            self.base_url.strip_prefix("ws://").unwrap(),
            path
        )
    }
}

pub async fn spawn_test_server() -> TestServer {
    let pool = sqlx::SqlitePool::connect(":memory:").await.unwrap();
    sqlx::migrate!().run(&pool).await.unwrap();
    seed_challenge(&pool).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let app = testclash::app(pool);
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("ws://{}", addr),
    }
}

async fn seed_challenge(pool: &sqlx::SqlitePool) {
    sqlx::query(
        "INSERT INTO challenges (title, base_code, test_template, duration_secs) VALUES (?, ?, ?, ?)",
    )
    .bind("string utils")
    .bind("public static class StringUtils { }")
    .bind("[TestClass]\npublic class Tests { }")
    .bind(900_i64)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn connect(server: &TestServer) -> WsStream {
    let (ws, _) = connect_async(server.ws_url().as_str())
        .await
        .expect("Failed to connect");
    ws
}

pub async fn send_cmd(ws: &mut WsStream, id: u64, kind: CommandKind) {
    let json = serde_json::to_string(&ClientCommand { id, kind }).unwrap();
    ws.send(Message::Text(json.into())).await.unwrap();
}

pub async fn recv(ws: &mut WsStream) -> ServerMessage {
    let msg = ws.next().await.unwrap().unwrap();
    serde_json::from_str(msg.to_text().unwrap()).unwrap()
}

/// Read messages until the acknowledgement for `id` arrives, discarding
/// broadcast events that precede it.
pub async fn recv_ack(ws: &mut WsStream, id: u64) -> CommandOutcome {
    loop {
        if let ServerMessage::Ack { id: ack_id, result } = recv(ws).await {
            assert_eq!(ack_id, id, "acknowledgement out of order");
            return result;
        }
    }
}

pub async fn register(ws: &mut WsStream, id: u64, name: &str) -> Uuid {
    send_cmd(
        ws,
        id,
        CommandKind::Register {
            name: name.to_string(),
        },
    )
    .await;
    match recv_ack(ws, id).await {
        CommandOutcome::Accepted {
            payload: AckPayload::Registered { player_id },
        } => player_id,
        other => panic!("expected registration ack, got {other:?}"),
    }
}

pub async fn create_room(ws: &mut WsStream, id: u64, name: &str, max_players: u8) -> RoomSnapshot {
    send_cmd(
        ws,
        id,
        CommandKind::CreateRoom {
            player_name: name.to_string(),
            max_players,
        },
    )
    .await;
    expect_room(recv_ack(ws, id).await)
}

pub async fn join_room(ws: &mut WsStream, id: u64, room_code: &str) -> RoomSnapshot {
    send_cmd(
        ws,
        id,
        CommandKind::JoinRoom {
            room_code: room_code.to_string(),
        },
    )
    .await;
    expect_room(recv_ack(ws, id).await)
}

pub async fn set_ready(ws: &mut WsStream, id: u64, is_ready: bool) -> RoomSnapshot {
    send_cmd(ws, id, CommandKind::SetReady { is_ready }).await;
    expect_room(recv_ack(ws, id).await)
}

pub fn expect_room(outcome: CommandOutcome) -> RoomSnapshot {
    match outcome {
        CommandOutcome::Accepted {
            payload: AckPayload::Room { room },
        } => room,
        other => panic!("expected a room payload, got {other:?}"),
    }
}
