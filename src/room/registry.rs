use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use super::code::{generate_unique_room_code, normalize_room_code};
use super::room::Room;
use crate::challenge::ChallengeRepository;
use crate::game::GameRegistry;
use crate::protocol::{RejectCode, RoomPhase, RoomSnapshot, ServerMessage};

/// Authority-owned room registry. Each room's mutations are serialized by
/// the DashMap entry lock (single writer per room), so commands from
/// different members never interleave into an inconsistent snapshot.
pub struct RoomRegistry {
    rooms: DashMap<String, Room>,
    player_rooms: DashMap<Uuid, String>, // player_id -> room code
    channels: DashMap<Uuid, broadcast::Sender<ServerMessage>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            player_rooms: DashMap::new(),
            channels: DashMap::new(),
        }
    }

    /// Bind a connection's outgoing channel to a player. Idempotent: a
    /// reconnecting player replaces the stale channel and keeps receiving
    /// events without becoming a duplicate member.
    pub fn register_channel(&self, player_id: Uuid, tx: broadcast::Sender<ServerMessage>) {
        debug!(%player_id, "Registering player channel");
        self.channels.insert(player_id, tx);
    }

    pub fn create_room(
        &self,
        player_id: Uuid,
        player_name: &str,
        max_players: u8,
    ) -> Result<RoomSnapshot, RejectCode> {
        if self.player_rooms.contains_key(&player_id) {
            return Err(RejectCode::AlreadyInRoom);
        }

        let code = generate_unique_room_code(|c| self.rooms.contains_key(c));
        let room = Room::create(code.clone(), player_id, player_name, max_players)?;
        let snapshot = room.snapshot();

        self.rooms.insert(code.clone(), room);
        self.player_rooms.insert(player_id, code.clone());

        info!(code, %player_id, max_players, "Room created");
        Ok(snapshot)
    }

    pub fn join_room(
        &self,
        player_id: Uuid,
        player_name: &str,
        raw_code: &str,
    ) -> Result<RoomSnapshot, RejectCode> {
        let code = normalize_room_code(raw_code)?;

        if self.player_rooms.contains_key(&player_id) {
            return Err(RejectCode::AlreadyInRoom);
        }

        let snapshot = {
            let mut room = self.rooms.get_mut(&code).ok_or(RejectCode::RoomNotFound)?;
            room.join(player_id, player_name)?;
            room.snapshot()
        };
        self.player_rooms.insert(player_id, code.clone());

        info!(code, %player_id, "Player joined room");
        self.broadcast(&snapshot, ServerMessage::PlayerJoined {
            room: snapshot.clone(),
            player_id,
        });
        Ok(snapshot)
    }

    pub fn set_ready(&self, player_id: Uuid, is_ready: bool) -> Result<RoomSnapshot, RejectCode> {
        let code = self
            .player_rooms
            .get(&player_id)
            .map(|c| c.clone())
            .ok_or(RejectCode::NotInRoom)?;

        let snapshot = {
            let mut room = self.rooms.get_mut(&code).ok_or(RejectCode::NotInRoom)?;
            room.set_ready(player_id, is_ready)?;
            room.snapshot()
        };

        debug!(code, %player_id, is_ready, "Ready flag changed");
        self.broadcast(&snapshot, ServerMessage::PlayerReadyChanged {
            room: snapshot.clone(),
            player_id,
            is_ready,
        });
        Ok(snapshot)
    }

    /// Remove a player from their room. Host status transfers to the
    /// earliest-joined remaining member; an emptied room is discarded.
    pub fn leave_room(&self, player_id: Uuid) -> Result<(), RejectCode> {
        let (_, code) = self
            .player_rooms
            .remove(&player_id)
            .ok_or(RejectCode::NotInRoom)?;

        let snapshot = {
            let mut room = self.rooms.get_mut(&code).ok_or(RejectCode::NotInRoom)?;
            let outcome = room.leave(player_id)?;
            if outcome.now_empty {
                None
            } else {
                Some(room.snapshot())
            }
        };

        match snapshot {
            None => {
                self.rooms.remove(&code);
                info!(code, %player_id, "Last player left, room discarded");
            }
            Some(snapshot) => {
                info!(code, %player_id, "Player left room");
                self.broadcast(&snapshot, ServerMessage::PlayerLeft {
                    room: snapshot.clone(),
                    player_id,
                });
            }
        }
        Ok(())
    }

    /// Host-only. Picks a challenge, creates the game, moves the room to
    /// `playing` and broadcasts a single `game_started` to every member,
    /// including the issuer.
    pub async fn start_game(
        &self,
        player_id: Uuid,
        raw_code: &str,
        challenges: &ChallengeRepository,
        games: &GameRegistry,
    ) -> Result<Uuid, RejectCode> {
        let code = normalize_room_code(raw_code)?;

        {
            let room = self.rooms.get(&code).ok_or(RejectCode::RoomNotFound)?;
            room.can_start(player_id)?;
        }

        // Challenge selection is the one await in the sequence; the start
        // preconditions are re-checked under the entry lock below so a
        // concurrent command cannot slip a second start through.
        let challenge = challenges
            .pick_random()
            .await
            .ok_or(RejectCode::NoChallengeAvailable)?;

        let (game_id, snapshot) = {
            let mut room = self.rooms.get_mut(&code).ok_or(RejectCode::RoomNotFound)?;
            room.can_start(player_id)?;
            let game_id = games.create_game(&code, &challenge, player_id);
            room.begin_game();
            (game_id, room.snapshot())
        };

        info!(code, %game_id, challenge_id = challenge.id, "Game started");
        self.broadcast(&snapshot, ServerMessage::GameStarted {
            room: snapshot.clone(),
            game_id,
        });
        Ok(game_id)
    }

    /// Snapshot of the caller's current room, if any.
    pub fn player_room_info(&self, player_id: Uuid) -> Option<RoomSnapshot> {
        let code = self.player_rooms.get(&player_id)?;
        let room = self.rooms.get(&*code)?;
        Some(room.snapshot())
    }

    pub fn room_snapshot(&self, raw_code: &str) -> Option<RoomSnapshot> {
        let code = normalize_room_code(raw_code).ok()?;
        let room = self.rooms.get(&code)?;
        Some(room.snapshot())
    }

    /// Move a room to `finished` when its game ends and broadcast the final
    /// snapshot.
    pub fn finish_room(&self, code: &str) {
        let snapshot = {
            let Some(mut room) = self.rooms.get_mut(code) else {
                return;
            };
            room.finish();
            room.snapshot()
        };
        self.broadcast(&snapshot, ServerMessage::RoomUpdated {
            room: snapshot.clone(),
        });
    }

    /// A dropped connection releases its channel. A player sitting in a
    /// waiting lobby is removed like an explicit leave; a player whose game
    /// is in progress keeps their seat so a reconnect can resume it.
    pub fn handle_disconnect(&self, player_id: Uuid) {
        info!(%player_id, "Player disconnected");
        self.channels.remove(&player_id);

        let waiting = self
            .player_rooms
            .get(&player_id)
            .and_then(|code| self.rooms.get(&*code).map(|r| r.phase == RoomPhase::Waiting))
            .unwrap_or(false);

        if waiting {
            let _ = self.leave_room(player_id);
        }
    }

    fn broadcast(&self, snapshot: &RoomSnapshot, msg: ServerMessage) {
        debug!(code = snapshot.code, "Broadcasting to room");
        for player in &snapshot.players {
            if let Some(tx) = self.channels.get(&player.id) {
                let _ = tx.send(msg.clone());
            }
        }
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
