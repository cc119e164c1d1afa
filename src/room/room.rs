use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::player::PlayerInRoom;
use crate::protocol::{RejectCode, RoomPhase, RoomSnapshot};

pub const MIN_CAPACITY: u8 = 2;
pub const MAX_CAPACITY: u8 = 8;

/// A waiting lobby of players sharing a join code (pure logic, no I/O).
///
/// Invariants enforced here: exactly one host while the room is non-empty,
/// membership never exceeds capacity, and the phase only ever moves
/// `Waiting -> Playing -> Finished`.
#[derive(Debug)]
pub struct Room {
    pub code: String,
    pub max_players: u8,
    pub phase: RoomPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    players: Vec<PlayerInRoom>,
}

/// What happened when a player left: whether the host role moved, and
/// whether the room is now empty and should be discarded.
#[derive(Debug, PartialEq)]
pub struct LeaveOutcome {
    pub new_host: Option<Uuid>,
    pub now_empty: bool,
}

impl Room {
    /// Create a room with the caller as sole member and host.
    pub fn create(code: String, host_id: Uuid, host_name: &str, max_players: u8) -> Result<Self, RejectCode> {
        if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&max_players) {
            return Err(RejectCode::InvalidCapacity);
        }

        let mut host = PlayerInRoom::new(host_id, host_name);
        host.is_host = true;

        let now = Utc::now();
        Ok(Self {
            code,
            max_players,
            phase: RoomPhase::Waiting,
            created_at: now,
            updated_at: now,
            players: vec![host],
        })
    }

    pub fn host_id(&self) -> Uuid {
        // Creation installs a host and leave() reassigns in the same
        // mutation, so a non-empty room always has one.
        self.players
            .iter()
            .find(|p| p.is_host)
            .map(|p| p.id)
            .unwrap_or_default()
    }

    pub fn contains(&self, player_id: Uuid) -> bool {
        self.players.iter().any(|p| p.id == player_id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Add a member. Capacity is checked before insertion: a rejected join
    /// leaves membership unchanged.
    pub fn join(&mut self, player_id: Uuid, name: &str) -> Result<(), RejectCode> {
        if self.phase != RoomPhase::Waiting {
            return Err(RejectCode::GameAlreadyStarted);
        }
        if self.players.len() >= self.max_players as usize {
            return Err(RejectCode::RoomFull);
        }
        if self.contains(player_id) {
            return Err(RejectCode::AlreadyInRoom);
        }

        self.players.push(PlayerInRoom::new(player_id, name));
        self.touch();
        Ok(())
    }

    pub fn set_ready(&mut self, player_id: Uuid, is_ready: bool) -> Result<(), RejectCode> {
        let player = self
            .players
            .iter_mut()
            .find(|p| p.id == player_id)
            .ok_or(RejectCode::NotInRoom)?;
        player.is_ready = is_ready;
        self.touch();
        Ok(())
    }

    /// Remove a member. If the host leaves, host status transfers to the
    /// earliest-joined remaining member in the same mutation.
    pub fn leave(&mut self, player_id: Uuid) -> Result<LeaveOutcome, RejectCode> {
        let idx = self
            .players
            .iter()
            .position(|p| p.id == player_id)
            .ok_or(RejectCode::NotInRoom)?;

        let was_host = self.players[idx].is_host;
        self.players.remove(idx);
        self.touch();

        if self.players.is_empty() {
            return Ok(LeaveOutcome {
                new_host: None,
                now_empty: true,
            });
        }

        let mut new_host = None;
        if was_host {
            let successor = self
                .players
                .iter_mut()
                .min_by_key(|p| p.joined_at)
                .expect("non-empty room has a successor");
            successor.is_host = true;
            new_host = Some(successor.id);
        }

        Ok(LeaveOutcome {
            new_host,
            now_empty: false,
        })
    }

    /// Check the start preconditions without mutating anything. Host-only,
    /// all members ready, at least two members.
    pub fn can_start(&self, player_id: Uuid) -> Result<(), RejectCode> {
        if self.phase != RoomPhase::Waiting {
            return Err(RejectCode::GameAlreadyStarted);
        }
        if self.host_id() != player_id {
            return Err(RejectCode::NotHost);
        }
        if self.players.len() < MIN_CAPACITY as usize {
            return Err(RejectCode::InsufficientPlayers);
        }
        if !self.players.iter().all(|p| p.is_ready) {
            return Err(RejectCode::NotAllReady);
        }
        Ok(())
    }

    pub fn begin_game(&mut self) {
        self.phase = RoomPhase::Playing;
        self.touch();
    }

    pub fn finish(&mut self) {
        if self.phase == RoomPhase::Playing {
            self.phase = RoomPhase::Finished;
            self.touch();
        }
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            code: self.code.clone(),
            host_id: self.host_id(),
            max_players: self.max_players,
            players: self.players.iter().map(|p| p.snapshot()).collect(),
            game_state: self.phase,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room_with(host: Uuid, max: u8) -> Room {
        Room::create("ABC123".to_string(), host, "Host", max).unwrap()
    }

    #[test]
    fn create_makes_caller_sole_member_and_host() {
        let host = Uuid::new_v4();
        let room = room_with(host, 4);

        assert_eq!(room.player_count(), 1);
        assert_eq!(room.host_id(), host);
        assert_eq!(room.phase, RoomPhase::Waiting);
    }

    #[test]
    fn create_rejects_capacity_outside_allowed_range() {
        let host = Uuid::new_v4();
        assert_eq!(
            Room::create("ABC123".into(), host, "Host", 1).unwrap_err(),
            RejectCode::InvalidCapacity
        );
        assert_eq!(
            Room::create("ABC123".into(), host, "Host", 9).unwrap_err(),
            RejectCode::InvalidCapacity
        );
    }

    #[test]
    fn join_beyond_capacity_is_rejected_and_membership_unchanged() {
        let mut room = room_with(Uuid::new_v4(), 2);
        room.join(Uuid::new_v4(), "P2").unwrap();

        let late = Uuid::new_v4();
        assert_eq!(room.join(late, "P3"), Err(RejectCode::RoomFull));
        assert_eq!(room.player_count(), 2);
        assert!(!room.contains(late));
    }

    #[test]
    fn join_after_start_is_rejected() {
        let host = Uuid::new_v4();
        let mut room = room_with(host, 4);
        room.join(Uuid::new_v4(), "P2").unwrap();
        room.begin_game();

        assert_eq!(
            room.join(Uuid::new_v4(), "P3"),
            Err(RejectCode::GameAlreadyStarted)
        );
    }

    #[test]
    fn host_leave_transfers_to_earliest_joined_member() {
        let host = Uuid::new_v4();
        let second = Uuid::new_v4();
        let third = Uuid::new_v4();
        let mut room = room_with(host, 4);
        room.join(second, "P2").unwrap();
        room.join(third, "P3").unwrap();

        let outcome = room.leave(host).unwrap();

        assert_eq!(outcome.new_host, Some(second));
        assert_eq!(room.host_id(), second);
        // exactly one host remains
        let hosts = room.snapshot().players.iter().filter(|p| p.is_host).count();
        assert_eq!(hosts, 1);
    }

    #[test]
    fn non_host_leave_keeps_host() {
        let host = Uuid::new_v4();
        let second = Uuid::new_v4();
        let mut room = room_with(host, 4);
        room.join(second, "P2").unwrap();

        let outcome = room.leave(second).unwrap();

        assert_eq!(outcome.new_host, None);
        assert_eq!(room.host_id(), host);
    }

    #[test]
    fn last_leave_reports_empty() {
        let host = Uuid::new_v4();
        let mut room = room_with(host, 4);

        let outcome = room.leave(host).unwrap();
        assert!(outcome.now_empty);
    }

    #[test]
    fn start_requires_host_readiness_and_two_players() {
        let host = Uuid::new_v4();
        let second = Uuid::new_v4();
        let mut room = room_with(host, 4);

        assert_eq!(room.can_start(host), Err(RejectCode::InsufficientPlayers));

        room.join(second, "P2").unwrap();
        assert_eq!(room.can_start(second), Err(RejectCode::NotHost));
        assert_eq!(room.can_start(host), Err(RejectCode::NotAllReady));

        room.set_ready(second, true).unwrap();
        assert_eq!(room.can_start(host), Err(RejectCode::NotAllReady));

        room.set_ready(host, true).unwrap();
        assert_eq!(room.can_start(host), Ok(()));
    }

    #[test]
    fn phase_never_skips_a_state() {
        let host = Uuid::new_v4();
        let mut room = room_with(host, 4);

        // finish() from waiting is a no-op; only playing rooms finish
        room.finish();
        assert_eq!(room.phase, RoomPhase::Waiting);

        room.begin_game();
        assert_eq!(room.phase, RoomPhase::Playing);

        room.finish();
        assert_eq!(room.phase, RoomPhase::Finished);
    }

    #[test]
    fn set_ready_for_stranger_is_not_in_room() {
        let mut room = room_with(Uuid::new_v4(), 4);
        assert_eq!(
            room.set_ready(Uuid::new_v4(), true),
            Err(RejectCode::NotInRoom)
        );
    }
}
