use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::protocol::PlayerSnapshot;

/// A member of a room: identity plus the flags the lobby mutates.
#[derive(Debug, Clone)]
pub struct PlayerInRoom {
    pub id: Uuid,
    pub name: String,
    pub is_ready: bool,
    pub is_host: bool,
    pub joined_at: DateTime<Utc>,
}

impl PlayerInRoom {
    pub fn new(id: Uuid, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            is_ready: false,
            is_host: false,
            joined_at: Utc::now(),
        }
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id,
            name: self.name.clone(),
            is_ready: self.is_ready,
            is_host: self.is_host,
            joined_at: self.joined_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_player_is_neither_ready_nor_host() {
        let player = PlayerInRoom::new(Uuid::new_v4(), "Alice");
        assert!(!player.is_ready);
        assert!(!player.is_host);
        assert_eq!(player.name, "Alice");
    }
}
