use chrono::Utc;
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use super::game::{Game, SubmitError, Submission};
use crate::challenge::Challenge;
use crate::protocol::GameSnapshot;

/// Result of an end-game request. The operation is idempotent so that two
/// clients independently observing the deadline cannot double-finish.
#[derive(Debug, PartialEq, Eq)]
pub struct EndOutcome {
    pub room_code: String,
    pub already_finished: bool,
}

/// Authority-owned set of in-flight and finished games.
pub struct GameRegistry {
    games: DashMap<Uuid, Game>,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self {
            games: DashMap::new(),
        }
    }

    pub fn create_game(&self, room_code: &str, challenge: &Challenge, host_id: Uuid) -> Uuid {
        let game = Game::new(room_code, challenge.id, challenge.duration_secs, host_id);
        let game_id = game.id;
        info!(
            %game_id,
            room_code,
            challenge_id = challenge.id,
            total_duration = challenge.duration_secs,
            "Game created"
        );
        self.games.insert(game_id, game);
        game_id
    }

    pub fn snapshot(&self, game_id: Uuid) -> Option<GameSnapshot> {
        let game = self.games.get(&game_id)?;
        Some(game.snapshot(Utc::now()))
    }

    /// Idempotent end. The first call transitions the game; later calls
    /// report `already_finished` and change nothing.
    pub fn end_game(&self, game_id: Uuid) -> Option<EndOutcome> {
        let mut game = self.games.get_mut(&game_id)?;
        let transitioned = game.finish();
        if transitioned {
            info!(%game_id, "Game ended");
        }
        Some(EndOutcome {
            room_code: game.room_code.clone(),
            already_finished: !transitioned,
        })
    }

    pub fn submit(
        &self,
        game_id: Uuid,
        player_id: Uuid,
        test_code: &str,
    ) -> Option<Result<(), SubmitError>> {
        let mut game = self.games.get_mut(&game_id)?;
        Some(game.submit(player_id, test_code))
    }

    pub fn last_submission(&self, game_id: Uuid, player_id: Uuid) -> Option<Submission> {
        let game = self.games.get(&game_id)?;
        game.last_submission(player_id).cloned()
    }
}

impl Default for GameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge() -> Challenge {
        Challenge {
            id: 1,
            title: "Calculator".to_string(),
            base_code: "class Calculator {}".to_string(),
            test_template: String::new(),
            duration_secs: 900,
        }
    }

    #[test]
    fn end_game_is_idempotent() {
        let reg = GameRegistry::new();
        let game_id = reg.create_game("ABC123", &challenge(), Uuid::new_v4());

        let first = reg.end_game(game_id).unwrap();
        assert!(!first.already_finished);
        assert_eq!(first.room_code, "ABC123");

        let second = reg.end_game(game_id).unwrap();
        assert!(second.already_finished);
    }

    #[test]
    fn end_game_for_unknown_id_is_none() {
        let reg = GameRegistry::new();
        assert!(reg.end_game(Uuid::new_v4()).is_none());
    }

    #[test]
    fn submit_after_end_is_rejected() {
        let reg = GameRegistry::new();
        let game_id = reg.create_game("ABC123", &challenge(), Uuid::new_v4());
        let player = Uuid::new_v4();

        reg.submit(game_id, player, "tests v1").unwrap().unwrap();
        reg.end_game(game_id);

        assert_eq!(
            reg.submit(game_id, player, "tests v2").unwrap(),
            Err(SubmitError::GameFinished)
        );
        assert_eq!(
            reg.last_submission(game_id, player).unwrap().test_code,
            "tests v1"
        );
    }
}
