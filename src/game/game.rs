use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::remaining_seconds;
use crate::protocol::{GamePhase, GameSnapshot};

/// A single timed competitive session created from a room. The countdown is
/// never stored: `remaining` is always derived from `started_at` and
/// `total_duration`, which is what keeps reconnecting clients honest.
#[derive(Debug)]
pub struct Game {
    pub id: Uuid,
    pub room_code: String,
    pub challenge_id: i64,
    pub host_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub total_duration: u64,
    pub phase: GamePhase,
    pub finished_at: Option<DateTime<Utc>>,
    submissions: HashMap<Uuid, Submission>,
}

/// The most recent accepted test code for a (player, game) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub player_id: Uuid,
    pub game_id: Uuid,
    pub test_code: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("game has already finished")]
    GameFinished,
}

impl Game {
    pub fn new(room_code: &str, challenge_id: i64, total_duration: u64, host_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_code: room_code.to_string(),
            challenge_id,
            host_id,
            started_at: Utc::now(),
            total_duration,
            phase: GamePhase::Playing,
            finished_at: None,
            submissions: HashMap::new(),
        }
    }

    /// Transition to `finished`. Idempotent: returns true only on the call
    /// that actually performed the transition.
    pub fn finish(&mut self) -> bool {
        if self.phase == GamePhase::Finished {
            return false;
        }
        self.phase = GamePhase::Finished;
        self.finished_at = Some(Utc::now());
        true
    }

    /// Accept test code for a player. Most recent accepted submission wins;
    /// anything arriving after the game finished is rejected.
    pub fn submit(&mut self, player_id: Uuid, test_code: &str) -> Result<(), SubmitError> {
        if self.phase == GamePhase::Finished {
            return Err(SubmitError::GameFinished);
        }
        self.submissions.insert(player_id, Submission {
            player_id,
            game_id: self.id,
            test_code: test_code.to_string(),
            submitted_at: Utc::now(),
        });
        Ok(())
    }

    pub fn last_submission(&self, player_id: Uuid) -> Option<&Submission> {
        self.submissions.get(&player_id)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> GameSnapshot {
        GameSnapshot {
            id: self.id,
            room_code: self.room_code.clone(),
            challenge_id: self.challenge_id,
            host_id: self.host_id,
            game_state: self.phase,
            started_at: self.started_at,
            total_duration: self.total_duration,
            remaining_seconds: remaining_seconds(self.started_at, self.total_duration, now),
            finished_at: self.finished_at,
        }
    }
}
