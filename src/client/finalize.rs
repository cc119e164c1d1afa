use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use tracing::{info, warn};
use uuid::Uuid;

use super::services::CodeServices;

const NOT_STARTED: u8 = 0;
const FINALIZING: u8 = 1;
const FINALIZED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizePhase {
    NotStarted,
    Finalizing,
    Finalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeTrigger {
    /// The game clock reached zero.
    Deadline,
    /// The host chose to skip the rest of the countdown.
    HostSkip,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum FinalizeError {
    #[error("only the host can skip to results")]
    NotHost,
    #[error("finalize already ran for this game")]
    AlreadyFinalized,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeOutcome {
    /// Where the client lands, regardless of whether end-game succeeded:
    /// the player is never stranded without a results entry point.
    pub route: String,
    pub end_game_error: Option<String>,
}

/// Guarantees at most one finalize sequence per game, whichever trigger
/// fires first. The latch is a single compare-and-set on an explicit phase
/// value, so a deadline tick and a host skip arriving in the same
/// scheduling turn cannot both win it.
pub struct FinalizeCoordinator {
    game_id: Uuid,
    is_host: bool,
    phase: AtomicU8,
    game_ended: Arc<AtomicBool>,
    end_game_error: std::sync::Mutex<Option<String>>,
}

impl FinalizeCoordinator {
    pub fn new(game_id: Uuid, is_host: bool) -> Self {
        Self {
            game_id,
            is_host,
            phase: AtomicU8::new(NOT_STARTED),
            game_ended: Arc::new(AtomicBool::new(false)),
            end_game_error: std::sync::Mutex::new(None),
        }
    }

    /// Share the "game ended" flag with the results pipeline so manual
    /// submission is disabled the instant finalize begins.
    pub fn with_game_ended_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.game_ended = flag;
        self
    }

    pub fn phase(&self) -> FinalizePhase {
        match self.phase.load(Ordering::SeqCst) {
            NOT_STARTED => FinalizePhase::NotStarted,
            FINALIZING => FinalizePhase::Finalizing,
            _ => FinalizePhase::Finalized,
        }
    }

    pub fn end_game_error(&self) -> Option<String> {
        self.end_game_error
            .lock()
            .expect("finalize error lock poisoned")
            .clone()
    }

    /// Run the finalize sequence: mark the game ended locally, ask the
    /// authority to finish it, and produce the results route. An end-game
    /// failure is recorded and surfaced but never blocks navigation. Once
    /// latched the sequence cannot be cancelled.
    pub async fn finalize<S: CodeServices>(
        &self,
        trigger: FinalizeTrigger,
        services: &S,
    ) -> Result<FinalizeOutcome, FinalizeError> {
        // Authorization precedes the latch: a rejected skip must leave the
        // latch untouched so the real deadline can still finalize.
        if trigger == FinalizeTrigger::HostSkip && !self.is_host {
            return Err(FinalizeError::NotHost);
        }

        self.phase
            .compare_exchange(NOT_STARTED, FINALIZING, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| FinalizeError::AlreadyFinalized)?;

        info!(game_id = %self.game_id, ?trigger, "Finalizing game");

        // Step 1: irreversible local end; disables manual submission.
        self.game_ended.store(true, Ordering::SeqCst);

        // Step 2: authority end-game. The endpoint is idempotent, so other
        // clients observing the same deadline are harmless.
        let end_game_error = match services.end_game(self.game_id).await {
            Ok(_) => None,
            Err(err) => {
                warn!(game_id = %self.game_id, %err, "End-game call failed; continuing to results");
                let msg = err.to_string();
                *self
                    .end_game_error
                    .lock()
                    .expect("finalize error lock poisoned") = Some(msg.clone());
                Some(msg)
            }
        };

        self.phase.store(FINALIZED, Ordering::SeqCst);

        // Step 3: the results route for this game.
        Ok(FinalizeOutcome {
            route: format!("/results/{}", self.game_id),
            end_game_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::services::{
        CoverageReport, EndGameStatus, MutationReport, RunOutcome, ServiceError,
    };
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Counts end-game calls; optionally fails them.
    struct CountingAuthority {
        end_game_calls: AtomicU32,
        fail_end_game: bool,
    }

    impl CountingAuthority {
        fn new() -> Self {
            Self {
                end_game_calls: AtomicU32::new(0),
                fail_end_game: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail_end_game: true,
                ..Self::new()
            }
        }

        fn calls(&self) -> u32 {
            self.end_game_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CodeServices for CountingAuthority {
        async fn run_tests(
            &self,
            _base_code: &str,
            _test_code: &str,
            _player_id: Uuid,
        ) -> Result<RunOutcome, ServiceError> {
            unreachable!("finalize never runs tests")
        }

        async fn submit_code(
            &self,
            _game_id: Uuid,
            _player_id: Uuid,
            _test_code: &str,
        ) -> Result<(), ServiceError> {
            unreachable!("finalize never submits")
        }

        async fn coverage_report(
            &self,
            _working_dir: &str,
            _base_code: &str,
        ) -> Result<CoverageReport, ServiceError> {
            unreachable!()
        }

        async fn count_test_lines(&self, _test_code: &str) -> Result<u32, ServiceError> {
            unreachable!()
        }

        async fn mutation_report(&self, _working_dir: &str) -> Result<MutationReport, ServiceError> {
            unreachable!()
        }

        async fn end_game(&self, _game_id: Uuid) -> Result<EndGameStatus, ServiceError> {
            self.end_game_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_end_game {
                return Err(ServiceError::Rejected("authority unavailable".to_string()));
            }
            Ok(EndGameStatus {
                already_finished: false,
            })
        }
    }

    #[tokio::test]
    async fn deadline_finalizes_once_and_routes_to_results() {
        let game_id = Uuid::new_v4();
        let coordinator = FinalizeCoordinator::new(game_id, false);
        let authority = CountingAuthority::new();

        let outcome = coordinator
            .finalize(FinalizeTrigger::Deadline, &authority)
            .await
            .unwrap();

        assert_eq!(outcome.route, format!("/results/{game_id}"));
        assert_eq!(outcome.end_game_error, None);
        assert_eq!(authority.calls(), 1);
        assert_eq!(coordinator.phase(), FinalizePhase::Finalized);
    }

    #[tokio::test]
    async fn second_trigger_is_a_no_op() {
        let coordinator = FinalizeCoordinator::new(Uuid::new_v4(), true);
        let authority = CountingAuthority::new();

        coordinator
            .finalize(FinalizeTrigger::HostSkip, &authority)
            .await
            .unwrap();
        let second = coordinator
            .finalize(FinalizeTrigger::Deadline, &authority)
            .await;

        assert_eq!(second, Err(FinalizeError::AlreadyFinalized));
        assert_eq!(authority.calls(), 1);
    }

    #[tokio::test]
    async fn racing_deadline_and_skip_perform_one_end_game_call() {
        let coordinator = Arc::new(FinalizeCoordinator::new(Uuid::new_v4(), true));
        let authority = Arc::new(CountingAuthority::new());

        let deadline = {
            let c = Arc::clone(&coordinator);
            let a = Arc::clone(&authority);
            tokio::spawn(async move { c.finalize(FinalizeTrigger::Deadline, &*a).await })
        };
        let skip = {
            let c = Arc::clone(&coordinator);
            let a = Arc::clone(&authority);
            tokio::spawn(async move { c.finalize(FinalizeTrigger::HostSkip, &*a).await })
        };

        let results = [deadline.await.unwrap(), skip.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();

        assert_eq!(wins, 1);
        assert_eq!(authority.calls(), 1);
    }

    #[tokio::test]
    async fn non_host_skip_is_rejected_before_the_latch() {
        let coordinator = FinalizeCoordinator::new(Uuid::new_v4(), false);
        let authority = CountingAuthority::new();

        let result = coordinator
            .finalize(FinalizeTrigger::HostSkip, &authority)
            .await;

        assert_eq!(result, Err(FinalizeError::NotHost));
        assert_eq!(coordinator.phase(), FinalizePhase::NotStarted);
        assert_eq!(authority.calls(), 0);

        // the deadline can still finalize afterwards
        coordinator
            .finalize(FinalizeTrigger::Deadline, &authority)
            .await
            .unwrap();
        assert_eq!(authority.calls(), 1);
    }

    #[tokio::test]
    async fn end_game_failure_still_routes_to_results() {
        let game_id = Uuid::new_v4();
        let coordinator = FinalizeCoordinator::new(game_id, false);
        let authority = CountingAuthority::failing();

        let outcome = coordinator
            .finalize(FinalizeTrigger::Deadline, &authority)
            .await
            .unwrap();

        assert_eq!(outcome.route, format!("/results/{game_id}"));
        assert!(outcome.end_game_error.is_some());
        assert_eq!(coordinator.end_game_error(), outcome.end_game_error);
        assert_eq!(coordinator.phase(), FinalizePhase::Finalized);
    }

    #[tokio::test]
    async fn finalize_disables_manual_submission() {
        let coordinator = FinalizeCoordinator::new(Uuid::new_v4(), false);
        let flag = coordinator.game_ended.clone();
        let authority = CountingAuthority::new();

        assert!(!flag.load(Ordering::SeqCst));
        coordinator
            .finalize(FinalizeTrigger::Deadline, &authority)
            .await
            .unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }
}
