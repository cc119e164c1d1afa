use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::report::PlayerReport;
use super::services::{CodeServices, RunOutcome, ServiceError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("a run is already in flight")]
    Busy,
    #[error("the game has ended; manual submission is disabled")]
    GameEnded,
    #[error("{stage} stage failed: {source}")]
    Service {
        stage: &'static str,
        source: ServiceError,
    },
}

/// Orchestrates the external execution/coverage/mutation services in a fixed
/// order and merges their outputs into one [`PlayerReport`].
///
/// Invariants: at most one invocation in flight per player, so two
/// submissions never fight over "most recent"; a compile failure
/// short-circuits every later stage; each
/// completed run replaces the previously displayed report.
pub struct ResultsPipeline<S> {
    services: S,
    game_id: Uuid,
    player_id: Uuid,
    in_flight: Mutex<()>,
    latest: std::sync::Mutex<Option<PlayerReport>>,
    game_ended: Arc<AtomicBool>,
}

impl<S: CodeServices> ResultsPipeline<S> {
    pub fn new(services: S, game_id: Uuid, player_id: Uuid) -> Self {
        Self {
            services,
            game_id,
            player_id,
            in_flight: Mutex::new(()),
            latest: std::sync::Mutex::new(None),
            game_ended: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The flag the finalize coordinator sets when the game ends; once set,
    /// manual runs are rejected client-side (the authority also rejects the
    /// submission itself).
    pub fn game_ended_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.game_ended)
    }

    pub fn latest_report(&self) -> Option<PlayerReport> {
        self.latest.lock().expect("report lock poisoned").clone()
    }

    /// Run the full sequence: run, submit, coverage, test lines, mutation,
    /// merge. Repeatable before the deadline; the new report replaces the
    /// old one.
    pub async fn run_and_submit(
        &self,
        base_code: &str,
        test_code: &str,
    ) -> Result<PlayerReport, PipelineError> {
        let _guard = self.in_flight.try_lock().map_err(|_| PipelineError::Busy)?;

        if self.game_ended.load(Ordering::SeqCst) {
            return Err(PipelineError::GameEnded);
        }

        let run = self
            .services
            .run_tests(base_code, test_code, self.player_id)
            .await
            .map_err(|source| PipelineError::Service {
                stage: "run",
                source,
            })?;

        let stats = match run {
            RunOutcome::CompileError { stdout, stderr } => {
                warn!(game_id = %self.game_id, "Tests failed to compile");
                let report = PlayerReport::CompileError { stdout, stderr };
                self.store(report.clone());
                return Ok(report);
            }
            RunOutcome::Completed(stats) => stats,
        };

        self.services
            .submit_code(self.game_id, self.player_id, test_code)
            .await
            .map_err(|source| PipelineError::Service {
                stage: "submit",
                source,
            })?;

        let coverage = self
            .services
            .coverage_report(&stats.working_dir, base_code)
            .await
            .map_err(|source| PipelineError::Service {
                stage: "coverage",
                source,
            })?;

        let total_test_lines = self
            .services
            .count_test_lines(test_code)
            .await
            .map_err(|source| PipelineError::Service {
                stage: "test_lines",
                source,
            })?;

        let mutation = self
            .services
            .mutation_report(&stats.working_dir)
            .await
            .map_err(|source| PipelineError::Service {
                stage: "mutation",
                source,
            })?;

        let report = PlayerReport::merge(stats, coverage, mutation, total_test_lines);
        info!(game_id = %self.game_id, player_id = %self.player_id, "Report generated");
        self.store(report.clone());
        Ok(report)
    }

    fn store(&self, report: PlayerReport) {
        *self.latest.lock().expect("report lock poisoned") = Some(report);
    }
}
