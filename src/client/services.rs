use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service rejected the request: {0}")]
    Rejected(String),
}

/// Result of compiling and running the player's tests against the
/// challenge's base code.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RunStats),
    /// The submitted tests did not compile. Later pipeline stages must not
    /// run; there is no working directory to key them by.
    CompileError { stdout: String, stderr: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
    pub stdout: String,
    pub stderr: String,
    pub execution_time_secs: f64,
    /// Handle to the run's working directory; keys the coverage and
    /// mutation requests to the same compiled artifacts.
    pub working_dir: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageReport {
    pub line_coverage: Vec<LineCoverage>,
    pub line_rate: f64,
    pub branch_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineCoverage {
    pub line: u32,
    pub covered: bool,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationReport {
    pub summary: MutationSummary,
    pub mutants: Vec<MutantDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationSummary {
    pub total_mutants: u32,
    pub killed: u32,
    pub survived: u32,
    pub timeout: u32,
    pub no_coverage: u32,
    pub mutation_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutantDetail {
    pub id: String,
    pub mutation: String,
    pub line: u32,
    pub status: String,
    pub file_name: String,
    pub original_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndGameStatus {
    pub already_finished: bool,
}

/// The external collaborators the client invokes: code execution, coverage
/// and mutation analysis, plus the authority's game endpoints. Everything
/// behind this seam is an opaque service reached over HTTP in production
/// and scripted in tests.
#[async_trait]
pub trait CodeServices: Send + Sync {
    async fn run_tests(
        &self,
        base_code: &str,
        test_code: &str,
        player_id: Uuid,
    ) -> Result<RunOutcome, ServiceError>;

    async fn submit_code(
        &self,
        game_id: Uuid,
        player_id: Uuid,
        test_code: &str,
    ) -> Result<(), ServiceError>;

    async fn coverage_report(
        &self,
        working_dir: &str,
        base_code: &str,
    ) -> Result<CoverageReport, ServiceError>;

    async fn count_test_lines(&self, test_code: &str) -> Result<u32, ServiceError>;

    async fn mutation_report(&self, working_dir: &str) -> Result<MutationReport, ServiceError>;

    async fn end_game(&self, game_id: Uuid) -> Result<EndGameStatus, ServiceError>;
}

/// HTTP implementation: code services live on the runner, game endpoints on
/// the authority.
pub struct HttpCodeServices {
    http: reqwest::Client,
    runner_url: String,
    authority_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest<'a> {
    base_code: &'a str,
    test_code: &'a str,
    player_id: Uuid,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunResponse {
    success: bool,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    execution_time: f64,
    #[serde(default)]
    working_dir_handle: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CoverageRequest<'a> {
    working_dir_handle: &'a str,
    code: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TestLinesRequest<'a> {
    code: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestLinesResponse {
    total_test_lines: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MutationRequest<'a> {
    working_dir_handle: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest<'a> {
    game_id: Uuid,
    player_id: Uuid,
    test_code: &'a str,
}

#[derive(Deserialize)]
struct StatusResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndGameResponse {
    success: bool,
    #[serde(default)]
    already_finished: bool,
    #[serde(default)]
    error: Option<String>,
}

impl HttpCodeServices {
    pub fn new(runner_url: impl Into<String>, authority_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            runner_url: runner_url.into(),
            authority_url: authority_url.into(),
        }
    }
}

fn rejected(error: Option<String>) -> ServiceError {
    ServiceError::Rejected(error.unwrap_or_else(|| "unknown error".to_string()))
}

#[async_trait]
impl CodeServices for HttpCodeServices {
    async fn run_tests(
        &self,
        base_code: &str,
        test_code: &str,
        player_id: Uuid,
    ) -> Result<RunOutcome, ServiceError> {
        let resp: RunResponse = self
            .http
            .post(format!("{}/code/run", self.runner_url))
            .json(&RunRequest {
                base_code,
                test_code,
                player_id,
            })
            .send()
            .await?
            .json()
            .await?;

        if !resp.success {
            return Ok(RunOutcome::CompileError {
                stdout: resp.stdout,
                stderr: resp.stderr,
            });
        }
        Ok(RunOutcome::Completed(RunStats {
            stdout: resp.stdout,
            stderr: resp.stderr,
            execution_time_secs: resp.execution_time,
            working_dir: resp.working_dir_handle,
        }))
    }

    async fn submit_code(
        &self,
        game_id: Uuid,
        player_id: Uuid,
        test_code: &str,
    ) -> Result<(), ServiceError> {
        let resp: StatusResponse = self
            .http
            .post(format!("{}/game/submit", self.authority_url))
            .json(&SubmitRequest {
                game_id,
                player_id,
                test_code,
            })
            .send()
            .await?
            .json()
            .await?;

        if !resp.success {
            return Err(rejected(resp.error));
        }
        Ok(())
    }

    async fn coverage_report(
        &self,
        working_dir: &str,
        base_code: &str,
    ) -> Result<CoverageReport, ServiceError> {
        let resp = self
            .http
            .post(format!("{}/code/coverage", self.runner_url))
            .json(&CoverageRequest {
                working_dir_handle: working_dir,
                code: base_code,
            })
            .send()
            .await?
            .json()
            .await?;
        Ok(resp)
    }

    async fn count_test_lines(&self, test_code: &str) -> Result<u32, ServiceError> {
        let resp: TestLinesResponse = self
            .http
            .post(format!("{}/code/test-lines", self.runner_url))
            .json(&TestLinesRequest { code: test_code })
            .send()
            .await?
            .json()
            .await?;
        Ok(resp.total_test_lines)
    }

    async fn mutation_report(&self, working_dir: &str) -> Result<MutationReport, ServiceError> {
        let resp = self
            .http
            .post(format!("{}/code/mutation", self.runner_url))
            .json(&MutationRequest {
                working_dir_handle: working_dir,
            })
            .send()
            .await?
            .json()
            .await?;
        Ok(resp)
    }

    async fn end_game(&self, game_id: Uuid) -> Result<EndGameStatus, ServiceError> {
        let resp: EndGameResponse = self
            .http
            .post(format!("{}/game/{}/end", self.authority_url, game_id))
            .send()
            .await?
            .json()
            .await?;

        if !resp.success {
            return Err(rejected(resp.error));
        }
        Ok(EndGameStatus {
            already_finished: resp.already_finished,
        })
    }
}
