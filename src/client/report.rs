use super::services::{CoverageReport, MutationReport, RunStats};

/// One player's merged results for a game. Built once per pipeline run;
/// re-running replaces the previous report wholesale.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerReport {
    /// The tests failed to compile: no coverage or mutation data exists.
    CompileError { stdout: String, stderr: String },
    Complete {
        run: RunSummary,
        coverage: CoverageReport,
        mutation: MutationReport,
        total_test_lines: u32,
        total_score: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub passed: u32,
    pub failed: u32,
    pub execution_time_secs: f64,
    pub stdout: String,
}

impl PlayerReport {
    pub fn merge(
        run: RunStats,
        coverage: CoverageReport,
        mutation: MutationReport,
        total_test_lines: u32,
    ) -> Self {
        let (passed, failed) = parse_test_counts(&run.stdout);
        let total_score = total_score(coverage.line_rate, mutation.summary.mutation_score);

        PlayerReport::Complete {
            run: RunSummary {
                passed,
                failed,
                execution_time_secs: run.execution_time_secs,
                stdout: run.stdout,
            },
            coverage,
            mutation,
            total_test_lines,
            total_score,
        }
    }

    pub fn is_compile_error(&self) -> bool {
        matches!(self, PlayerReport::CompileError { .. })
    }
}

/// Pull pass/fail counts out of the runner's summary line
/// (`Passed: 3, Failed: 1` in VSTest-style output). Unparseable output
/// yields zeros rather than an error; the raw stdout is kept either way.
pub fn parse_test_counts(stdout: &str) -> (u32, u32) {
    (count_after(stdout, "Passed:"), count_after(stdout, "Failed:"))
}

fn count_after(text: &str, label: &str) -> u32 {
    text.find(label)
        .map(|idx| &text[idx + label.len()..])
        .and_then(|rest| {
            rest.split(|c: char| !c.is_ascii_digit() && !c.is_whitespace())
                .next()
                .map(str::trim)
                .and_then(|n| n.parse().ok())
        })
        .unwrap_or(0)
}

/// Blended score shown to the player. Coverage line rate is 0..=1, mutation
/// score 0..=100; mutation kills weigh heavier since they are harder to earn.
fn total_score(line_rate: f64, mutation_score: f64) -> f64 {
    let coverage_points = line_rate.clamp(0.0, 1.0) * 100.0;
    let mutation_points = mutation_score.clamp(0.0, 100.0);
    coverage_points * 0.4 + mutation_points * 0.6
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::services::MutationSummary;

    #[test]
    fn parses_vstest_style_summary() {
        let stdout = "Test run successful.\nPassed: 7, Failed: 2, Skipped: 0\n";
        assert_eq!(parse_test_counts(stdout), (7, 2));
    }

    #[test]
    fn unparseable_output_yields_zeros() {
        assert_eq!(parse_test_counts("no summary here"), (0, 0));
        assert_eq!(parse_test_counts(""), (0, 0));
    }

    #[test]
    fn merge_computes_blended_score() {
        let run = RunStats {
            stdout: "Passed: 3, Failed: 0".to_string(),
            stderr: String::new(),
            execution_time_secs: 1.2,
            working_dir: "wd-1".to_string(),
        };
        let coverage = CoverageReport {
            line_coverage: vec![],
            line_rate: 0.5,
            branch_rate: 0.4,
        };
        let mutation = MutationReport {
            summary: MutationSummary {
                total_mutants: 10,
                killed: 10,
                survived: 0,
                timeout: 0,
                no_coverage: 0,
                mutation_score: 100.0,
            },
            mutants: vec![],
        };

        let report = PlayerReport::merge(run, coverage, mutation, 12);
        let PlayerReport::Complete {
            run,
            total_score,
            total_test_lines,
            ..
        } = report
        else {
            panic!("expected complete report");
        };

        assert_eq!(run.passed, 3);
        assert_eq!(total_test_lines, 12);
        // 0.5 coverage -> 20 points, 100 mutation -> 60 points
        assert!((total_score - 80.0).abs() < f64::EPSILON);
    }
}
