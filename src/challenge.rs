use sqlx::SqlitePool;

/// A code challenge players write tests against: the base code under test,
/// an optional starting template for the player's test file, and how long a
/// game on it runs.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub id: i64,
    pub title: String,
    pub base_code: String,
    pub test_template: String,
    pub duration_secs: u64,
}

#[derive(Clone)]
pub struct ChallengeRepository {
    pool: SqlitePool,
}

impl ChallengeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> Option<Challenge> {
        let row: (i64, String, String, String, i64) = sqlx::query_as(
            "SELECT id, title, base_code, test_template, duration_secs FROM challenges WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .ok()??;

        Some(row_to_challenge(row))
    }

    /// The authority picks one challenge per game at start time.
    pub async fn pick_random(&self) -> Option<Challenge> {
        let row: (i64, String, String, String, i64) = sqlx::query_as(
            "SELECT id, title, base_code, test_template, duration_secs FROM challenges ORDER BY RANDOM() LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .ok()??;

        Some(row_to_challenge(row))
    }
}

fn row_to_challenge(row: (i64, String, String, String, i64)) -> Challenge {
    Challenge {
        id: row.0,
        title: row.1,
        base_code: row.2,
        test_template: row.3,
        duration_secs: row.4.max(0) as u64,
    }
}
