use common::models::{Position, Settlement};
use sqlx::{SqliteConnection, SqlitePool};

pub struct PositionsRepository;

impl PositionsRepository {
    pub async fn insert_open(conn: &mut SqliteConnection, position: &Position) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
                INSERT OR IGNORE INTO positions (
                    signal_id, contract_id, symbol, direction, stake, opened_at, duration_secs
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(position.signal_id.to_string())
        .bind(&position.contract_id)
        .bind(&position.symbol)
        .bind(position.direction.contract_type())
        .bind(position.stake)
        .bind(position.opened_at)
        .bind(position.duration_secs as i64)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Records the result. Only the first settlement of a position is kept.
    pub async fn settle(
        conn: &mut SqliteConnection,
        position: &Position,
        settlement: &Settlement,
    ) -> Result<(), sqlx::Error> {
        Self::insert_open(&mut *conn, position).await?;
        sqlx::query(
            r#"
                UPDATE positions
                SET result = ?, profit = ?, balance_after = ?, settled_at = ?
                WHERE signal_id = ? AND result IS NULL
            "#,
        )
        .bind(settlement.outcome.as_str())
        .bind(settlement.profit)
        .bind(settlement.balance_after)
        .bind(settlement.settled_at)
        .bind(position.signal_id.to_string())
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn result_of(
        pool: &SqlitePool,
        signal_id: &str,
    ) -> Result<Option<(Option<String>, Option<f64>)>, sqlx::Error> {
        sqlx::query_as::<_, (Option<String>, Option<f64>)>(
            "SELECT result, profit FROM positions WHERE signal_id = ?",
        )
        .bind(signal_id)
        .fetch_optional(pool)
        .await
    }
}
