use chrono::Utc;
use common::models::Signal;
use sqlx::{SqliteConnection, SqlitePool};

pub struct SignalsRepository;

impl SignalsRepository {
    /// Inserts the signal or, if already stored, refreshes its status and stake.
    pub async fn upsert(conn: &mut SqliteConnection, signal: &Signal) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
                INSERT INTO signals (
                    signal_id, provider, symbol, direction, confidence, stake,
                    strategy, status, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(signal_id) DO UPDATE SET
                    stake = excluded.stake,
                    status = excluded.status,
                    updated_at = excluded.updated_at
            "#,
        )
        .bind(signal.id.to_string())
        .bind(&signal.provider)
        .bind(&signal.symbol)
        .bind(signal.direction.contract_type())
        .bind(signal.confidence)
        .bind(signal.stake())
        .bind(&signal.strategy)
        .bind(signal.status().as_str())
        .bind(signal.created_at)
        .bind(Utc::now())
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn status_of(pool: &SqlitePool, signal_id: &str) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT status FROM signals WHERE signal_id = ?")
            .bind(signal_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn count_by_status(pool: &SqlitePool, status: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM signals WHERE status = ?")
            .bind(status)
            .fetch_one(pool)
            .await
    }
}
