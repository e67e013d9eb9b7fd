use common::models::DailySummary;
use sqlx::{SqliteConnection, SqlitePool};

pub struct DailySummaryRepository;

impl DailySummaryRepository {
    pub async fn upsert(conn: &mut SqliteConnection, summary: &DailySummary) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
                INSERT INTO daily_summaries (day, daily_profit, trades, wins, win_rate, closing_balance)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(day) DO UPDATE SET
                    daily_profit = excluded.daily_profit,
                    trades = excluded.trades,
                    wins = excluded.wins,
                    win_rate = excluded.win_rate,
                    closing_balance = excluded.closing_balance
            "#,
        )
        .bind(summary.day)
        .bind(summary.daily_profit)
        .bind(summary.trades as i64)
        .bind(summary.wins as i64)
        .bind(summary.win_rate())
        .bind(summary.closing_balance)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn profit_for(pool: &SqlitePool, day: chrono::NaiveDate) -> Result<Option<f64>, sqlx::Error> {
        sqlx::query_scalar::<_, f64>("SELECT daily_profit FROM daily_summaries WHERE day = ?")
            .bind(day)
            .fetch_optional(pool)
            .await
    }
}
