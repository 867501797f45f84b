//! Append-only time-series store with a rolling retention window.
//!
//! One relation, ordered by `time`, pruned once per log tick.  Pruning and
//! appending for a tick run in a single transaction so a concurrent range
//! query never observes a half-pruned, half-appended store.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

use crate::error::StoreError;
use crate::sensor::Reading;

/// Default retention window: three days of samples.
pub const DEFAULT_RETENTION_SECS: i64 = 259_200;

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
    retention_secs: i64,
}

/// A persisted reading with its store-assigned identifier.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Sample {
    pub id: i64,
    pub time: i64,
    pub temp: f64,
    pub humidity: f64,
    pub pressure: f64,
}

impl Db {
    /// db_url examples:
    /// - "sqlite:weather.db?mode=rwc"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str, retention_secs: i64) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        // An in-memory database exists per connection, so the pool must not
        // hand out a second one.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self {
            pool,
            retention_secs,
        })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Persist one reading.  The identifier is store-assigned and
    /// monotonically increasing.
    pub async fn append(&self, r: &Reading) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO data (time, temp, humidity, pressure) VALUES (?, ?, ?, ?)")
            .bind(r.time)
            .bind(r.temp)
            .bind(r.humidity)
            .bind(r.pressure)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove every sample older than the retention window.  Returns the
    /// number of rows removed.
    pub async fn prune(&self, now: i64) -> Result<u64, StoreError> {
        let cutoff = now - self.retention_secs;
        let res = sqlx::query("DELETE FROM data WHERE time < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    /// One log tick's prune + append as a single transaction.
    pub async fn prune_and_append(&self, now: i64, r: &Reading) -> Result<u64, StoreError> {
        let cutoff = now - self.retention_secs;
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM data WHERE time < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("INSERT INTO data (time, temp, humidity, pressure) VALUES (?, ?, ?, ?)")
            .bind(r.time)
            .bind(r.temp)
            .bind(r.humidity)
            .bind(r.pressure)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(removed)
    }

    /// Samples from the last `hours` hours, ascending by time.  An empty
    /// window yields an empty vec, not an error.
    pub async fn query_range(&self, now: i64, hours: i64) -> Result<Vec<Sample>, StoreError> {
        let since = now - hours * 3600;
        let rows = sqlx::query_as::<_, Sample>(
            "SELECT id, time, temp, humidity, pressure FROM data WHERE time > ? ORDER BY time ASC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::now_unix;

    async fn mem_db() -> Db {
        let db = Db::connect("sqlite::memory:", DEFAULT_RETENTION_SECS)
            .await
            .unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn reading(time: i64, temp: f64) -> Reading {
        Reading {
            time,
            temp,
            humidity: 45.68,
            pressure: 1013.25,
        }
    }

    // -- append + query -------------------------------------------------------

    #[tokio::test]
    async fn append_then_query_roundtrip() {
        let db = mem_db().await;
        let now = now_unix();
        let r = reading(now, 21.46);

        db.append(&r).await.unwrap();

        let samples = db.query_range(now, 24).await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].time, r.time);
        assert_eq!(samples[0].temp, r.temp);
        assert_eq!(samples[0].humidity, r.humidity);
        assert_eq!(samples[0].pressure, r.pressure);
    }

    #[tokio::test]
    async fn empty_store_queries_to_empty_vec() {
        let db = mem_db().await;
        let samples = db.query_range(now_unix(), 24).await.unwrap();
        assert!(samples.is_empty());
    }

    #[tokio::test]
    async fn query_orders_ascending_regardless_of_insert_order() {
        let db = mem_db().await;
        let now = now_unix();

        for offset in [300, 100, 200] {
            db.append(&reading(now - offset, 20.0)).await.unwrap();
        }

        let samples = db.query_range(now, 24).await.unwrap();
        let times: Vec<i64> = samples.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![now - 300, now - 200, now - 100]);
    }

    #[tokio::test]
    async fn identifiers_are_monotonic() {
        let db = mem_db().await;
        let now = now_unix();

        for i in 0..5 {
            db.append(&reading(now - 100 + i, 20.0)).await.unwrap();
        }

        let samples = db.query_range(now, 24).await.unwrap();
        for pair in samples.windows(2) {
            assert!(pair[1].id > pair[0].id);
        }
    }

    // -- prune ----------------------------------------------------------------

    #[tokio::test]
    async fn prune_removes_only_expired_samples() {
        let db = mem_db().await;
        let now = now_unix();

        db.append(&reading(now - DEFAULT_RETENTION_SECS - 10, 18.0))
            .await
            .unwrap();
        db.append(&reading(now - 60, 21.0)).await.unwrap();

        let removed = db.prune(now).await.unwrap();
        assert_eq!(removed, 1);

        let samples = db.query_range(now, 24 * 30).await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].time, now - 60);
    }

    #[tokio::test]
    async fn retention_bound_holds_after_prune() {
        let db = mem_db().await;
        let now = now_unix();

        // 50 samples older than the window, 30 spread over the last 24h.
        for i in 0..50 {
            db.append(&reading(now - DEFAULT_RETENTION_SECS - 100 - i, 15.0))
                .await
                .unwrap();
        }
        for i in 0..30 {
            db.append(&reading(now - 86400 + (i + 1) * 2800, 21.0))
                .await
                .unwrap();
        }

        let removed = db.prune(now).await.unwrap();
        assert_eq!(removed, 50);

        let cutoff = now - DEFAULT_RETENTION_SECS;
        let samples = db.query_range(now, 24).await.unwrap();
        assert_eq!(samples.len(), 30);
        for pair in samples.windows(2) {
            assert!(pair[0].time <= pair[1].time, "not ascending");
        }
        assert!(samples.iter().all(|s| s.time >= cutoff));
    }

    #[tokio::test]
    async fn prune_and_append_does_both() {
        let db = mem_db().await;
        let now = now_unix();

        db.append(&reading(now - DEFAULT_RETENTION_SECS - 5, 17.0))
            .await
            .unwrap();

        let removed = db.prune_and_append(now, &reading(now, 22.0)).await.unwrap();
        assert_eq!(removed, 1);

        let samples = db.query_range(now, 24).await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].temp, 22.0);
    }
}
