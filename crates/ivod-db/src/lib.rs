//! Persistence layer for IVOD transcripts
//!
//! [`Store`] gives the engine upsert-by-primary-key persistence over one of
//! three backends selected by URL scheme. Dialect differences stay inside
//! the private adapters; callers always see ordered committee-name
//! sequences and UTC+8 instants.

mod backend;
mod error;

pub use error::DbError;

use backend::{mysql, postgres, sqlite};
use chrono::{DateTime, Duration, FixedOffset};
use ivod_core::{IvodTranscript, TranscriptKind, taipei_now};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{MySql, MySqlPool, PgPool, Postgres, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;

/// Backend-agnostic handle to the `ivod_transcripts` table
#[derive(Clone)]
pub struct Store {
    pool: Pool,
}

#[derive(Clone)]
enum Pool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
    MySql(MySqlPool),
}

impl Store {
    /// Connect to the database named by `url`
    ///
    /// The backend is selected by the URL scheme (`sqlite:`, `postgres://`,
    /// `mysql://`). SQLite databases are created on first use and held on a
    /// single connection, matching the single-writer workflow model.
    ///
    /// # Errors
    /// Returns `DbError` if the scheme is unknown or the connection fails
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let pool = if url.starts_with("sqlite:") {
            let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await?;
            Pool::Sqlite(pool)
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Pool::Postgres(PgPoolOptions::new().max_connections(5).connect(url).await?)
        } else if url.starts_with("mysql://") {
            Pool::MySql(MySqlPoolOptions::new().max_connections(5).connect(url).await?)
        } else {
            let scheme = url.split(':').next().unwrap_or("").to_owned();
            return Err(DbError::UnsupportedScheme(scheme));
        };
        Ok(Self { pool })
    }

    #[must_use]
    pub const fn backend_name(&self) -> &'static str {
        match &self.pool {
            Pool::Sqlite(_) => "sqlite",
            Pool::Postgres(_) => "postgresql",
            Pool::MySql(_) => "mysql",
        }
    }

    /// Check whether the `ivod_transcripts` table exists
    ///
    /// # Errors
    /// Returns `DbError` if the catalog query fails
    pub async fn exists_table(&self) -> Result<bool, DbError> {
        match &self.pool {
            Pool::Sqlite(pool) => sqlite::exists_table(pool).await,
            Pool::Postgres(pool) => postgres::exists_table(pool).await,
            Pool::MySql(pool) => mysql::exists_table(pool).await,
        }
    }

    /// Create the `ivod_transcripts` table if it does not exist; idempotent
    ///
    /// # Errors
    /// Returns `DbError` if the DDL fails
    pub async fn ensure_table(&self) -> Result<(), DbError> {
        match &self.pool {
            Pool::Sqlite(pool) => {
                sqlx::query(sqlite::CREATE_TABLE).execute(pool).await?;
            }
            Pool::Postgres(pool) => {
                sqlx::query(postgres::CREATE_TABLE).execute(pool).await?;
            }
            Pool::MySql(pool) => {
                sqlx::query(mysql::CREATE_TABLE).execute(pool).await?;
            }
        }
        Ok(())
    }

    /// Fetch one record by primary key
    ///
    /// # Errors
    /// Returns `DbError` if the query fails
    pub async fn get(&self, ivod_id: i64) -> Result<Option<IvodTranscript>, DbError> {
        match &self.pool {
            Pool::Sqlite(pool) => sqlite::get(pool, ivod_id).await,
            Pool::Postgres(pool) => postgres::get(pool, ivod_id).await,
            Pool::MySql(pool) => mysql::get(pool, ivod_id).await,
        }
    }

    /// Fetch multiple records by primary key, ascending
    ///
    /// # Errors
    /// Returns `DbError` if the query fails
    pub async fn get_many(&self, ids: &[i64]) -> Result<Vec<IvodTranscript>, DbError> {
        match &self.pool {
            Pool::Sqlite(pool) => sqlite::get_many(pool, ids).await,
            Pool::Postgres(pool) => postgres::get_many(pool, ids).await,
            Pool::MySql(pool) => mysql::get_many(pool, ids).await,
        }
    }

    /// Rows whose `kind` transcript failed and is still under the retry cap,
    /// ordered by `(date, ivod_id)` ascending
    ///
    /// # Errors
    /// Returns `DbError` if the query fails
    pub async fn query_failed(
        &self,
        kind: TranscriptKind,
        max_retries: i32,
    ) -> Result<Vec<IvodTranscript>, DbError> {
        match &self.pool {
            Pool::Sqlite(pool) => sqlite::query_failed(pool, kind, max_retries).await,
            Pool::Postgres(pool) => postgres::query_failed(pool, kind, max_retries).await,
            Pool::MySql(pool) => mysql::query_failed(pool, kind, max_retries).await,
        }
    }

    /// Rows whose `last_updated` falls within the trailing `window`
    ///
    /// # Errors
    /// Returns `DbError` if the query fails
    pub async fn query_recently_updated(
        &self,
        window: Duration,
    ) -> Result<Vec<IvodTranscript>, DbError> {
        let cutoff: DateTime<FixedOffset> = taipei_now() - window;
        match &self.pool {
            Pool::Sqlite(pool) => sqlite::recently_updated(pool, cutoff).await,
            Pool::Postgres(pool) => postgres::recently_updated(pool, cutoff).await,
            Pool::MySql(pool) => mysql::recently_updated(pool, cutoff).await,
        }
    }

    /// Every row, ordered by `ivod_id` ascending
    ///
    /// # Errors
    /// Returns `DbError` if the query fails
    pub async fn fetch_all(&self) -> Result<Vec<IvodTranscript>, DbError> {
        match &self.pool {
            Pool::Sqlite(pool) => sqlite::fetch_all(pool).await,
            Pool::Postgres(pool) => postgres::fetch_all(pool).await,
            Pool::MySql(pool) => mysql::fetch_all(pool).await,
        }
    }

    /// Delete every row; only Restore uses this
    ///
    /// # Errors
    /// Returns `DbError` if the delete fails
    pub async fn delete_all(&self) -> Result<u64, DbError> {
        match &self.pool {
            Pool::Sqlite(pool) => sqlite::delete_all(pool).await,
            Pool::Postgres(pool) => postgres::delete_all(pool).await,
            Pool::MySql(pool) => mysql::delete_all(pool).await,
        }
    }

    /// Count all rows
    ///
    /// # Errors
    /// Returns `DbError` if the query fails
    pub async fn count(&self) -> Result<i64, DbError> {
        match &self.pool {
            Pool::Sqlite(pool) => sqlite::count(pool).await,
            Pool::Postgres(pool) => postgres::count(pool).await,
            Pool::MySql(pool) => mysql::count(pool).await,
        }
    }

    /// Open a write session holding a live transaction
    ///
    /// # Errors
    /// Returns `DbError` if a transaction cannot be started
    pub async fn session(&self) -> Result<StoreSession, DbError> {
        let inner = match &self.pool {
            Pool::Sqlite(pool) => SessionInner::Sqlite {
                pool: pool.clone(),
                tx: Some(pool.begin().await?),
            },
            Pool::Postgres(pool) => SessionInner::Postgres {
                pool: pool.clone(),
                tx: Some(pool.begin().await?),
            },
            Pool::MySql(pool) => SessionInner::MySql {
                pool: pool.clone(),
                tx: Some(pool.begin().await?),
            },
        };
        Ok(StoreSession { inner })
    }
}

/// A write session over one open transaction
///
/// Reads go through the transaction, so writes applied earlier in the same
/// session are visible before commit. `commit` and `rollback` finish the
/// current transaction and immediately start a fresh one; `close` discards
/// whatever was not committed.
pub struct StoreSession {
    inner: SessionInner,
}

enum SessionInner {
    Sqlite {
        pool: SqlitePool,
        tx: Option<Transaction<'static, Sqlite>>,
    },
    Postgres {
        pool: PgPool,
        tx: Option<Transaction<'static, Postgres>>,
    },
    MySql {
        pool: MySqlPool,
        tx: Option<Transaction<'static, MySql>>,
    },
}

fn live<T>(tx: &mut Option<T>) -> Result<&mut T, DbError> {
    tx.as_mut().ok_or(DbError::SessionClosed)
}

impl StoreSession {
    /// Fetch one record through the open transaction
    ///
    /// # Errors
    /// Returns `DbError` if the query fails or the session is closed
    pub async fn get(&mut self, ivod_id: i64) -> Result<Option<IvodTranscript>, DbError> {
        match &mut self.inner {
            SessionInner::Sqlite { tx, .. } => sqlite::get(&mut **live(tx)?, ivod_id).await,
            SessionInner::Postgres { tx, .. } => postgres::get(&mut **live(tx)?, ivod_id).await,
            SessionInner::MySql { tx, .. } => mysql::get(&mut **live(tx)?, ivod_id).await,
        }
    }

    /// Insert a new record
    ///
    /// # Errors
    /// Returns `DbError` if the insert fails or the session is closed
    pub async fn insert(&mut self, rec: &IvodTranscript) -> Result<(), DbError> {
        match &mut self.inner {
            SessionInner::Sqlite { tx, .. } => sqlite::insert(&mut **live(tx)?, rec).await,
            SessionInner::Postgres { tx, .. } => postgres::insert(&mut **live(tx)?, rec).await,
            SessionInner::MySql { tx, .. } => mysql::insert(&mut **live(tx)?, rec).await,
        }
    }

    /// Overwrite an existing record
    ///
    /// # Errors
    /// Returns `DbError::NotFound` if no row carries the record's id
    pub async fn update(&mut self, rec: &IvodTranscript) -> Result<(), DbError> {
        match &mut self.inner {
            SessionInner::Sqlite { tx, .. } => sqlite::update(&mut **live(tx)?, rec).await,
            SessionInner::Postgres { tx, .. } => postgres::update(&mut **live(tx)?, rec).await,
            SessionInner::MySql { tx, .. } => mysql::update(&mut **live(tx)?, rec).await,
        }
    }

    /// Create-or-overwrite by primary key; returns `true` when an existing
    /// row was overwritten
    ///
    /// # Errors
    /// Returns `DbError` if the write fails or the session is closed
    pub async fn upsert(&mut self, rec: &IvodTranscript) -> Result<bool, DbError> {
        if self.get(rec.ivod_id).await?.is_some() {
            self.update(rec).await?;
            Ok(true)
        } else {
            self.insert(rec).await?;
            Ok(false)
        }
    }

    /// Commit the open transaction and start a fresh one
    ///
    /// # Errors
    /// Returns `DbError` if the commit fails; the session is then closed
    pub async fn commit(&mut self) -> Result<(), DbError> {
        match &mut self.inner {
            SessionInner::Sqlite { pool, tx } => {
                if let Some(t) = tx.take() {
                    t.commit().await?;
                }
                *tx = Some(pool.begin().await?);
            }
            SessionInner::Postgres { pool, tx } => {
                if let Some(t) = tx.take() {
                    t.commit().await?;
                }
                *tx = Some(pool.begin().await?);
            }
            SessionInner::MySql { pool, tx } => {
                if let Some(t) = tx.take() {
                    t.commit().await?;
                }
                *tx = Some(pool.begin().await?);
            }
        }
        Ok(())
    }

    /// Roll back the open transaction and start a fresh one
    ///
    /// # Errors
    /// Returns `DbError` if the rollback fails; the session is then closed
    pub async fn rollback(&mut self) -> Result<(), DbError> {
        match &mut self.inner {
            SessionInner::Sqlite { pool, tx } => {
                if let Some(t) = tx.take() {
                    t.rollback().await?;
                }
                *tx = Some(pool.begin().await?);
            }
            SessionInner::Postgres { pool, tx } => {
                if let Some(t) = tx.take() {
                    t.rollback().await?;
                }
                *tx = Some(pool.begin().await?);
            }
            SessionInner::MySql { pool, tx } => {
                if let Some(t) = tx.take() {
                    t.rollback().await?;
                }
                *tx = Some(pool.begin().await?);
            }
        }
        Ok(())
    }

    /// Close the session, discarding anything uncommitted
    ///
    /// # Errors
    /// Returns `DbError` if the rollback fails
    pub async fn close(mut self) -> Result<(), DbError> {
        match &mut self.inner {
            SessionInner::Sqlite { tx, .. } => {
                if let Some(t) = tx.take() {
                    t.rollback().await?;
                }
            }
            SessionInner::Postgres { tx, .. } => {
                if let Some(t) = tx.take() {
                    t.rollback().await?;
                }
            }
            SessionInner::MySql { tx, .. } => {
                if let Some(t) = tx.take() {
                    t.rollback().await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use ivod_core::{TranscriptStatus, taipei_tz};

    async fn memory_store() -> Store {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        store.ensure_table().await.unwrap();
        store
    }

    fn record(ivod_id: i64, date: NaiveDate) -> IvodTranscript {
        let tz = taipei_tz();
        IvodTranscript {
            ivod_id,
            ivod_url: format!("https://ivod.ly.gov.tw/Play/Clip/300K/{ivod_id}"),
            date,
            meeting_code: Some("委員會-11-1-22".to_owned()),
            meeting_code_str: None,
            category: None,
            video_type: Some("Clip".to_owned()),
            video_start: None,
            video_end: None,
            video_length: Some("00:03:21".to_owned()),
            video_url: None,
            title: Some("內政委員會".to_owned()),
            speaker_name: None,
            meeting_time: tz.with_ymd_and_hms(2024, 3, 6, 9, 0, 0).unwrap(),
            meeting_name: None,
            committee_names: vec!["內政委員會".to_owned(), "經濟委員會".to_owned()],
            ai_transcript: "委員發言".to_owned(),
            ai_status: TranscriptStatus::Success,
            ai_retries: 0,
            ly_transcript: String::new(),
            ly_status: TranscriptStatus::Failed,
            ly_retries: 1,
            last_updated: taipei_now(),
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[tokio::test]
    async fn ensure_table_is_idempotent() {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        assert!(!store.exists_table().await.unwrap());
        store.ensure_table().await.unwrap();
        store.ensure_table().await.unwrap();
        assert!(store.exists_table().await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_round_trips() {
        let store = memory_store().await;
        let rec = record(100, d(2024, 3, 6));

        let mut session = store.session().await.unwrap();
        assert!(!session.upsert(&rec).await.unwrap());
        assert!(session.upsert(&rec).await.unwrap());
        session.commit().await.unwrap();
        session.close().await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let stored = store.get(100).await.unwrap().unwrap();
        assert_eq!(stored, rec);
    }

    #[tokio::test]
    async fn committee_order_survives_storage() {
        let store = memory_store().await;
        let mut rec = record(7, d(2024, 3, 6));
        rec.committee_names = vec!["乙".to_owned(), "甲".to_owned(), "丙".to_owned()];

        let mut session = store.session().await.unwrap();
        session.insert(&rec).await.unwrap();
        session.commit().await.unwrap();
        session.close().await.unwrap();

        let stored = store.get(7).await.unwrap().unwrap();
        assert_eq!(stored.committee_names, rec.committee_names);
    }

    #[tokio::test]
    async fn close_discards_uncommitted_writes() {
        let store = memory_store().await;
        let mut session = store.session().await.unwrap();
        session.insert(&record(5, d(2024, 3, 6))).await.unwrap();
        session.close().await.unwrap();

        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rollback_discards_then_session_stays_usable() {
        let store = memory_store().await;
        let mut session = store.session().await.unwrap();
        session.insert(&record(5, d(2024, 3, 6))).await.unwrap();
        session.rollback().await.unwrap();
        session.insert(&record(6, d(2024, 3, 6))).await.unwrap();
        session.commit().await.unwrap();
        session.close().await.unwrap();

        assert!(store.get(5).await.unwrap().is_none());
        assert!(store.get(6).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_missing_row_is_not_found() {
        let store = memory_store().await;
        let mut session = store.session().await.unwrap();
        let err = session.update(&record(404, d(2024, 3, 6))).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound(404)));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn query_failed_orders_by_date_then_id_and_caps_retries() {
        let store = memory_store().await;
        let mut session = store.session().await.unwrap();

        let mut late = record(300, d(2024, 4, 2));
        late.ly_status = TranscriptStatus::Failed;
        let mut early_high_id = record(202, d(2024, 4, 1));
        early_high_id.ly_status = TranscriptStatus::Failed;
        let mut early_low_id = record(201, d(2024, 4, 1));
        early_low_id.ly_status = TranscriptStatus::Failed;
        let mut capped = record(400, d(2024, 4, 3));
        capped.ly_status = TranscriptStatus::Failed;
        capped.ly_retries = 5;
        let mut healthy = record(500, d(2024, 4, 3));
        healthy.ly_status = TranscriptStatus::Success;
        healthy.ly_transcript = "ok".to_owned();

        for rec in [&late, &early_high_id, &early_low_id, &capped, &healthy] {
            session.insert(rec).await.unwrap();
        }
        session.commit().await.unwrap();
        session.close().await.unwrap();

        let failed = store.query_failed(TranscriptKind::Ly, 5).await.unwrap();
        let ids: Vec<i64> = failed.iter().map(|r| r.ivod_id).collect();
        assert_eq!(ids, vec![201, 202, 300]);

        let failed_ai = store.query_failed(TranscriptKind::Ai, 5).await.unwrap();
        assert!(failed_ai.is_empty());
    }

    #[tokio::test]
    async fn recently_updated_filters_on_window() {
        let store = memory_store().await;
        let mut session = store.session().await.unwrap();

        let fresh = record(1, d(2024, 3, 6));
        let mut stale = record(2, d(2024, 3, 6));
        stale.last_updated = taipei_now() - Duration::days(30);

        session.insert(&fresh).await.unwrap();
        session.insert(&stale).await.unwrap();
        session.commit().await.unwrap();
        session.close().await.unwrap();

        let recent = store.query_recently_updated(Duration::days(7)).await.unwrap();
        let ids: Vec<i64> = recent.iter().map(|r| r.ivod_id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[tokio::test]
    async fn get_many_returns_only_known_ids() {
        let store = memory_store().await;
        let mut session = store.session().await.unwrap();
        session.insert(&record(10, d(2024, 3, 6))).await.unwrap();
        session.insert(&record(11, d(2024, 3, 6))).await.unwrap();
        session.commit().await.unwrap();
        session.close().await.unwrap();

        let found = store.get_many(&[11, 10, 999]).await.unwrap();
        let ids: Vec<i64> = found.iter().map(|r| r.ivod_id).collect();
        assert_eq!(ids, vec![10, 11]);
        assert!(store.get_many(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_all_empties_the_table() {
        let store = memory_store().await;
        let mut session = store.session().await.unwrap();
        session.insert(&record(1, d(2024, 3, 6))).await.unwrap();
        session.insert(&record(2, d(2024, 3, 6))).await.unwrap();
        session.commit().await.unwrap();
        session.close().await.unwrap();

        assert_eq!(store.delete_all().await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
