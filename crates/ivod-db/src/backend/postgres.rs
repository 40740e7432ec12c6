//! PostgreSQL adapter
//!
//! `committee_names` is a native `TEXT[]` and both instants are
//! `TIMESTAMPTZ`. Values are written as UTC and re-anchored to UTC+8 on
//! read, so equality survives the round trip.

use chrono::{DateTime, FixedOffset, Utc};
use ivod_core::{IvodTranscript, TranscriptKind, taipei_tz};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, Row};

use super::decode_status;
use crate::DbError;

pub(crate) const CREATE_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS ivod_transcripts (
    ivod_id BIGINT PRIMARY KEY,
    ivod_url TEXT NOT NULL,
    date DATE NOT NULL,
    meeting_code TEXT,
    meeting_code_str TEXT,
    category TEXT,
    video_type TEXT,
    video_start TEXT,
    video_end TEXT,
    video_length TEXT,
    video_url TEXT,
    title TEXT,
    speaker_name TEXT,
    meeting_time TIMESTAMPTZ NOT NULL,
    meeting_name TEXT,
    committee_names TEXT[],
    ai_transcript TEXT,
    ai_status TEXT NOT NULL DEFAULT 'pending',
    ai_retries INTEGER NOT NULL DEFAULT 0,
    ly_transcript TEXT,
    ly_status TEXT NOT NULL DEFAULT 'pending',
    ly_retries INTEGER NOT NULL DEFAULT 0,
    last_updated TIMESTAMPTZ NOT NULL
)";

const INSERT: &str = r"
INSERT INTO ivod_transcripts (
    ivod_id, ivod_url, date, meeting_code, meeting_code_str, category,
    video_type, video_start, video_end, video_length, video_url, title,
    speaker_name, meeting_time, meeting_name, committee_names,
    ai_transcript, ai_status, ai_retries,
    ly_transcript, ly_status, ly_retries, last_updated
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
          $15, $16, $17, $18, $19, $20, $21, $22, $23)";

const UPDATE: &str = r"
UPDATE ivod_transcripts SET
    ivod_url = $1, date = $2, meeting_code = $3, meeting_code_str = $4,
    category = $5, video_type = $6, video_start = $7, video_end = $8,
    video_length = $9, video_url = $10, title = $11, speaker_name = $12,
    meeting_time = $13, meeting_name = $14, committee_names = $15,
    ai_transcript = $16, ai_status = $17, ai_retries = $18,
    ly_transcript = $19, ly_status = $20, ly_retries = $21, last_updated = $22
WHERE ivod_id = $23";

fn from_row(row: &PgRow) -> Result<IvodTranscript, DbError> {
    let meeting_time: DateTime<Utc> = row.try_get("meeting_time")?;
    let last_updated: DateTime<Utc> = row.try_get("last_updated")?;
    let committees: Option<Vec<String>> = row.try_get("committee_names")?;
    let ai_status: String = row.try_get("ai_status")?;
    let ly_status: String = row.try_get("ly_status")?;

    Ok(IvodTranscript {
        ivod_id: row.try_get("ivod_id")?,
        ivod_url: row.try_get("ivod_url")?,
        date: row.try_get("date")?,
        meeting_code: row.try_get("meeting_code")?,
        meeting_code_str: row.try_get("meeting_code_str")?,
        category: row.try_get("category")?,
        video_type: row.try_get("video_type")?,
        video_start: row.try_get("video_start")?,
        video_end: row.try_get("video_end")?,
        video_length: row.try_get("video_length")?,
        video_url: row.try_get("video_url")?,
        title: row.try_get("title")?,
        speaker_name: row.try_get("speaker_name")?,
        meeting_time: meeting_time.with_timezone(&taipei_tz()),
        meeting_name: row.try_get("meeting_name")?,
        committee_names: committees.unwrap_or_default(),
        ai_transcript: row
            .try_get::<Option<String>, _>("ai_transcript")?
            .unwrap_or_default(),
        ai_status: decode_status(&ai_status, "ai_status")?,
        ai_retries: row.try_get("ai_retries")?,
        ly_transcript: row
            .try_get::<Option<String>, _>("ly_transcript")?
            .unwrap_or_default(),
        ly_status: decode_status(&ly_status, "ly_status")?,
        ly_retries: row.try_get("ly_retries")?,
        last_updated: last_updated.with_timezone(&taipei_tz()),
    })
}

pub(crate) async fn exists_table<'e>(ex: impl PgExecutor<'e>) -> Result<bool, DbError> {
    let exists: (bool,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_name = 'ivod_transcripts')",
    )
    .fetch_one(ex)
    .await?;
    Ok(exists.0)
}

pub(crate) async fn get<'e>(
    ex: impl PgExecutor<'e>,
    ivod_id: i64,
) -> Result<Option<IvodTranscript>, DbError> {
    let row = sqlx::query("SELECT * FROM ivod_transcripts WHERE ivod_id = $1")
        .bind(ivod_id)
        .fetch_optional(ex)
        .await?;
    row.as_ref().map(from_row).transpose()
}

pub(crate) async fn insert<'e>(
    ex: impl PgExecutor<'e>,
    rec: &IvodTranscript,
) -> Result<(), DbError> {
    sqlx::query(INSERT)
        .bind(rec.ivod_id)
        .bind(&rec.ivod_url)
        .bind(rec.date)
        .bind(&rec.meeting_code)
        .bind(&rec.meeting_code_str)
        .bind(&rec.category)
        .bind(&rec.video_type)
        .bind(&rec.video_start)
        .bind(&rec.video_end)
        .bind(&rec.video_length)
        .bind(&rec.video_url)
        .bind(&rec.title)
        .bind(&rec.speaker_name)
        .bind(rec.meeting_time.with_timezone(&Utc))
        .bind(&rec.meeting_name)
        .bind(&rec.committee_names)
        .bind(&rec.ai_transcript)
        .bind(rec.ai_status.as_str())
        .bind(rec.ai_retries)
        .bind(&rec.ly_transcript)
        .bind(rec.ly_status.as_str())
        .bind(rec.ly_retries)
        .bind(rec.last_updated.with_timezone(&Utc))
        .execute(ex)
        .await?;
    Ok(())
}

pub(crate) async fn update<'e>(
    ex: impl PgExecutor<'e>,
    rec: &IvodTranscript,
) -> Result<(), DbError> {
    let result = sqlx::query(UPDATE)
        .bind(&rec.ivod_url)
        .bind(rec.date)
        .bind(&rec.meeting_code)
        .bind(&rec.meeting_code_str)
        .bind(&rec.category)
        .bind(&rec.video_type)
        .bind(&rec.video_start)
        .bind(&rec.video_end)
        .bind(&rec.video_length)
        .bind(&rec.video_url)
        .bind(&rec.title)
        .bind(&rec.speaker_name)
        .bind(rec.meeting_time.with_timezone(&Utc))
        .bind(&rec.meeting_name)
        .bind(&rec.committee_names)
        .bind(&rec.ai_transcript)
        .bind(rec.ai_status.as_str())
        .bind(rec.ai_retries)
        .bind(&rec.ly_transcript)
        .bind(rec.ly_status.as_str())
        .bind(rec.ly_retries)
        .bind(rec.last_updated.with_timezone(&Utc))
        .bind(rec.ivod_id)
        .execute(ex)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound(rec.ivod_id));
    }
    Ok(())
}

pub(crate) async fn query_failed<'e>(
    ex: impl PgExecutor<'e>,
    kind: TranscriptKind,
    max_retries: i32,
) -> Result<Vec<IvodTranscript>, DbError> {
    let sql = match kind {
        TranscriptKind::Ai => {
            "SELECT * FROM ivod_transcripts
             WHERE ai_status = 'failed' AND ai_retries < $1
             ORDER BY date ASC, ivod_id ASC"
        }
        TranscriptKind::Ly => {
            "SELECT * FROM ivod_transcripts
             WHERE ly_status = 'failed' AND ly_retries < $1
             ORDER BY date ASC, ivod_id ASC"
        }
    };
    let rows = sqlx::query(sql).bind(max_retries).fetch_all(ex).await?;
    rows.iter().map(from_row).collect()
}

pub(crate) async fn recently_updated<'e>(
    ex: impl PgExecutor<'e>,
    cutoff: DateTime<FixedOffset>,
) -> Result<Vec<IvodTranscript>, DbError> {
    let rows = sqlx::query(
        "SELECT * FROM ivod_transcripts WHERE last_updated >= $1 ORDER BY ivod_id ASC",
    )
    .bind(cutoff.with_timezone(&Utc))
    .fetch_all(ex)
    .await?;
    rows.iter().map(from_row).collect()
}

pub(crate) async fn get_many<'e>(
    ex: impl PgExecutor<'e>,
    ids: &[i64],
) -> Result<Vec<IvodTranscript>, DbError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query(
        "SELECT * FROM ivod_transcripts WHERE ivod_id = ANY($1) ORDER BY ivod_id ASC",
    )
    .bind(ids)
    .fetch_all(ex)
    .await?;
    rows.iter().map(from_row).collect()
}

pub(crate) async fn fetch_all<'e>(ex: impl PgExecutor<'e>) -> Result<Vec<IvodTranscript>, DbError> {
    let rows = sqlx::query("SELECT * FROM ivod_transcripts ORDER BY ivod_id ASC")
        .fetch_all(ex)
        .await?;
    rows.iter().map(from_row).collect()
}

pub(crate) async fn delete_all<'e>(ex: impl PgExecutor<'e>) -> Result<u64, DbError> {
    let result = sqlx::query("DELETE FROM ivod_transcripts").execute(ex).await?;
    Ok(result.rows_affected())
}

pub(crate) async fn count<'e>(ex: impl PgExecutor<'e>) -> Result<i64, DbError> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ivod_transcripts")
        .fetch_one(ex)
        .await?;
    Ok(row.0)
}
