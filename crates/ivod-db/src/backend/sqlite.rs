//! SQLite adapter
//!
//! Timestamps are RFC 3339 text in UTC+8 and `committee_names` is
//! serialized JSON text. Lexicographic comparison on `last_updated` is
//! sound because every stored stamp carries the same fixed offset and
//! whole-second precision.

use chrono::{DateTime, FixedOffset};
use ivod_core::{IvodTranscript, TranscriptKind};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteExecutor};

use super::{decode_committees, decode_status, encode_committees};
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
    meeting_time TEXT NOT NULL,
    meeting_name TEXT,
    committee_names TEXT,
    ai_transcript TEXT,
    ai_status TEXT NOT NULL DEFAULT 'pending',
    ai_retries INTEGER NOT NULL DEFAULT 0,
    ly_transcript TEXT,
    ly_status TEXT NOT NULL DEFAULT 'pending',
    ly_retries INTEGER NOT NULL DEFAULT 0,
    last_updated TEXT NOT NULL
)";

const INSERT: &str = r"
INSERT INTO ivod_transcripts (
    ivod_id, ivod_url, date, meeting_code, meeting_code_str, category,
    video_type, video_start, video_end, video_length, video_url, title,
    speaker_name, meeting_time, meeting_name, committee_names,
    ai_transcript, ai_status, ai_retries,
    ly_transcript, ly_status, ly_retries, last_updated
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const UPDATE: &str = r"
UPDATE ivod_transcripts SET
    ivod_url = ?, date = ?, meeting_code = ?, meeting_code_str = ?,
    category = ?, video_type = ?, video_start = ?, video_end = ?,
    video_length = ?, video_url = ?, title = ?, speaker_name = ?,
    meeting_time = ?, meeting_name = ?, committee_names = ?,
    ai_transcript = ?, ai_status = ?, ai_retries = ?,
    ly_transcript = ?, ly_status = ?, ly_retries = ?, last_updated = ?
WHERE ivod_id = ?";

fn parse_ts(raw: &str, column: &'static str) -> Result<DateTime<FixedOffset>, DbError> {
    DateTime::parse_from_rfc3339(raw).map_err(|e| DbError::Decode {
        column,
        message: e.to_string(),
    })
}

fn from_row(row: &SqliteRow) -> Result<IvodTranscript, DbError> {
    let meeting_time: String = row.try_get("meeting_time")?;
    let last_updated: String = row.try_get("last_updated")?;
    let committees: Option<String> = row.try_get("committee_names")?;
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
        meeting_time: parse_ts(&meeting_time, "meeting_time")?,
        meeting_name: row.try_get("meeting_name")?,
        committee_names: decode_committees(committees.as_deref())?,
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
        last_updated: parse_ts(&last_updated, "last_updated")?,
    })
}

pub(crate) async fn exists_table<'e>(ex: impl SqliteExecutor<'e>) -> Result<bool, DbError> {
    let found: Option<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'ivod_transcripts'",
    )
    .fetch_optional(ex)
    .await?;
    Ok(found.is_some())
}

pub(crate) async fn get<'e>(
    ex: impl SqliteExecutor<'e>,
    ivod_id: i64,
) -> Result<Option<IvodTranscript>, DbError> {
    let row = sqlx::query("SELECT * FROM ivod_transcripts WHERE ivod_id = ?")
        .bind(ivod_id)
        .fetch_optional(ex)
        .await?;
    row.as_ref().map(from_row).transpose()
}

pub(crate) async fn insert<'e>(
    ex: impl SqliteExecutor<'e>,
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
        .bind(rec.meeting_time.to_rfc3339())
        .bind(&rec.meeting_name)
        .bind(encode_committees(&rec.committee_names))
        .bind(&rec.ai_transcript)
        .bind(rec.ai_status.as_str())
        .bind(rec.ai_retries)
        .bind(&rec.ly_transcript)
        .bind(rec.ly_status.as_str())
        .bind(rec.ly_retries)
        .bind(rec.last_updated.to_rfc3339())
        .execute(ex)
        .await?;
    Ok(())
}

pub(crate) async fn update<'e>(
    ex: impl SqliteExecutor<'e>,
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
        .bind(rec.meeting_time.to_rfc3339())
        .bind(&rec.meeting_name)
        .bind(encode_committees(&rec.committee_names))
        .bind(&rec.ai_transcript)
        .bind(rec.ai_status.as_str())
        .bind(rec.ai_retries)
        .bind(&rec.ly_transcript)
        .bind(rec.ly_status.as_str())
        .bind(rec.ly_retries)
        .bind(rec.last_updated.to_rfc3339())
        .bind(rec.ivod_id)
        .execute(ex)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound(rec.ivod_id));
    }
    Ok(())
}

pub(crate) async fn query_failed<'e>(
    ex: impl SqliteExecutor<'e>,
    kind: TranscriptKind,
    max_retries: i32,
) -> Result<Vec<IvodTranscript>, DbError> {
    let sql = match kind {
        TranscriptKind::Ai => {
            "SELECT * FROM ivod_transcripts
             WHERE ai_status = 'failed' AND ai_retries < ?
             ORDER BY date ASC, ivod_id ASC"
        }
        TranscriptKind::Ly => {
            "SELECT * FROM ivod_transcripts
             WHERE ly_status = 'failed' AND ly_retries < ?
             ORDER BY date ASC, ivod_id ASC"
        }
    };
    let rows = sqlx::query(sql).bind(max_retries).fetch_all(ex).await?;
    rows.iter().map(from_row).collect()
}

pub(crate) async fn recently_updated<'e>(
    ex: impl SqliteExecutor<'e>,
    cutoff: DateTime<FixedOffset>,
) -> Result<Vec<IvodTranscript>, DbError> {
    let rows = sqlx::query(
        "SELECT * FROM ivod_transcripts WHERE last_updated >= ? ORDER BY ivod_id ASC",
    )
    .bind(cutoff.to_rfc3339())
    .fetch_all(ex)
    .await?;
    rows.iter().map(from_row).collect()
}

pub(crate) async fn get_many<'e>(
    ex: impl SqliteExecutor<'e>,
    ids: &[i64],
) -> Result<Vec<IvodTranscript>, DbError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT * FROM ivod_transcripts WHERE ivod_id IN ({placeholders}) ORDER BY ivod_id ASC"
    );
    let mut query = sqlx::query(&sql);
    for id in ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(ex).await?;
    rows.iter().map(from_row).collect()
}

pub(crate) async fn fetch_all<'e>(
    ex: impl SqliteExecutor<'e>,
) -> Result<Vec<IvodTranscript>, DbError> {
    let rows = sqlx::query("SELECT * FROM ivod_transcripts ORDER BY ivod_id ASC")
        .fetch_all(ex)
        .await?;
    rows.iter().map(from_row).collect()
}

pub(crate) async fn delete_all<'e>(ex: impl SqliteExecutor<'e>) -> Result<u64, DbError> {
    let result = sqlx::query("DELETE FROM ivod_transcripts").execute(ex).await?;
    Ok(result.rows_affected())
}

pub(crate) async fn count<'e>(ex: impl SqliteExecutor<'e>) -> Result<i64, DbError> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ivod_transcripts")
        .fetch_one(ex)
        .await?;
    Ok(row.0)
}
