//! Record assembly
//!
//! Turns one raw catalog document into the canonical record: validates the
//! required fields, parses the datetimes, extracts metadata with safe
//! defaults, resolves both transcripts, and stamps per-field status and
//! retry counters against the optional prior record.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use ivod_core::{
    CrawlerError, IvodTranscript, TranscriptKind, TranscriptStatus, taipei_now, taipei_tz,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::fetcher::IvodFetcher;

const RAW_VALUE_LIMIT: usize = 500;

/// Per-record document as served by the catalog API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawIvod {
    #[serde(rename = "日期", default)]
    pub date: Option<String>,
    #[serde(rename = "會議時間", default)]
    pub meeting_time: Option<String>,
    #[serde(rename = "IVOD_URL", default)]
    pub ivod_url: Option<String>,
    #[serde(rename = "會議資料", default)]
    pub meeting: Option<RawMeeting>,
    #[serde(rename = "影片種類", default)]
    pub video_type: Option<String>,
    #[serde(rename = "開始時間", default)]
    pub video_start: Option<String>,
    #[serde(rename = "結束時間", default)]
    pub video_end: Option<String>,
    #[serde(rename = "影片長度", default)]
    pub video_length: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(rename = "委員名稱", default)]
    pub speaker_name: Option<String>,
    #[serde(rename = "會議名稱", default)]
    pub meeting_name: Option<String>,
    #[serde(default)]
    pub transcript: Option<RawTranscript>,
    #[serde(default)]
    pub gazette: Option<RawGazette>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMeeting {
    #[serde(rename = "會議代碼", default)]
    pub meeting_code: Option<Value>,
    #[serde(rename = "會議代碼:str", default)]
    pub meeting_code_str: Option<String>,
    #[serde(rename = "種類", default)]
    pub category: Option<String>,
    #[serde(rename = "委員會代碼:str", default)]
    pub committee_names: Vec<String>,
    #[serde(rename = "標題", default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTranscript {
    #[serde(default)]
    pub whisperx: Vec<WhisperxSegment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhisperxSegment {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGazette {
    #[serde(default)]
    pub blocks: Vec<Vec<String>>,
}

/// Fetch one record and assemble it
///
/// # Errors
/// Returns `CrawlerError` on transport, validation or parse failure;
/// transcript-level failures do not error, they seed the status triples
pub async fn process_ivod(
    fetcher: &IvodFetcher,
    ivod_id: i64,
    existing: Option<&IvodTranscript>,
) -> Result<IvodTranscript, CrawlerError> {
    let raw = fetcher.get_record(ivod_id).await?;
    assemble_record(fetcher, ivod_id, raw, existing).await
}

/// Assemble a canonical record from a raw document
///
/// # Errors
/// Returns `CrawlerError::Data` when `日期` or `會議時間` is missing,
/// `CrawlerError::Parsing` when either fails to parse
pub async fn assemble_record(
    fetcher: &IvodFetcher,
    ivod_id: i64,
    raw: RawIvod,
    existing: Option<&IvodTranscript>,
) -> Result<IvodTranscript, CrawlerError> {
    let date_raw = raw
        .date
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CrawlerError::Data {
            field: "日期".to_owned(),
        })?;
    let meeting_time_raw = raw
        .meeting_time
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CrawlerError::Data {
            field: "會議時間".to_owned(),
        })?;

    let date = parse_date(date_raw)?;
    let meeting_time = parse_meeting_time(meeting_time_raw)?;

    let ai = extract_ai(&raw, ivod_id);
    let ly = extract_ly(fetcher, ivod_id, &raw).await;
    let (ai_transcript, ai_status, ai_retries) = seed_attempt(TranscriptKind::Ai, ai, existing);
    let (ly_transcript, ly_status, ly_retries) = seed_attempt(TranscriptKind::Ly, ly, existing);

    let md = raw.meeting.unwrap_or_default();

    Ok(IvodTranscript {
        ivod_id,
        ivod_url: raw.ivod_url.unwrap_or_default(),
        date,
        meeting_code: md.meeting_code.as_ref().and_then(value_to_string),
        meeting_code_str: md.meeting_code_str,
        category: md.category,
        video_type: raw.video_type,
        video_start: raw.video_start,
        video_end: raw.video_end,
        video_length: raw.video_length,
        video_url: raw.video_url,
        title: md.title,
        speaker_name: raw.speaker_name,
        meeting_time,
        meeting_name: raw.meeting_name,
        committee_names: md.committee_names,
        ai_transcript,
        ai_status,
        ai_retries,
        ly_transcript,
        ly_status,
        ly_retries,
        last_updated: taipei_now(),
    })
}

fn parse_date(raw: &str) -> Result<NaiveDate, CrawlerError> {
    raw.parse().map_err(|_| CrawlerError::Parsing {
        field: "日期".to_owned(),
        raw: truncate_raw(raw),
    })
}

fn parse_meeting_time(raw: &str) -> Result<DateTime<FixedOffset>, CrawlerError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&taipei_tz()));
    }
    // meeting times without an offset are Taipei local time
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            if let Some(dt) = taipei_tz().from_local_datetime(&naive).single() {
                return Ok(dt);
            }
        }
    }
    Err(CrawlerError::Parsing {
        field: "會議時間".to_owned(),
        raw: truncate_raw(raw),
    })
}

fn truncate_raw(raw: &str) -> String {
    raw.chars().take(RAW_VALUE_LIMIT).collect()
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn extract_ai(raw: &RawIvod, ivod_id: i64) -> Result<String, CrawlerError> {
    let text: String = raw
        .transcript
        .as_ref()
        .map(|t| t.whisperx.as_slice())
        .unwrap_or_default()
        .iter()
        .map(|segment| segment.text.as_str())
        .collect();
    if text.is_empty() {
        Err(CrawlerError::Transcript {
            ivod_id,
            kind: TranscriptKind::Ai,
        })
    } else {
        Ok(text)
    }
}

fn join_gazette(blocks: &[Vec<String>]) -> String {
    blocks
        .iter()
        .map(|block| block.join("\n"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

async fn extract_ly(
    fetcher: &IvodFetcher,
    ivod_id: i64,
    raw: &RawIvod,
) -> Result<String, CrawlerError> {
    let empty = || CrawlerError::Transcript {
        ivod_id,
        kind: TranscriptKind::Ly,
    };
    if let Some(gazette) = &raw.gazette {
        if !gazette.blocks.is_empty() {
            let joined = join_gazette(&gazette.blocks);
            return if joined.trim().is_empty() {
                Err(empty())
            } else {
                Ok(joined)
            };
        }
    }
    let speech = fetcher.get_speech(ivod_id).await?;
    if speech.is_empty() { Err(empty()) } else { Ok(speech) }
}

/// Seeds one `(transcript, status, retries)` triple from an attempt
///
/// Success resets the counter; failure increments the prior record's
/// counter, or starts at 1 on a first sighting.
fn seed_attempt(
    kind: TranscriptKind,
    outcome: Result<String, CrawlerError>,
    existing: Option<&IvodTranscript>,
) -> (String, TranscriptStatus, i32) {
    match outcome {
        Ok(text) => (text, TranscriptStatus::Success, 0),
        Err(err) => {
            debug!("{kind} transcript unavailable: {err}");
            let retries = existing.map_or(1, |prior| prior.retries(kind) + 1);
            (String::new(), TranscriptStatus::Failed, retries)
        }
    }
}
