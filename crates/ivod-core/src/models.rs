//! Canonical IVOD transcript record

use chrono::{DateTime, FixedOffset, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Returns the fixed UTC+8 offset used for every timestamp the engine writes
#[must_use]
#[expect(clippy::expect_used)]
pub fn taipei_tz() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("UTC+8 is a valid offset")
}

/// Current time in UTC+8, truncated to whole seconds so stored
/// timestamps compare cleanly across backends
#[must_use]
pub fn taipei_now() -> DateTime<FixedOffset> {
    let now = Utc::now().with_timezone(&taipei_tz());
    now.with_nanosecond(0).unwrap_or(now)
}

/// Processing state of one transcript source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

impl TranscriptStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TranscriptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two independently sourced transcripts kept side by side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptKind {
    /// Speech-to-text transcript from the whisperx segments
    Ai,
    /// Official gazette / speech-page transcript
    Ly,
}

impl TranscriptKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Ly => "ly",
        }
    }
}

impl fmt::Display for TranscriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One legislative video-on-demand record, keyed by `ivod_id`
///
/// The AI and LY transcripts are independent sub-records: each carries its
/// own `(transcript, status, retries)` triple, and the triples only ever
/// change together via [`Self::set_transcript`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvodTranscript {
    pub ivod_id: i64,
    pub ivod_url: String,
    pub date: NaiveDate,
    pub meeting_code: Option<String>,
    pub meeting_code_str: Option<String>,
    pub category: Option<String>,
    pub video_type: Option<String>,
    pub video_start: Option<String>,
    pub video_end: Option<String>,
    pub video_length: Option<String>,
    pub video_url: Option<String>,
    pub title: Option<String>,
    pub speaker_name: Option<String>,
    pub meeting_time: DateTime<FixedOffset>,
    pub meeting_name: Option<String>,
    /// Ordered committee names; storage form is a backend concern
    pub committee_names: Vec<String>,
    pub ai_transcript: String,
    pub ai_status: TranscriptStatus,
    pub ai_retries: i32,
    pub ly_transcript: String,
    pub ly_status: TranscriptStatus,
    pub ly_retries: i32,
    pub last_updated: DateTime<FixedOffset>,
}

impl IvodTranscript {
    #[must_use]
    pub fn transcript(&self, kind: TranscriptKind) -> &str {
        match kind {
            TranscriptKind::Ai => &self.ai_transcript,
            TranscriptKind::Ly => &self.ly_transcript,
        }
    }

    #[must_use]
    pub const fn status(&self, kind: TranscriptKind) -> TranscriptStatus {
        match kind {
            TranscriptKind::Ai => self.ai_status,
            TranscriptKind::Ly => self.ly_status,
        }
    }

    #[must_use]
    pub const fn retries(&self, kind: TranscriptKind) -> i32 {
        match kind {
            TranscriptKind::Ai => self.ai_retries,
            TranscriptKind::Ly => self.ly_retries,
        }
    }

    /// Replaces one transcript triple atomically
    pub fn set_transcript(
        &mut self,
        kind: TranscriptKind,
        text: String,
        status: TranscriptStatus,
        retries: i32,
    ) {
        match kind {
            TranscriptKind::Ai => {
                self.ai_transcript = text;
                self.ai_status = status;
                self.ai_retries = retries;
            }
            TranscriptKind::Ly => {
                self.ly_transcript = text;
                self.ly_status = status;
                self.ly_retries = retries;
            }
        }
    }

    /// Copies one transcript triple from a freshly assembled record,
    /// leaving the other triple untouched
    pub fn copy_transcript_from(&mut self, other: &Self, kind: TranscriptKind) {
        self.set_transcript(
            kind,
            other.transcript(kind).to_owned(),
            other.status(kind),
            other.retries(kind),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> IvodTranscript {
        let tz = taipei_tz();
        IvodTranscript {
            ivod_id: 159_939,
            ivod_url: "https://ivod.ly.gov.tw/Play/Clip/300K/159939".to_owned(),
            date: NaiveDate::from_ymd_opt(2024, 3, 6).unwrap(),
            meeting_code: None,
            meeting_code_str: None,
            category: None,
            video_type: None,
            video_start: None,
            video_end: None,
            video_length: None,
            video_url: None,
            title: Some("院會".to_owned()),
            speaker_name: None,
            meeting_time: tz.with_ymd_and_hms(2024, 3, 6, 9, 0, 0).unwrap(),
            meeting_name: None,
            committee_names: vec!["內政委員會".to_owned()],
            ai_transcript: "text".to_owned(),
            ai_status: TranscriptStatus::Success,
            ai_retries: 0,
            ly_transcript: String::new(),
            ly_status: TranscriptStatus::Failed,
            ly_retries: 2,
            last_updated: tz.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            TranscriptStatus::Pending,
            TranscriptStatus::Success,
            TranscriptStatus::Failed,
        ] {
            assert_eq!(TranscriptStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TranscriptStatus::parse("unknown"), None);
    }

    #[test]
    fn set_transcript_updates_only_one_triple() {
        let mut rec = sample();
        rec.set_transcript(
            TranscriptKind::Ly,
            "speech".to_owned(),
            TranscriptStatus::Success,
            0,
        );
        assert_eq!(rec.ly_transcript, "speech");
        assert_eq!(rec.ly_status, TranscriptStatus::Success);
        assert_eq!(rec.ly_retries, 0);
        assert_eq!(rec.ai_transcript, "text");
        assert_eq!(rec.ai_status, TranscriptStatus::Success);
    }

    #[test]
    fn copy_transcript_from_carries_the_full_triple() {
        let mut stale = sample();
        let mut fresh = sample();
        fresh.set_transcript(
            TranscriptKind::Ly,
            "recovered".to_owned(),
            TranscriptStatus::Success,
            0,
        );

        stale.copy_transcript_from(&fresh, TranscriptKind::Ly);
        assert_eq!(stale.ly_transcript, "recovered");
        assert_eq!(stale.ly_status, TranscriptStatus::Success);
        assert_eq!(stale.ly_retries, 0);
    }

    #[test]
    fn taipei_now_is_utc_plus_eight_with_whole_seconds() {
        let now = taipei_now();
        assert_eq!(now.offset().local_minus_utc(), 8 * 3600);
        assert_eq!(now.nanosecond(), 0);
    }
}
