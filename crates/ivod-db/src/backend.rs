//! Dialect adapters
//!
//! The three backends differ in the `committee_names` column shape (native
//! array on Postgres, JSON document on MySQL, serialized JSON text on
//! SQLite), in the timestamp column types (instants vs RFC 3339 text), and
//! in the large-text column type for transcripts. Everything above this
//! module sees `Vec<String>` and `DateTime<FixedOffset>`.

pub(crate) mod mysql;
pub(crate) mod postgres;
pub(crate) mod sqlite;

use crate::DbError;
use ivod_core::TranscriptStatus;

pub(crate) fn decode_status(raw: &str, column: &'static str) -> Result<TranscriptStatus, DbError> {
    TranscriptStatus::parse(raw).ok_or_else(|| DbError::Decode {
        column,
        message: format!("unknown status {raw:?}"),
    })
}

pub(crate) fn encode_committees(names: &[String]) -> String {
    serde_json::to_string(names).unwrap_or_else(|_| "[]".to_owned())
}

pub(crate) fn decode_committees(raw: Option<&str>) -> Result<Vec<String>, DbError> {
    match raw {
        None | Some("") => Ok(Vec::new()),
        Some(s) => serde_json::from_str(s).map_err(|e| DbError::Decode {
            column: "committee_names",
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn committee_names_round_trip_preserves_order() {
        let names = vec![
            "內政委員會".to_owned(),
            "外交及國防委員會".to_owned(),
            "經濟委員會".to_owned(),
        ];
        let encoded = encode_committees(&names);
        assert_eq!(decode_committees(Some(&encoded)).unwrap(), names);
    }

    #[test]
    fn missing_and_empty_decode_to_empty() {
        assert!(decode_committees(None).unwrap().is_empty());
        assert!(decode_committees(Some("")).unwrap().is_empty());
    }

    #[test]
    fn garbage_committee_text_is_a_decode_error() {
        assert!(matches!(
            decode_committees(Some("not json")),
            Err(DbError::Decode { column: "committee_names", .. })
        ));
    }

    #[test]
    fn unknown_status_is_a_decode_error() {
        assert!(decode_status("success", "ai_status").is_ok());
        assert!(decode_status("done", "ai_status").is_err());
    }
}
