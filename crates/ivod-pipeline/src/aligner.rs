//! Search index aligner
//!
//! Compares `title`, `ai_transcript` and `ly_transcript` between the Store
//! and the search index, and bulk-indexes only the documents that differ.
//! The index speaks the Elasticsearch REST API; every call rides the
//! workspace HTTP client.

use chrono::Duration;
use color_eyre::eyre::{Result, bail};
use ivod_core::IvodTranscript;
use ivod_db::Store;
use reqwest::{Method, StatusCode, header::CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt::Write as _;
use tracing::{debug, info};

use crate::config::{ElasticsearchConfig, Environment};

const BULK_FLUSH: usize = 100;

/// Which Store rows to reconcile with the index
#[derive(Debug, Clone)]
pub enum AlignSelector {
    Ids(Vec<i64>),
    Full,
    Recent(Duration),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AlignStats {
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Serialize)]
struct IndexDoc {
    ivod_id: i64,
    ai_transcript: String,
    ly_transcript: String,
    title: String,
    last_updated: String,
}

#[derive(Debug, Default, Deserialize)]
struct IndexedSource {
    #[serde(default)]
    ai_transcript: String,
    #[serde(default)]
    ly_transcript: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct GetDocResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source", default)]
    source: Option<IndexedSource>,
}

#[derive(Debug, Default, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<BulkItem>,
}

#[derive(Debug, Default, Deserialize)]
struct BulkItem {
    #[serde(default)]
    index: Option<BulkItemStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct BulkItemStatus {
    #[serde(rename = "_id", default)]
    id: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

fn index_mapping() -> Value {
    json!({
        "settings": {
            "analysis": {
                "analyzer": {
                    "chinese_analyzer": {
                        "tokenizer": "ik_max_word",
                        "filter": ["lowercase"]
                    }
                }
            }
        },
        "mappings": {
            "properties": {
                "ivod_id": {"type": "integer"},
                "ai_transcript": {"type": "text", "analyzer": "chinese_analyzer"},
                "ly_transcript": {"type": "text", "analyzer": "chinese_analyzer"},
                "title": {"type": "text", "analyzer": "chinese_analyzer"},
                "last_updated": {"type": "date"}
            }
        }
    })
}

pub struct IndexAligner {
    client: reqwest::Client,
    base_url: String,
    index: String,
    auth: Option<(String, String)>,
}

impl IndexAligner {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    pub fn from_config(cfg: &ElasticsearchConfig, env: Environment) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.base_url(),
            index: cfg.index(env).to_owned(),
            auth: cfg.auth(),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(method, format!("{}{path}", self.base_url));
        if let Some((user, pass)) = &self.auth {
            request = request.basic_auth(user, Some(pass));
        }
        request
    }

    /// Availability probe; any failure reads as "unavailable"
    pub async fn ping(&self) -> bool {
        match self.request(Method::GET, "/").send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Search index unreachable: {e}");
                false
            }
        }
    }

    /// Create the index with the Chinese-analyzer mapping if absent;
    /// a second call is a no-op
    ///
    /// # Errors
    /// Returns an error on unexpected HTTP statuses
    pub async fn ensure_index(&self) -> Result<()> {
        let path = format!("/{}", self.index);
        let probe = self.request(Method::HEAD, &path).send().await?;
        if probe.status().is_success() {
            return Ok(());
        }
        if probe.status() != StatusCode::NOT_FOUND {
            bail!(
                "unexpected status probing index {}: {}",
                self.index,
                probe.status()
            );
        }
        let response = self
            .request(Method::PUT, &path)
            .json(&index_mapping())
            .send()
            .await?;
        if !response.status().is_success() {
            bail!(
                "failed to create index {}: HTTP {}",
                self.index,
                response.status()
            );
        }
        info!("Created search index {}", self.index);
        Ok(())
    }

    async fn fetch_doc(&self, ivod_id: i64) -> Option<IndexedSource> {
        let path = format!("/{}/_doc/{ivod_id}", self.index);
        let response = self.request(Method::GET, &path).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let doc: GetDocResponse = response.json().await.ok()?;
        if doc.found { doc.source } else { None }
    }

    async fn flush_bulk(&self, docs: &[IndexDoc]) -> (usize, usize) {
        let payload = bulk_payload(&self.index, docs);
        let response = self
            .request(Method::POST, "/_bulk")
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(payload)
            .send()
            .await;
        let body: BulkResponse = match response {
            Ok(r) if r.status().is_success() => match r.json().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!("Bulk response unreadable: {e}");
                    return (0, docs.len());
                }
            },
            Ok(r) => {
                tracing::error!("Bulk indexing failed: HTTP {}", r.status());
                return (0, docs.len());
            }
            Err(e) => {
                tracing::error!("Bulk indexing failed: {e}");
                return (0, docs.len());
            }
        };
        if !body.errors {
            return (docs.len(), 0);
        }
        let mut ok = 0;
        let mut errors = 0;
        for item in &body.items {
            match &item.index {
                Some(status) if status.error.is_some() => {
                    errors += 1;
                    tracing::error!(
                        "Indexing failed for id {:?}: {:?}",
                        status.id,
                        status.error
                    );
                }
                _ => ok += 1,
            }
        }
        (ok, errors)
    }

    /// Reconcile the selected Store rows with the index
    ///
    /// Documents are compared on `title`, `ai_transcript` and
    /// `ly_transcript`; unchanged ones are skipped, the rest are
    /// bulk-indexed in flushes of 100. Per-item failures are counted and
    /// never abort the run.
    ///
    /// # Errors
    /// Returns an error only if the Store query fails
    pub async fn align(&self, store: &Store, selector: &AlignSelector) -> Result<AlignStats> {
        let candidates = match selector {
            AlignSelector::Ids(ids) => store.get_many(ids).await?,
            AlignSelector::Full => store.fetch_all().await?,
            AlignSelector::Recent(window) => store.query_recently_updated(*window).await?,
        };
        info!(
            "Aligning {} candidate records with index {}",
            candidates.len(),
            self.index
        );

        let mut stats = AlignStats::default();
        let mut pending: Vec<IndexDoc> = Vec::new();
        for rec in &candidates {
            let indexed = self.fetch_doc(rec.ivod_id).await;
            if needs_update(rec, indexed.as_ref()) {
                pending.push(document(rec));
            } else {
                stats.skipped += 1;
            }
            if pending.len() >= BULK_FLUSH {
                let (ok, errors) = self.flush_bulk(&pending).await;
                stats.updated += ok;
                stats.errors += errors;
                pending.clear();
            }
        }
        if !pending.is_empty() {
            let (ok, errors) = self.flush_bulk(&pending).await;
            stats.updated += ok;
            stats.errors += errors;
        }
        Ok(stats)
    }
}

fn needs_update(rec: &IvodTranscript, indexed: Option<&IndexedSource>) -> bool {
    indexed.is_none_or(|source| {
        source.ai_transcript != rec.ai_transcript
            || source.ly_transcript != rec.ly_transcript
            || source.title != rec.title.as_deref().unwrap_or_default()
    })
}

fn document(rec: &IvodTranscript) -> IndexDoc {
    IndexDoc {
        ivod_id: rec.ivod_id,
        ai_transcript: rec.ai_transcript.clone(),
        ly_transcript: rec.ly_transcript.clone(),
        title: rec.title.clone().unwrap_or_default(),
        last_updated: rec.last_updated.to_rfc3339(),
    }
}

fn bulk_payload(index: &str, docs: &[IndexDoc]) -> String {
    let mut payload = String::new();
    for doc in docs {
        let action = json!({"index": {"_index": index, "_id": doc.ivod_id}});
        let _ = writeln!(payload, "{action}");
        if let Ok(body) = serde_json::to_string(doc) {
            let _ = writeln!(payload, "{body}");
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use ivod_core::{TranscriptStatus, taipei_now, taipei_tz};

    fn record(ivod_id: i64) -> IvodTranscript {
        let tz = taipei_tz();
        IvodTranscript {
            ivod_id,
            ivod_url: String::new(),
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
            committee_names: Vec::new(),
            ai_transcript: "ai".to_owned(),
            ai_status: TranscriptStatus::Success,
            ai_retries: 0,
            ly_transcript: "ly".to_owned(),
            ly_status: TranscriptStatus::Success,
            ly_retries: 0,
            last_updated: taipei_now(),
        }
    }

    #[test]
    fn absent_document_needs_indexing() {
        assert!(needs_update(&record(1), None));
    }

    #[test]
    fn identical_document_is_skipped() {
        let source = IndexedSource {
            ai_transcript: "ai".to_owned(),
            ly_transcript: "ly".to_owned(),
            title: "院會".to_owned(),
        };
        assert!(!needs_update(&record(1), Some(&source)));
    }

    #[test]
    fn any_compared_field_difference_triggers_update() {
        let base = IndexedSource {
            ai_transcript: "ai".to_owned(),
            ly_transcript: "ly".to_owned(),
            title: "院會".to_owned(),
        };
        let mut changed = IndexedSource {
            ai_transcript: "other".to_owned(),
            ..base
        };
        assert!(needs_update(&record(1), Some(&changed)));
        changed.ai_transcript = "ai".to_owned();
        changed.title = "委員會".to_owned();
        assert!(needs_update(&record(1), Some(&changed)));
    }

    #[test]
    fn bulk_payload_interleaves_actions_and_documents() {
        let docs = vec![document(&record(1)), document(&record(2))];
        let payload = bulk_payload("ivod_transcripts", &docs);
        let lines: Vec<&str> = payload.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains(r#""_index":"ivod_transcripts""#));
        assert!(lines[0].contains(r#""_id":1"#));
        assert!(lines[1].contains(r#""ivod_id":1"#));
        assert!(lines[2].contains(r#""_id":2"#));
        assert!(payload.ends_with('\n'));
    }

    #[test]
    fn mapping_declares_the_chinese_analyzer_fields() {
        let mapping = index_mapping();
        assert_eq!(
            mapping["settings"]["analysis"]["analyzer"]["chinese_analyzer"]["tokenizer"],
            "ik_max_word"
        );
        for field in ["ai_transcript", "ly_transcript", "title"] {
            assert_eq!(
                mapping["mappings"]["properties"][field]["analyzer"],
                "chinese_analyzer"
            );
        }
        assert_eq!(mapping["mappings"]["properties"]["ivod_id"]["type"], "integer");
        assert_eq!(
            mapping["mappings"]["properties"]["last_updated"]["type"],
            "date"
        );
    }
}
