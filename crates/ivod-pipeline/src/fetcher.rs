//! Stateless HTTP access to the IVOD catalog
//!
//! Every call sleeps a uniform random duration first to stay polite with
//! the upstream, then retries transport-class failures with exponential
//! backoff.

use backon::{ExponentialBuilder, Retryable};
use chrono::NaiveDate;
use ivod_core::CrawlerError;
use rand::Rng;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use crate::assembler::RawIvod;
use crate::config::CrawlerConfig;
use crate::speech::SpeechTransport;

pub(crate) const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/113.0.0.0 Safari/537.36";

const API_BASE: &str = "https://ly.govapi.tw/v2";
const SPEECH_BASE: &str = "https://ivod.ly.gov.tw/Demand/Speech";
const TRANSPORT_RETRIES: usize = 3;

/// Envelope of the catalog list endpoints
#[derive(Debug, Default, Deserialize)]
pub struct IvodListResponse {
    #[serde(default)]
    pub ivods: Vec<IvodListEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IvodListEntry {
    #[serde(rename = "IVOD_ID", default)]
    pub ivod_id: Option<String>,
    #[serde(rename = "日期", default)]
    pub date: Option<String>,
}

/// Envelope of the per-record endpoint
#[derive(Debug, Default, Deserialize)]
pub struct IvodDetailResponse {
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<RawIvod>,
}

pub(crate) fn classify(url: &str, err: &reqwest::Error) -> CrawlerError {
    if err.is_timeout() {
        return CrawlerError::Timeout {
            url: url.to_owned(),
        };
    }
    let message = err.to_string();
    let chain = format!("{err:?}");
    if chain.contains("certificate") || chain.contains("Tls") || chain.contains("ssl") {
        CrawlerError::Ssl {
            url: url.to_owned(),
            message,
        }
    } else {
        CrawlerError::Network {
            url: url.to_owned(),
            message,
        }
    }
}

pub struct IvodFetcher {
    client: reqwest::Client,
    speech: SpeechTransport,
    min_sleep: f64,
    max_sleep: f64,
}

impl IvodFetcher {
    /// Build a fetcher from the crawler configuration
    ///
    /// # Errors
    /// Returns a transport-class `CrawlerError` if a client cannot be built
    pub fn new(cfg: &CrawlerConfig) -> Result<Self, CrawlerError> {
        let timeout = Duration::from_secs(cfg.crawler_timeout);
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT);
        if cfg.skip_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().map_err(|e| CrawlerError::Network {
            url: API_BASE.to_owned(),
            message: e.to_string(),
        })?;
        let speech = SpeechTransport::lenient(timeout)?;
        Ok(Self {
            client,
            speech,
            min_sleep: cfg.min_sleep,
            max_sleep: cfg.max_sleep,
        })
    }

    /// Swap the speech-page transport (curl fallback, test stubs)
    #[must_use]
    pub fn with_speech_transport(mut self, speech: SpeechTransport) -> Self {
        self.speech = speech;
        self
    }

    async fn polite_sleep(&self) {
        let secs = if self.max_sleep > self.min_sleep {
            rand::thread_rng().gen_range(self.min_sleep..=self.max_sleep)
        } else {
            self.min_sleep
        };
        if secs > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(secs)).await;
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, CrawlerError> {
        self.polite_sleep().await;
        let fetch = || async {
            debug!("Fetching {url}");
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| classify(url, &e))?
                .error_for_status()
                .map_err(|e| classify(url, &e))?;
            response.json::<T>().await.map_err(|e| {
                if e.is_decode() {
                    CrawlerError::Parsing {
                        field: "body".to_owned(),
                        raw: e.to_string(),
                    }
                } else {
                    classify(url, &e)
                }
            })
        };
        fetch
            .retry(
                ExponentialBuilder::default()
                    .with_max_times(TRANSPORT_RETRIES)
                    .with_min_delay(Duration::from_secs(1))
                    .with_max_delay(Duration::from_secs(10)),
            )
            .when(CrawlerError::is_transient)
            .notify(|err, dur| warn!("Request failed, retrying in {dur:?}: {err}"))
            .await
    }

    /// Calendar date of the most recent record in the catalog
    ///
    /// # Errors
    /// Returns `CrawlerError` on transport failure or an empty catalog
    pub async fn latest_date(&self) -> Result<NaiveDate, CrawlerError> {
        let url = format!("{API_BASE}/ivods?limit=1");
        let list: IvodListResponse = self.get_json(&url).await?;
        let entry = list.ivods.first().ok_or_else(|| CrawlerError::Data {
            field: "ivods".to_owned(),
        })?;
        let raw = entry.date.as_deref().ok_or_else(|| CrawlerError::Data {
            field: "日期".to_owned(),
        })?;
        raw.parse().map_err(|_| CrawlerError::Parsing {
            field: "日期".to_owned(),
            raw: raw.to_owned(),
        })
    }

    /// Ordered ids published for one calendar date (limit 600)
    ///
    /// # Errors
    /// Returns `CrawlerError` on transport failure
    pub async fn list_ids(&self, date: NaiveDate) -> Result<Vec<i64>, CrawlerError> {
        let url = format!("{API_BASE}/ivods?日期={date}&limit=600");
        let list: IvodListResponse = self.get_json(&url).await?;
        Ok(parse_id_list(&list))
    }

    /// Raw per-record document
    ///
    /// # Errors
    /// Returns `CrawlerError::Api` when the envelope carries `error=true`,
    /// `CrawlerError::Data` when it carries no data
    pub async fn get_record(&self, ivod_id: i64) -> Result<RawIvod, CrawlerError> {
        let url = format!("{API_BASE}/ivods/{ivod_id}");
        let detail: IvodDetailResponse = self.get_json(&url).await?;
        if detail.error {
            return Err(CrawlerError::Api {
                ivod_id,
                message: detail
                    .message
                    .unwrap_or_else(|| "unknown error".to_owned()),
            });
        }
        detail.data.ok_or_else(|| CrawlerError::Data {
            field: "data".to_owned(),
        })
    }

    /// Plain text of the loosely structured speech page
    ///
    /// An empty return is a valid "no transcript available" signal.
    ///
    /// # Errors
    /// Returns a transport-class `CrawlerError` on connection failure
    pub async fn get_speech(&self, ivod_id: i64) -> Result<String, CrawlerError> {
        self.polite_sleep().await;
        let url = format!("{SPEECH_BASE}/{ivod_id}");
        let body = self.speech.fetch(&url).await?;
        Ok(normalize_speech(&body))
    }
}

fn parse_id_list(list: &IvodListResponse) -> Vec<i64> {
    list.ivods
        .iter()
        .filter_map(|entry| {
            let raw = entry.ivod_id.as_deref()?;
            raw.parse().ok().or_else(|| {
                warn!("Skipping unparsable IVOD_ID {raw:?}");
                None
            })
        })
        .collect()
}

pub(crate) fn normalize_speech(body: &str) -> String {
    body.replace("<br />", "\n").trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_list_parses_decimal_strings_in_order() {
        let list: IvodListResponse = serde_json::from_value(json!({
            "ivods": [
                {"IVOD_ID": "159939", "日期": "2024-03-06"},
                {"IVOD_ID": "159940", "日期": "2024-03-06"},
                {"IVOD_ID": "oops"},
                {"日期": "2024-03-06"}
            ]
        }))
        .unwrap();
        assert_eq!(parse_id_list(&list), vec![159_939, 159_940]);
    }

    #[test]
    fn empty_envelope_yields_no_ids() {
        let list: IvodListResponse = serde_json::from_value(json!({})).unwrap();
        assert!(parse_id_list(&list).is_empty());
    }

    #[test]
    fn detail_envelope_error_flag_round_trips() {
        let detail: IvodDetailResponse = serde_json::from_value(json!({
            "error": true,
            "message": "not found"
        }))
        .unwrap();
        assert!(detail.error);
        assert_eq!(detail.message.as_deref(), Some("not found"));
        assert!(detail.data.is_none());
    }

    #[test]
    fn speech_normalization_replaces_breaks_and_trims() {
        assert_eq!(
            normalize_speech("  委員發言<br />第二段<br />\n  "),
            "委員發言\n第二段"
        );
        assert_eq!(normalize_speech("   \n"), "");
    }
}
