//! Transport for the legacy speech page
//!
//! The speech endpoint negotiates TLSv1.2 with a certificate chain the
//! engine accepts without verification, for this endpoint only. The default
//! is an in-process lenient client; [`SpeechTransport::Curl`] shells out to
//! the system curl and remains available where the in-process TLS stack
//! refuses the handshake.

use ivod_core::CrawlerError;
use std::time::Duration;
use tokio::process::Command;

use crate::fetcher::{USER_AGENT, classify};

pub enum SpeechTransport {
    LenientTls(reqwest::Client),
    Curl,
}

impl SpeechTransport {
    /// In-process client with certificate verification disabled and a
    /// TLSv1.2 floor
    ///
    /// # Errors
    /// Returns `CrawlerError::Ssl` if the client cannot be built
    pub fn lenient(timeout: Duration) -> Result<Self, CrawlerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| CrawlerError::Ssl {
                url: "https://ivod.ly.gov.tw".to_owned(),
                message: e.to_string(),
            })?;
        Ok(Self::LenientTls(client))
    }

    /// Raw page body; empty when the page reports no transcript
    ///
    /// # Errors
    /// Returns a transport-class `CrawlerError` on connection failure
    pub async fn fetch(&self, url: &str) -> Result<String, CrawlerError> {
        match self {
            Self::LenientTls(client) => {
                let response = client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| classify(url, &e))?;
                if !response.status().is_success() {
                    return Ok(String::new());
                }
                response.text().await.map_err(|e| classify(url, &e))
            }
            Self::Curl => {
                let output = Command::new("curl")
                    .args(["--tlsv1.2", "--insecure", "-sSf", url])
                    .output()
                    .await
                    .map_err(|e| CrawlerError::Network {
                        url: url.to_owned(),
                        message: e.to_string(),
                    })?;
                if !output.status.success() {
                    return Ok(String::new());
                }
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
        }
    }
}
