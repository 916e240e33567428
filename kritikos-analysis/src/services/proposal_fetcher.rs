//! Proposal text retrieval
//!
//! Sources are tried in order: the object-storage mirror written by the ETL
//! collectors, then the Chamber's "inteiro teor" document. When neither
//! yields text, the official one-paragraph description (ementa) stands in.
//! Text below [`MIN_TEXT_CHARS`] is not worth an LLM call and the proposal is
//! skipped.

use async_trait::async_trait;
use kritikos_common::db::Proposal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::utils::text::{html_to_text, looks_like_html};

/// Minimum length for a storage object to count as the bill text
pub const MIN_SOURCE_CHARS: usize = 100;
/// Minimum length for any text to be analyzed
pub const MIN_TEXT_CHARS: usize = 200;

pub const DEFAULT_STORAGE_BASE_URL: &str = "https://storage.googleapis.com/kritikos-emendas-prod";
pub const DEFAULT_CAMARA_API_BASE_URL: &str = "https://dadosabertos.camara.leg.br/api/v2";

/// Fetch errors
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Text retrieved for a proposal
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedText {
    pub text: String,
    /// Source name (or location) the text came from
    pub source: String,
    /// True when only the ementa was available
    pub is_fallback: bool,
}

impl FetchedText {
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// One place bill text can come from
#[async_trait]
pub trait TextSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` when this source has nothing for the proposal
    async fn fetch(&self, proposal: &Proposal) -> Result<Option<String>, FetchError>;
}

/// Result of running the whole chain
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Found(FetchedText),
    /// Nothing usable; `chars` is the length of the best candidate
    TooShort { chars: usize },
}

/// Ordered chain of text sources with the ementa fallback
pub struct ProposalFetcher {
    sources: Vec<Arc<dyn TextSource>>,
    min_text_chars: usize,
}

impl ProposalFetcher {
    pub fn new(sources: Vec<Arc<dyn TextSource>>) -> Self {
        Self {
            sources,
            min_text_chars: MIN_TEXT_CHARS,
        }
    }

    /// Production chain: object storage, then the Chamber API
    pub fn with_default_sources(
        storage_base_url: &str,
        camara_api_base_url: &str,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let http_client = build_http_client(timeout)?;
        Ok(Self::new(vec![
            Arc::new(ObjectStorageSource::new(http_client.clone(), storage_base_url)),
            Arc::new(CamaraApiSource::new(http_client, camara_api_base_url)),
        ]))
    }

    /// Retrieve the text to analyze
    ///
    /// Source errors are logged and the next source is tried. If nothing
    /// usable turns up and some source errored, the last error is returned
    /// so the item is retried later instead of being skipped.
    pub async fn fetch(&self, proposal: &Proposal) -> Result<FetchOutcome, FetchError> {
        let mut last_error = None;

        for source in &self.sources {
            match source.fetch(proposal).await {
                Ok(Some(text)) => {
                    let fetched = FetchedText {
                        text,
                        source: source.name().to_string(),
                        is_fallback: false,
                    };
                    if fetched.char_count() >= self.min_text_chars {
                        tracing::debug!(
                            proposal_id = proposal.id,
                            source = source.name(),
                            chars = fetched.char_count(),
                            "Proposal text fetched"
                        );
                        return Ok(FetchOutcome::Found(fetched));
                    }
                    tracing::debug!(
                        proposal_id = proposal.id,
                        source = source.name(),
                        chars = fetched.char_count(),
                        "Source text too short, trying next source"
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        proposal_id = proposal.id,
                        source = source.name(),
                        error = %e,
                        "Text source failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        let ementa = proposal
            .summary_line
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        if let Some(ementa) = ementa {
            let fallback = FetchedText {
                text: ementa.to_string(),
                source: "ementa".to_string(),
                is_fallback: true,
            };
            if fallback.char_count() >= self.min_text_chars {
                tracing::info!(proposal_id = proposal.id, "Using ementa as proposal text");
                return Ok(FetchOutcome::Found(fallback));
            }
            if let Some(e) = last_error {
                return Err(e);
            }
            return Ok(FetchOutcome::TooShort {
                chars: fallback.char_count(),
            });
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(FetchOutcome::TooShort { chars: 0 }),
        }
    }
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .user_agent(kritikos_common::config::get_user_agent())
        .timeout(timeout)
        .build()
        .map_err(|e| FetchError::Network(e.to_string()))
}

/// Text mirrored to object storage by the ETL collectors
///
/// Layout: `proposicoes/{year}/{kind}/texto-completo/{kind}-{camara_id}-texto-completo.txt`
/// with HTML and JSON variants. `gs://` URLs are read through the public
/// HTTPS endpoint.
pub struct ObjectStorageSource {
    http_client: reqwest::Client,
    base_url: String,
}

impl ObjectStorageSource {
    pub fn new(http_client: reqwest::Client, base_url: &str) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Candidate object URLs, most specific first
    pub fn candidate_urls(&self, proposal: &Proposal) -> Vec<String> {
        let mut urls = Vec::new();

        if let Some(url) = proposal.storage_url.as_deref().filter(|u| !u.trim().is_empty()) {
            urls.push(public_object_url(url));
        }

        if let Some(year) = proposal.year {
            let kind = &proposal.kind;
            let id = proposal.camara_id;
            let prefix = format!("{}/proposicoes/{}/{}", self.base_url, year, kind);
            for path in [
                format!("{}/texto-completo/{}-{}-texto-completo.txt", prefix, kind, id),
                format!("{}/texto-completo/{}-{}-texto.html", prefix, kind, id),
                format!("{}/documento/{}-{}-texto.html", prefix, kind, id),
                format!("{}/texto-completo/{}-{}.json", prefix, kind, id),
            ] {
                if !urls.contains(&path) {
                    urls.push(path);
                }
            }
        }

        urls
    }

    async fn fetch_object(&self, url: &str) -> Result<Option<String>, FetchError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::FORBIDDEN {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Api(status.as_u16(), body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let text = if url.ends_with(".json") {
            text_from_json(&body)?
        } else if url.ends_with(".html") || looks_like_html(&body) {
            Some(html_to_text(&body))
        } else {
            Some(body.trim().to_string())
        };

        Ok(text.filter(|t| t.chars().count() > MIN_SOURCE_CHARS))
    }
}

#[async_trait]
impl TextSource for ObjectStorageSource {
    fn name(&self) -> &'static str {
        "object_storage"
    }

    async fn fetch(&self, proposal: &Proposal) -> Result<Option<String>, FetchError> {
        let mut last_error = None;

        for url in self.candidate_urls(proposal) {
            match self.fetch_object(&url).await {
                Ok(Some(text)) => {
                    tracing::debug!(proposal_id = proposal.id, url = %url, "Storage object found");
                    return Ok(Some(text));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(proposal_id = proposal.id, url = %url, error = %e, "Storage object failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

/// `gs://bucket/path` → public HTTPS URL; other URLs unchanged
fn public_object_url(url: &str) -> String {
    match url.strip_prefix("gs://") {
        Some(rest) => format!("https://storage.googleapis.com/{}", rest),
        None => url.to_string(),
    }
}

/// Text field of a JSON storage object
fn text_from_json(body: &str) -> Result<Option<String>, FetchError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(e.to_string()))?;
    Ok(["texto", "text", "conteudo", "content"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(|s| s.trim().to_string()))
}

/// Full-text document published by the Chamber of Deputies
///
/// Uses the proposal's stored document URL, or looks it up through
/// `GET {api}/proposicoes/{id}` (`dados.urlInteiroTeor`). Only HTML and plain
/// text bodies are read; PDF documents yield nothing.
pub struct CamaraApiSource {
    http_client: reqwest::Client,
    api_base_url: String,
}

impl CamaraApiSource {
    pub fn new(http_client: reqwest::Client, api_base_url: &str) -> Self {
        Self {
            http_client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn lookup_document_url(&self, camara_id: i64) -> Result<Option<String>, FetchError> {
        let url = format!("{}/proposicoes/{}", self.api_base_url, camara_id);
        let response = self
            .http_client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Api(status.as_u16(), body));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))?;

        Ok(value
            .pointer("/dados/urlInteiroTeor")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string))
    }
}

#[async_trait]
impl TextSource for CamaraApiSource {
    fn name(&self) -> &'static str {
        "camara_api"
    }

    async fn fetch(&self, proposal: &Proposal) -> Result<Option<String>, FetchError> {
        let document_url = match proposal.full_text_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => url.to_string(),
            None => match self.lookup_document_url(proposal.camara_id).await? {
                Some(url) => url,
                None => return Ok(None),
            },
        };

        let response = self
            .http_client
            .get(&document_url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(FetchError::Api(status.as_u16(), document_url));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.contains("pdf") || content_type.contains("octet-stream") {
            tracing::debug!(
                proposal_id = proposal.id,
                url = %document_url,
                "Full-text document is binary, not extracted"
            );
            return Ok(None);
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let text = if content_type.contains("html") || looks_like_html(&body) {
            html_to_text(&body)
        } else {
            body.trim().to_string()
        };

        Ok(Some(text).filter(|t| !t.is_empty()))
    }
}
