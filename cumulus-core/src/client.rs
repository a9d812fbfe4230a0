use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::info;
use url::Url;

use crate::checksums::ChecksumKind;

const BULK_PATH: &str = "/remote.php/dav/bulk";
const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Error)]
pub enum DavError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid part header {name}: {value}")]
    Header { name: String, value: String },
    #[error("malformed bulk reply: {0}")]
    Reply(#[from] serde_json::Error),
}

/// Server capabilities relevant to uploads, as advertised by the account.
#[derive(Debug, Clone)]
pub struct Capabilities {
    /// Checksum types the server accepts for transmission verification.
    pub supported_checksum_types: Vec<ChecksumKind>,
    /// Type of the content checksum stored in the journal; `None` skips
    /// the content checksum.
    pub preferred_checksum_type: Option<ChecksumKind>,
    /// Transmission checksum type; `None` disables the transmission checksum.
    pub upload_checksum_kind: Option<ChecksumKind>,
    /// HTTP codes that count towards resetting a repeatedly failing upload.
    pub reset_error_codes: Vec<u16>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            supported_checksum_types: vec![ChecksumKind::Md5],
            preferred_checksum_type: Some(ChecksumKind::Md5),
            upload_checksum_kind: Some(ChecksumKind::Md5),
            reset_error_codes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub url: Url,
    pub user: String,
    pub password: String,
    pub capabilities: Capabilities,
}

/// One part of a bulk PUT: the per-file headers plus a streaming body.
pub struct BulkPart {
    pub headers: BTreeMap<String, String>,
    pub body: Body,
    pub content_length: u64,
}

/// Parsed outcome of a bulk PUT. The HTTP status is shared by every part;
/// per-file metadata lives in `replies`. `body` keeps the raw payload so
/// callers can extract a server error message from non-success responses.
#[derive(Debug)]
pub struct BulkResponse {
    pub status: StatusCode,
    pub request_id: String,
    pub timestamp: OffsetDateTime,
    pub replies: Vec<FileReply>,
    pub body: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileReply {
    #[serde(rename = "X-File-Path", default)]
    pub file_path: String,
    #[serde(rename = "OC-ETag", default)]
    pub oc_etag: String,
    #[serde(rename = "ETag", default)]
    pub etag: String,
    #[serde(rename = "OC-FileID", default)]
    pub file_id: String,
    #[serde(rename = "OC-JobStatus-Location", default)]
    pub job_status_location: String,
    #[serde(rename = "X-OC-MTime", default)]
    pub mtime_ack: String,
}

/// Reply of a job-status poll. `status` cycles through `init`/`started`
/// before settling on `finished` or `error`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollReply {
    #[serde(default)]
    pub status: String,
    #[serde(rename = "errorCode", default)]
    pub error_code: u16,
    #[serde(default)]
    pub error: String,
    #[serde(rename = "ETag", default)]
    pub etag: String,
    #[serde(rename = "OC-FileID", default)]
    pub file_id: String,
}

impl PollReply {
    pub fn is_pending(&self) -> bool {
        matches!(self.status.as_str(), "" | "init" | "started")
    }
}

#[derive(Clone)]
pub struct DavClient {
    http: Client,
    account: Account,
}

impl DavClient {
    pub fn new(account: Account) -> Self {
        Self {
            http: Client::new(),
            account,
        }
    }

    pub fn with_http(http: Client, account: Account) -> Self {
        Self { http, account }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Sends every part in one multi-part PUT against the bulk endpoint.
    ///
    /// Any HTTP status is returned as `Ok`; only transport failures and a
    /// 2xx body that fails to parse as the JSON reply array are errors.
    pub async fn bulk_put(
        &self,
        parts: Vec<BulkPart>,
        timeout: Duration,
    ) -> Result<BulkResponse, DavError> {
        let url = self.account.url.join(BULK_PATH)?;
        info!(parts = parts.len(), %url, "bulk PUT");

        let mut form = Form::new();
        for part in parts {
            let mut headers = HeaderMap::new();
            for (name, value) in &part.headers {
                let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                    DavError::Header {
                        name: name.clone(),
                        value: value.clone(),
                    }
                })?;
                let header_value =
                    HeaderValue::from_str(value).map_err(|_| DavError::Header {
                        name: name.clone(),
                        value: value.clone(),
                    })?;
                headers.insert(header_name, header_value);
            }
            form = form.part(
                "file",
                Part::stream_with_length(part.body, part.content_length).headers(headers),
            );
        }

        let response = self
            .http
            .put(url)
            .basic_auth(&self.account.user, Some(&self.account.password))
            .timeout(timeout)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await.unwrap_or_default();
        let replies = if status.is_success() && !body.trim().is_empty() {
            serde_json::from_str(&body)?
        } else {
            Vec::new()
        };

        Ok(BulkResponse {
            status,
            request_id,
            timestamp: OffsetDateTime::now_utc(),
            replies,
            body,
        })
    }

    /// One GET against a job-status URL. Relative poll locations are
    /// resolved against the account base URL.
    pub async fn poll_job_status(
        &self,
        location: &str,
    ) -> Result<(StatusCode, PollReply), DavError> {
        let url = self.account.url.join(location)?;
        let response = self
            .http
            .get(url)
            .basic_auth(&self.account.user, Some(&self.account.password))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let reply = serde_json::from_str(&body).unwrap_or_default();
        Ok((status, reply))
    }
}

/// Strips the quoting the server puts around etags, plus the `-gzip`
/// marker some proxies append inside the quotes.
pub fn parse_etag(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.strip_suffix("-gzip").unwrap_or(unquoted).to_string()
}

/// Grows a request timeout for large payloads: three minutes per gigabyte,
/// never below the current timeout, never above thirty minutes.
pub fn grow_timeout_for_size(current: Duration, total_bytes: u64) -> Duration {
    const PER_GIGABYTE_MS: f64 = 3.0 * 60.0 * 1000.0;
    const MAX: Duration = Duration::from_secs(30 * 60);

    let scaled =
        Duration::from_millis((PER_GIGABYTE_MS * total_bytes as f64 / 1e9).round() as u64);
    current.max(scaled.min(MAX))
}
