// Wayback Machine snapshot lookup

use crate::error::{ArchiveError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Fields requested from the CDX API, in row order.
pub const CDX_FIELDS: &str = "timestamp,original,mimetype,status,digest,length";
const CDX_FIELD_COUNT: usize = 6;
const TIMESTAMP_LEN: usize = 14;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub timestamp: String,
    pub original: String,
    pub mimetype: String,
    pub status: String,
    pub digest: String,
    pub length: String,
}

/// Source of archived captures for a URL, oldest first.
pub trait SnapshotIndex: Send + Sync {
    fn snapshots(&self, url: &str) -> impl Future<Output = Result<Vec<SnapshotRecord>>> + Send;
}

/// Snapshot index backed by the Wayback Machine CDX server.
#[derive(Debug, Clone)]
pub struct CdxSnapshotIndex {
    client: Client,
    api_url: String,
}

impl CdxSnapshotIndex {
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("webarchiver/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.into(),
        })
    }

    fn query_url(&self, url: &str) -> Result<Url> {
        Url::parse_with_params(
            &self.api_url,
            &[("url", url), ("output", "json"), ("fl", CDX_FIELDS)],
        )
        .map_err(|e| ArchiveError::Snapshot(format!("invalid CDX endpoint {}: {}", self.api_url, e)))
    }
}

impl SnapshotIndex for CdxSnapshotIndex {
    async fn snapshots(&self, url: &str) -> Result<Vec<SnapshotRecord>> {
        let query = self.query_url(url)?;
        debug!(url = %url, query = %query, "Querying snapshot index");

        let response = self.client.get(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ArchiveError::Snapshot(format!(
                "CDX server returned {} for {}",
                status.as_u16(),
                url
            )));
        }

        let body = response.text().await?;
        // the CDX server answers an empty body instead of `[]` for some misses
        if body.trim().is_empty() {
            return Err(ArchiveError::NoSnapshots(url.to_string()));
        }
        let rows: Vec<Vec<String>> = serde_json::from_str(&body)?;
        let records = parse_cdx_rows(url, rows)?;
        info!(url = %url, count = records.len(), "Found archived versions");
        Ok(records)
    }
}

/// Turn raw CDX rows into records. The first row is the header.
pub fn parse_cdx_rows(url: &str, rows: Vec<Vec<String>>) -> Result<Vec<SnapshotRecord>> {
    if rows.len() < 2 {
        return Err(ArchiveError::NoSnapshots(url.to_string()));
    }

    let records: Vec<SnapshotRecord> = rows
        .into_iter()
        .skip(1)
        .filter(|row| row.len() >= CDX_FIELD_COUNT)
        .map(|row| {
            let mut fields = row.into_iter();
            let mut next = || fields.next().unwrap_or_default();
            SnapshotRecord {
                timestamp: next(),
                original: next(),
                mimetype: next(),
                status: next(),
                digest: next(),
                length: next(),
            }
        })
        .collect();

    if records.is_empty() {
        return Err(ArchiveError::NoSnapshots(url.to_string()));
    }
    Ok(records)
}

/// Check a `YYYYMMDDHHMMSS` capture timestamp.
pub fn validate_timestamp(timestamp: &str) -> Result<&str> {
    if timestamp.len() == TIMESTAMP_LEN && timestamp.bytes().all(|b| b.is_ascii_digit()) {
        Ok(timestamp)
    } else {
        Err(ArchiveError::InvalidTimestamp(timestamp.to_string()))
    }
}

/// Address of a capture on the Wayback web frontend.
pub fn wayback_url(web_base: &str, timestamp: &str, url: &str) -> String {
    format!("{}/{}/{}", web_base.trim_end_matches('/'), timestamp, url)
}
