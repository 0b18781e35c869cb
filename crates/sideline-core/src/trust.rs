//! Trust metadata carried by upstream responses.
//!
//! The Workers API annotates responses with headers describing how fresh and
//! how authoritative the payload is. These are never computed here; they are
//! parsed, carried next to the payload and re-emitted unchanged.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub const HEADER_SCHEMA_VERSION: &str = "x-schema-version";
pub const HEADER_LAST_REFRESH: &str = "x-last-refresh";
pub const HEADER_REQUEST_ID: &str = "x-request-id";
pub const HEADER_STALE: &str = "x-stale";

/// Epoch values above this are milliseconds rather than seconds.
const EPOCH_MILLIS_CUTOFF: i64 = 100_000_000_000;

/// Freshness and provenance of an upstream payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustMetadata {
    pub schema_version: Option<String>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub request_id: Option<String>,
    pub stale: bool,
}

impl TrustMetadata {
    /// Extract trust metadata from response headers.
    ///
    /// Header names are matched case-insensitively. Unparsable timestamps are
    /// ignored rather than rejected.
    pub fn from_headers<'a, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut meta = Self::default();

        for (name, value) in headers {
            let value = value.trim();
            if name.eq_ignore_ascii_case(HEADER_SCHEMA_VERSION) {
                meta.schema_version = non_empty(value);
            } else if name.eq_ignore_ascii_case(HEADER_LAST_REFRESH) {
                meta.last_refresh = parse_timestamp(value);
                if meta.last_refresh.is_none() && !value.is_empty() {
                    tracing::debug!(value, "Ignoring unparsable x-last-refresh header");
                }
            } else if name.eq_ignore_ascii_case(HEADER_REQUEST_ID) {
                meta.request_id = non_empty(value);
            } else if name.eq_ignore_ascii_case(HEADER_STALE) {
                meta.stale = parse_flag(value);
            }
        }

        meta
    }

    /// Re-emit the metadata as canonical lowercase header pairs.
    pub fn to_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(4);
        if let Some(version) = &self.schema_version {
            headers.push((HEADER_SCHEMA_VERSION, version.clone()));
        }
        if let Some(refreshed) = &self.last_refresh {
            headers.push((HEADER_LAST_REFRESH, refreshed.to_rfc3339()));
        }
        if let Some(id) = &self.request_id {
            headers.push((HEADER_REQUEST_ID, id.clone()));
        }
        if self.stale {
            headers.push((HEADER_STALE, "true".to_string()));
        }
        headers
    }

    /// Time elapsed since the last upstream refresh, if known.
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_refresh.map(|refreshed| now - refreshed)
    }

    /// True when no trust header was present at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    let epoch: i64 = value.parse().ok()?;
    if epoch.abs() > EPOCH_MILLIS_CUTOFF {
        Utc.timestamp_millis_opt(epoch).single()
    } else {
        Utc.timestamp_opt(epoch, 0).single()
    }
}
