use std::{
    fs,
    path::{Path, PathBuf},
};

use k8s_openapi::chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::{Error, Result, config::Config};

/// Seconds of validity a token must have left to be used.
const MIN_REMAINING_SECS: i64 = 60;

/// Accepted non-RFC3339 `expiresAt` layouts, tried in order after RFC3339.
const EXPIRY_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%SUTC", "%Y-%m-%d %H:%M:%S"];

/// A token record from the SSO cache, as written by the AWS CLI.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheRecord {
    #[serde(default)]
    start_url: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_at: String,
}

/// A validated SSO access token. Never mutated once selected.
#[derive(Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub start_url: String,
    pub region: String,
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("expires_at", &self.expires_at)
            .field("start_url", &self.start_url)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// The directory of JSON token records maintained by the external SSO login.
#[derive(Debug, Clone)]
pub struct TokenCache {
    dir: PathBuf,
}

impl TokenCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Select the freshest valid token for `start_url` and `region`.
    ///
    /// Empty filters match everything; the region comparison ignores case.
    /// Unreadable or malformed records are skipped. Fails with
    /// [`Error::SsoNotLoggedIn`] when nothing valid remains.
    pub fn resolve(&self, start_url: &str, region: &str, now: DateTime<Utc>) -> Result<CachedToken> {
        let entries = fs::read_dir(&self.dir).map_err(|source| Error::TokenStoreUnreadable {
            path: self.dir.clone(),
            source,
        })?;

        let start_url = start_url.trim();
        let region = region.trim().to_lowercase();
        let deadline = now + TimeDelta::seconds(MIN_REMAINING_SECS);

        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| {
                let record = read_record(&path)?;
                if record.access_token.is_empty() || record.expires_at.is_empty() {
                    return None;
                }
                if !start_url.is_empty() && record.start_url != start_url {
                    return None;
                }
                if !region.is_empty() && record.region.to_lowercase() != region {
                    return None;
                }
                let Some(expires_at) = parse_expiry(&record.expires_at) else {
                    debug!(path = %path.display(), expires_at = %record.expires_at, "unsupported token expiry format");
                    return None;
                };
                (expires_at > deadline).then(|| CachedToken {
                    access_token: record.access_token,
                    expires_at,
                    start_url: record.start_url,
                    region: record.region,
                })
            })
            .max_by_key(|token| token.expires_at)
            .ok_or(Error::SsoNotLoggedIn)
    }

    /// Check that a usable token exists for the configured SSO portal.
    pub fn validate(&self, config: &Config, now: DateTime<Utc>) -> Result<()> {
        self.resolve(&config.sso_start_url, &config.sso_region, now)
            .map(|_| ())
    }
}

fn read_record(path: &Path) -> Option<CacheRecord> {
    let data = fs::read(path).ok()?;
    serde_json::from_slice(&data).ok()
}

/// Parse an `expiresAt` value as RFC3339, then each of [`EXPIRY_FORMATS`] as UTC.
pub fn parse_expiry(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    EXPIRY_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}
