//! Scanner of HTTP monitors, which fetches each monitor's URL and checks
//! that the response body contains the monitor's expected text.
use crate::alerts::Candidate;
use crate::notify::Notifier;
use crate::{App, HttpMonitor, Result};
use anyhow::Context;
use chrono::{DateTime, Utc};
use eventlog::EventLog;
use futures::StreamExt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Number of monitors which are scanned concurrently.
    pub workers: usize,
    /// Timeout of the first attempt to scan a monitor.
    pub timeout: Duration,
    /// Timeout of the retry of a monitor whose first attempt timed out.
    pub retry_timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            timeout: Duration::from_secs(15),
            retry_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ScanError {
    #[error("fetching {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("string-to-find `{find}` NOT in body: {body}")]
    NotFound { find: String, body: String },
    #[error("timed out after {}", format_timeout(.0))]
    TimedOut(Duration),
    #[error("scan was cancelled")]
    Cancelled,
}

fn format_timeout(timeout: &Duration) -> String {
    humantime::format_duration(*timeout).to_string()
}

/// Probe fetches `url` and checks that its body contains `find`.
pub trait Probe: Send + Sync {
    fn probe<'s>(
        &'s self,
        url: &'s str,
        find: &'s str,
    ) -> impl Future<Output = std::result::Result<(), ScanError>> + Send + 's;
}

/// HttpProbe is a Probe which issues HTTP GET requests. Redirects are not
/// followed, and responses of any status are inspected.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    http_client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("building HTTP client")?;

        Ok(Self { http_client })
    }

    async fn fetch(&self, url: &str) -> anyhow::Result<String> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .context("sending request")?;

        response.text().await.context("reading response body")
    }
}

impl Probe for HttpProbe {
    async fn probe<'s>(&'s self, url: &'s str, find: &'s str) -> std::result::Result<(), ScanError> {
        let body = self.fetch(url).await.map_err(|err| ScanError::Fetch {
            url: url.to_string(),
            reason: format!("{err:#}"),
        })?;

        must_find_in_body(&body, find)
    }
}

pub fn must_find_in_body(body: &str, find: &str) -> std::result::Result<(), ScanError> {
    if body.contains(find) {
        Ok(())
    } else {
        Err(ScanError::NotFound {
            find: find.to_string(),
            body: body.to_string(),
        })
    }
}

/// Failure of a scanned monitor.
#[derive(Debug, Clone)]
pub struct Failure {
    pub monitor: HttpMonitor,
    pub error: ScanError,
}

impl Failure {
    /// Candidate alert for this Failure, of a scan which started at `started_at`.
    pub fn into_candidate(self, started_at: DateTime<Utc>) -> Candidate {
        Candidate {
            subject: self.monitor.url,
            details: self.error.to_string(),
            timestamp: started_at,
        }
    }
}

/// Scan `monitors` using `probe`, with at most `config.workers` scans in flight.
/// Returns once every monitor has been scanned, with the Failures of those
/// which didn't pass. Monitors whose scan was cancelled are not Failures.
#[tracing::instrument(skip_all, fields(monitors = monitors.len()))]
pub async fn scan_monitors<P: Probe>(
    monitors: Vec<HttpMonitor>,
    probe: &P,
    config: &ScanConfig,
    cancel: &CancellationToken,
) -> Vec<Failure> {
    let scans = monitors.into_iter().map(|monitor| async move {
        match scan_monitor(&monitor, probe, config, cancel).await {
            Ok(()) => {
                tracing::debug!(id = %monitor.id, url = %monitor.url, "monitor passed");
                None
            }
            Err(ScanError::Cancelled) => {
                tracing::debug!(id = %monitor.id, url = %monitor.url, "monitor scan cancelled");
                None
            }
            Err(error) => {
                tracing::warn!(id = %monitor.id, url = %monitor.url, %error, "monitor failed");
                Some(Failure { monitor, error })
            }
        }
    });

    futures::stream::iter(scans)
        .buffer_unordered(config.workers.max(1))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .flatten()
        .collect()
}

// Scan a monitor, retrying once with a longer timeout if the first attempt
// timed out. Other errors aren't retried.
async fn scan_monitor<P: Probe>(
    monitor: &HttpMonitor,
    probe: &P,
    config: &ScanConfig,
    cancel: &CancellationToken,
) -> std::result::Result<(), ScanError> {
    match scan_attempt(monitor, probe, config.timeout, cancel).await {
        Err(ScanError::TimedOut(timeout)) => {
            tracing::debug!(
                url = %monitor.url,
                timeout = ?timeout,
                retry_timeout = ?config.retry_timeout,
                "monitor scan timed out, retrying with a longer timeout"
            );
            scan_attempt(monitor, probe, config.retry_timeout, cancel).await
        }
        result => result,
    }
}

async fn scan_attempt<P: Probe>(
    monitor: &HttpMonitor,
    probe: &P,
    timeout: Duration,
    cancel: &CancellationToken,
) -> std::result::Result<(), ScanError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ScanError::Cancelled),
        result = tokio::time::timeout(timeout, probe.probe(&monitor.url, &monitor.find)) => {
            result.unwrap_or(Err(ScanError::TimedOut(timeout)))
        }
    }
}

impl<L: EventLog, N: Notifier> App<L, N> {
    /// Scan all enabled HTTP monitors, and ingest an alert for each failure.
    /// `now` is the time at which the scan starts.
    /// Returns true if any alert was raised.
    pub async fn scan_monitors_and_ingest_failures<P: Probe>(
        &self,
        probe: &P,
        config: &ScanConfig,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.sync().await?;

        let monitors: Vec<HttpMonitor> = self
            .http_monitors()
            .into_iter()
            .filter(|monitor| monitor.enabled)
            .collect();

        let failures = scan_monitors(monitors, probe, config, cancel).await;

        if cancel.is_cancelled() {
            tracing::warn!(
                failures = failures.len(),
                "monitor scan was cancelled, not ingesting its failures"
            );
            return Ok(false);
        }
        if failures.is_empty() {
            return Ok(false);
        }

        let candidates = failures
            .into_iter()
            .map(|failure| failure.into_candidate(now))
            .collect();

        self.ingest(candidates).await
    }
}
