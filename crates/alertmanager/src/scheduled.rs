use crate::notify::Notifier;
use crate::scanner::{Probe, ScanConfig};
use crate::{App, Error, Result};
use chrono::{DateTime, Utc};
use eventlog::EventLog;
use tokio_util::sync::CancellationToken;

/// Outcome of a scheduled pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled {
    pub reminded_of_unnoticed: bool,
    pub alerted_for_expired_switches: bool,
    pub alerted_for_monitors: bool,
}

impl<L: EventLog, N: Notifier> App<L, N> {
    /// Run a scheduled pass, which is expected to happen about every minute:
    /// remind of unnoticed alerts, alert for expired dead man's switches,
    /// and then scan HTTP monitors. The pass stops at the first error.
    ///
    /// If `cancel` is cancelled then the pass is abandoned wherever it is,
    /// including within calls of the event log, and `Error::Cancelled`
    /// is returned. Appends which were already issued may still land.
    #[tracing::instrument(skip_all, fields(now = %now))]
    pub async fn run_scheduled<P: Probe>(
        &self,
        now: DateTime<Utc>,
        probe: &P,
        scan_config: &ScanConfig,
        cancel: &CancellationToken,
    ) -> Result<Scheduled> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!("scheduled pass was cancelled");
                Err(Error::Cancelled)
            }
            outcome = self.scheduled_pass(now, probe, scan_config, cancel) => outcome,
        }
    }

    async fn scheduled_pass<P: Probe>(
        &self,
        now: DateTime<Utc>,
        probe: &P,
        scan_config: &ScanConfig,
        cancel: &CancellationToken,
    ) -> Result<Scheduled> {
        let reminded_of_unnoticed = self.notify_unnoticed_alerts_if_due(now).await?;
        let alerted_for_expired_switches = self.alert_for_expired_switches(now).await?;
        let alerted_for_monitors = self
            .scan_monitors_and_ingest_failures(probe, scan_config, cancel, now)
            .await?;

        let outcome = Scheduled {
            reminded_of_unnoticed,
            alerted_for_expired_switches,
            alerted_for_monitors,
        };
        tracing::debug!(?outcome, "finished scheduled pass");

        Ok(outcome)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::scanner::ScanError;
    use crate::testing::{test_app, ts, RecordingNotifier};
    use crate::Config;
    use chrono::Duration;
    use eventlog::{Cursor, Read, Snapshot};
    use pretty_assertions::assert_eq;

    struct FailingProbe;

    impl Probe for FailingProbe {
        async fn probe<'s>(
            &'s self,
            url: &'s str,
            _find: &'s str,
        ) -> std::result::Result<(), ScanError> {
            Err(ScanError::Fetch {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }

    /// StalledLog never completes a read.
    struct StalledLog;

    impl EventLog for StalledLog {
        async fn read<'s>(&'s self, _after: Cursor) -> eventlog::Result<Read> {
            std::future::pending().await
        }

        async fn append_after<'s>(
            &'s self,
            _cursor: Cursor,
            _entries: Vec<String>,
        ) -> eventlog::Result<Cursor> {
            std::future::pending().await
        }

        async fn load_snapshot<'s>(&'s self) -> eventlog::Result<Option<Snapshot>> {
            Ok(None)
        }

        async fn save_snapshot<'s>(&'s self, _snapshot: Snapshot) -> eventlog::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_scheduled_pass() {
        let (app, _, notifier) = test_app();
        let cancel = CancellationToken::new();
        let config = ScanConfig::default();
        let t0 = ts("2019-09-07T12:00:00Z");

        app.checkin_spec("backups", "+1h", t0).await.unwrap();
        app.create_monitor("https://example.com/", "Welcome", t0)
            .await
            .unwrap();

        let outcome = app
            .run_scheduled(t0, &FailingProbe, &config, &cancel)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Scheduled {
                alerted_for_monitors: true,
                ..Default::default()
            }
        );

        let outcome = app
            .run_scheduled(t0 + Duration::hours(1), &FailingProbe, &config, &cancel)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Scheduled {
                alerted_for_expired_switches: true,
                ..Default::default()
            }
        );

        // The monitor's alert goes unnoticed four hours after it was raised.
        let outcome = app
            .run_scheduled(t0 + Duration::hours(4), &FailingProbe, &config, &cancel)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Scheduled {
                reminded_of_unnoticed: true,
                ..Default::default()
            }
        );
        assert_eq!(
            notifier.subjects(),
            vec![
                "https://example.com/".to_string(),
                "backups".to_string(),
                "Un-acked alerts".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_pass_does_nothing() {
        let (app, log, notifier) = test_app();
        let t0 = ts("2019-09-07T12:00:00Z");

        app.checkin_spec("backups", "+1h", t0).await.unwrap();
        let appended = log.entries().len();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = app
            .run_scheduled(
                t0 + Duration::hours(2),
                &FailingProbe,
                &ScanConfig::default(),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled), "{err:?}");

        assert_eq!(log.entries().len(), appended);
        assert!(notifier.subjects().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_reaches_stalled_log_calls() {
        let app = App::new(StalledLog, RecordingNotifier::default(), Config::default());
        let cancel = CancellationToken::new();

        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                cancel.cancel();
            }
        });

        let err = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            app.run_scheduled(
                ts("2019-09-07T12:00:00Z"),
                &FailingProbe,
                &ScanConfig::default(),
                &cancel,
            ),
        )
        .await
        .expect("cancellation should end the pass")
        .unwrap_err();

        assert!(matches!(err, Error::Cancelled), "{err:?}");
    }
}
