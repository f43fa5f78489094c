//! Dead man's switches expect periodic check-ins from the subjects they
//! monitor, and raise an alert when a check-in is late.
use crate::alerts::{alert_acknowledged, Candidate};
use crate::events::{self, Envelope, Meta};
use crate::notify::Notifier;
use crate::{ttl, App, Decision, DeadMansSwitch, Rejection, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use eventlog::EventLog;

/// Build the alert Candidate for a switch which has expired as of `now`.
pub fn expired_switch_candidate(switch: &DeadMansSwitch, now: DateTime<Utc>) -> Candidate {
    let late_by = (now - switch.ttl)
        .to_std()
        .map(|d| std::time::Duration::from_secs(d.as_secs()))
        .unwrap_or_default();

    Candidate {
        subject: switch.subject.clone(),
        details: format!(
            "Check-in late by {} ({})",
            humantime::format_duration(late_by),
            switch.ttl.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        ),
        timestamp: now,
    }
}

impl<L: EventLog, N: Notifier> App<L, N> {
    /// Check in the switch of `subject`, which must next check in before `ttl`.
    ///
    /// The switch is created if it doesn't exist. If an alert is active for
    /// `subject` then it's acknowledged, and true is returned.
    pub async fn checkin(
        &self,
        subject: &str,
        ttl: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let acknowledged = self
            .run_transaction("checkin", |state| {
                let mut batch = Vec::new();

                if state.dead_mans_switch(subject).is_none() {
                    batch.push(Envelope::new(
                        Meta::system(now),
                        events::DeadMansSwitchCreated {
                            subject: subject.to_string(),
                            ttl,
                        },
                    ));
                }
                batch.push(Envelope::new(
                    Meta::system(now),
                    events::DeadMansSwitchCheckin {
                        subject: subject.to_string(),
                        ttl,
                    },
                ));

                let alert = state.find_alert_with_subject(subject);
                if let Some(alert) = alert {
                    batch.push(alert_acknowledged(&alert.id, now));
                }
                Ok(Decision::new(batch, alert.is_some()))
            })
            .await?;

        tracing::info!(%subject, %ttl, %acknowledged, "dead man's switch checked in");
        Ok(acknowledged)
    }

    /// Check in the switch of `subject` with a deadline expression, as
    /// understood by `ttl::parse`.
    pub async fn checkin_spec(
        &self,
        subject: &str,
        ttl_spec: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if subject.is_empty() || ttl_spec.is_empty() {
            return Err(crate::Error::InvalidInput(
                "subject or ttl empty".to_string(),
            ));
        }
        let ttl = ttl::parse(ttl_spec, now)?;
        self.checkin(subject, ttl, now).await
    }

    /// Delete the switch of `subject`.
    pub async fn delete_switch(&self, subject: &str, now: DateTime<Utc>) -> Result<()> {
        self.run_transaction("delete_switch", |state| {
            if state.dead_mans_switch(subject).is_none() {
                return Err(Rejection::SwitchNotFound(subject.to_string()));
            }
            Ok(Decision::new(
                vec![Envelope::new(
                    Meta::system(now),
                    events::DeadMansSwitchDeleted {
                        subject: subject.to_string(),
                    },
                )],
                (),
            ))
        })
        .await
    }

    /// Switches which have expired as of `now`.
    pub fn expired_dead_mans_switches(&self, now: DateTime<Utc>) -> Vec<DeadMansSwitch> {
        self.store
            .read(|state, _| state.expired_dead_mans_switches(now))
    }

    /// Ingest an alert for every switch which has expired as of `now`.
    /// Switches which already have an active alert are de-duplicated by ingestion.
    pub async fn alert_for_expired_switches(&self, now: DateTime<Utc>) -> Result<bool> {
        self.sync().await?;

        let candidates: Vec<Candidate> = self
            .expired_dead_mans_switches(now)
            .iter()
            .map(|switch| expired_switch_candidate(switch, now))
            .collect();

        if candidates.is_empty() {
            return Ok(false);
        }
        tracing::debug!(expired = candidates.len(), "found expired dead man's switches");

        self.ingest(candidates).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{event_kinds, test_app, ts};
    use crate::Error;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_first_checkin_creates_switch() {
        let (app, log, _) = test_app();
        let now = ts("2019-09-07T12:00:00Z");

        let acked = app.checkin_spec("backups", "+24h", now).await.unwrap();
        assert!(!acked);
        assert_eq!(
            event_kinds(&log),
            vec!["DeadMansSwitchCreated", "DeadMansSwitchCheckin"]
        );
        assert_eq!(
            app.dead_mans_switches(),
            vec![DeadMansSwitch {
                subject: "backups".to_string(),
                ttl: ts("2019-09-08T12:00:00Z"),
            }]
        );

        // Subsequent check-ins only move the deadline.
        let acked = app.checkin_spec("backups", "+1d@18:00", now).await.unwrap();
        assert!(!acked);
        assert_eq!(
            event_kinds(&log),
            vec![
                "DeadMansSwitchCreated",
                "DeadMansSwitchCheckin",
                "DeadMansSwitchCheckin"
            ]
        );
        assert_eq!(app.dead_mans_switches()[0].ttl, ts("2019-09-08T18:00:00Z"));
    }

    #[tokio::test]
    async fn test_checkin_acknowledges_alert() {
        let (app, log, _) = test_app();
        let now = ts("2019-09-07T12:00:00Z");

        app.raise("backups", "backups are late", now).await.unwrap();

        let acked = app.checkin_spec("backups", "+24h", now).await.unwrap();
        assert!(acked);
        assert_eq!(
            event_kinds(&log),
            vec![
                "AlertRaised",
                "DeadMansSwitchCreated",
                "DeadMansSwitchCheckin",
                "AlertAcknowledged",
            ]
        );
        assert!(app.active_alerts().is_empty());
    }

    #[tokio::test]
    async fn test_expired_switches_raise_one_alert() {
        let (app, _, notifier) = test_app();
        let t0 = ts("2019-09-07T12:00:00Z");

        app.checkin_spec("backups", "+1h", t0).await.unwrap();
        app.checkin_spec("reports", "+2h", t0).await.unwrap();

        // Not yet expired.
        assert!(!app
            .alert_for_expired_switches(ts("2019-09-07T12:59:59Z"))
            .await
            .unwrap());

        // Expired exactly at its deadline.
        let now = ts("2019-09-07T13:00:00Z");
        assert!(app.alert_for_expired_switches(now).await.unwrap());

        let alerts = app.active_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].subject, "backups");
        assert_eq!(
            alerts[0].details,
            "Check-in late by 0s (2019-09-07T13:00:00Z)"
        );

        // Remaining expired doesn't raise further alerts while one is active.
        let later = ts("2019-09-07T13:30:00Z");
        assert!(!app.alert_for_expired_switches(later).await.unwrap());
        assert_eq!(app.expired_dead_mans_switches(later).len(), 1);
        assert_eq!(notifier.subjects(), vec!["backups".to_string()]);

        // A fresh check-in acknowledges the alert and re-arms the switch.
        assert!(app.checkin_spec("backups", "+1h", later).await.unwrap());
        assert!(app.expired_dead_mans_switches(later).is_empty());
    }

    #[test]
    fn test_late_by_rendering() {
        let switch = DeadMansSwitch {
            subject: "backups".to_string(),
            ttl: ts("2019-09-07T12:00:00Z"),
        };
        let candidate = expired_switch_candidate(&switch, ts("2019-09-07T13:30:05.25Z"));
        assert_eq!(
            candidate.details,
            "Check-in late by 1h 30m 5s (2019-09-07T12:00:00Z)"
        );
        assert_eq!(candidate.timestamp, ts("2019-09-07T13:30:05.25Z"));
    }

    #[tokio::test]
    async fn test_delete_and_validation() {
        let (app, _, _) = test_app();
        let now = ts("2019-09-07T12:00:00Z");

        let err = app.delete_switch("backups", now).await.unwrap_err();
        assert!(err.rejection().unwrap().is_not_found());

        app.checkin_spec("backups", "+24h", now).await.unwrap();
        app.delete_switch("backups", now).await.unwrap();
        assert!(app.dead_mans_switches().is_empty());

        let err = app.checkin_spec("backups", "tomorrow", now).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "not in RFC3339: tomorrow");

        let err = app.checkin_spec("", "+24h", now).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
