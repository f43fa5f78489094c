//! Ingestion, raising and acknowledgement of alerts.
use crate::events::{self, Envelope, Meta};
use crate::notify::{Message, Notifier};
use crate::{new_id, Alert, App, Decision, Rejection, Result, State};
use chrono::{DateTime, Utc};
use eventlog::EventLog;

/// Candidate is an alert which has been reported, but not yet admitted.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct Candidate {
    pub subject: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

/// Select the `candidates` which may be raised given `state`, in order.
///
/// Candidates are evaluated as though each admitted one were already active:
/// a candidate is dropped if `max_active_alerts` are active, or if an active
/// alert already has its subject.
pub fn deduplicate_and_ratelimit<'c>(
    candidates: &'c [Candidate],
    state: &State,
    max_active_alerts: usize,
) -> Vec<&'c Candidate> {
    let mut admitted: Vec<&Candidate> = Vec::new();

    for candidate in candidates {
        if state.active_alerts.len() + admitted.len() >= max_active_alerts {
            tracing::debug!(subject = %candidate.subject, "dropping alert (too many active alerts)");
            continue;
        }
        if state.find_alert_with_subject(&candidate.subject).is_some()
            || admitted.iter().any(|a| a.subject == candidate.subject)
        {
            tracing::debug!(subject = %candidate.subject, "dropping alert (duplicate subject)");
            continue;
        }
        admitted.push(candidate);
    }
    admitted
}

impl<L: EventLog, N: Notifier> App<L, N> {
    /// Ingest `candidates`, raising those which pass de-duplication and rate
    /// limiting, and then publishing each raised alert.
    /// Returns true if any alert was raised.
    pub async fn ingest(&self, candidates: Vec<Candidate>) -> Result<bool> {
        let max_active_alerts = self.config.max_active_alerts;

        let raised = self
            .run_transaction("ingest", |state| {
                let mut events = Vec::new();
                let mut raised = Vec::new();

                for candidate in deduplicate_and_ratelimit(&candidates, state, max_active_alerts) {
                    let alert = Alert {
                        id: new_id(),
                        subject: candidate.subject.clone(),
                        details: candidate.details.clone(),
                        raised_at: candidate.timestamp,
                    };
                    events.push(alert_raised(&alert));
                    raised.push(alert);
                }
                Ok(Decision::new(events, raised))
            })
            .await?;

        for alert in &raised {
            tracing::info!(id = %alert.id, subject = %alert.subject, "raised alert");

            let message = Message::for_alert(alert, &self.config.api_endpoint);
            if let Err(err) = self.notifier.publish(message).await {
                tracing::error!(id = %alert.id, error = ?err, "failed to publish alert");
            }
        }

        Ok(!raised.is_empty())
    }

    /// Raise an alert directly, bypassing rate limiting and notification.
    pub async fn raise(
        &self,
        subject: &str,
        details: &str,
        now: DateTime<Utc>,
    ) -> Result<Alert> {
        let alert = Alert {
            id: new_id(),
            subject: subject.to_string(),
            details: details.to_string(),
            raised_at: now,
        };

        self.run_transaction("raise", |state| {
            if state.find_alert_with_subject(subject).is_some() {
                return Err(Rejection::AlertAlreadyActive(subject.to_string()));
            }
            Ok(Decision::new(vec![alert_raised(&alert)], ()))
        })
        .await?;

        Ok(alert)
    }

    /// Acknowledge the active alert `id`.
    pub async fn acknowledge(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        self.run_transaction("acknowledge", |state| {
            if state.alert(id).is_none() {
                return Err(Rejection::AlertNotFound(id.to_string()));
            }
            Ok(Decision::new(vec![alert_acknowledged(id, now)], ()))
        })
        .await?;

        tracing::info!(%id, "acknowledged alert");
        Ok(())
    }
}

fn alert_raised(alert: &Alert) -> Envelope {
    Envelope::new(
        Meta::system(alert.raised_at),
        events::AlertRaised {
            id: alert.id.clone(),
            subject: alert.subject.clone(),
            details: alert.details.clone(),
        },
    )
}

pub(crate) fn alert_acknowledged(id: &str, now: DateTime<Utc>) -> Envelope {
    Envelope::new(
        Meta::system(now),
        events::AlertAcknowledged { id: id.to_string() },
    )
}
