use crate::events::{self, Envelope, Meta};
use crate::notify::{ack_link, Message, Notifier};
use crate::{App, Decision, Result};
use chrono::{DateTime, Duration, Utc};
use eventlog::EventLog;

/// Subject of the reminder about unnoticed alerts.
pub const UNNOTICED_SUBJECT: &str = "Un-acked alerts";

fn reminder_interval() -> Duration {
    Duration::hours(1)
}

impl<L: EventLog, N: Notifier> App<L, N> {
    /// Remind about alerts which have gone unnoticed, if any exist and no
    /// reminder has been sent within the past hour.
    ///
    /// The reminder is published directly rather than ingested, so it's
    /// neither de-duplicated nor rate limited. Returns true if it was sent.
    pub async fn notify_unnoticed_alerts_if_due(&self, now: DateTime<Utc>) -> Result<bool> {
        let unnoticed = self
            .run_transaction("notify_unnoticed_alerts", |state| {
                let unnoticed = state.unnoticed_alerts(now);

                if unnoticed.is_empty()
                    || now - state.last_unnoticed_alerts_notified_at < reminder_interval()
                {
                    return Ok(Decision::unchanged(Vec::new()));
                }
                let notified = Envelope::new(
                    Meta::system(now),
                    events::UnnoticedAlertsNotified {
                        alert_ids: unnoticed.iter().map(|alert| alert.id.clone()).collect(),
                    },
                );
                Ok(Decision::new(vec![notified], unnoticed))
            })
            .await?;

        if unnoticed.is_empty() {
            return Ok(false);
        }

        let lines: Vec<String> = unnoticed
            .iter()
            .map(|alert| {
                format!(
                    "{} {}",
                    alert.subject,
                    ack_link(&self.config.api_endpoint, &alert.id)
                )
            })
            .collect();
        let details = format!(
            "There are {} un-acked alert(s):\n\n{}\n\nGo take care of them!",
            lines.len(),
            lines.join("\n")
        );
        tracing::info!(count = lines.len(), "reminding of unnoticed alerts");

        let message = Message::new(UNNOTICED_SUBJECT, &details, None);
        if let Err(err) = self.notifier.publish(message).await {
            tracing::error!(error = ?err, "failed to publish unnoticed alerts reminder");
        }
        Ok(true)
    }
}
