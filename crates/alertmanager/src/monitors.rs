use crate::events::{self, Envelope, Meta};
use crate::notify::Notifier;
use crate::{new_id, App, Decision, Error, HttpMonitor, Rejection, Result};
use chrono::{DateTime, Utc};
use eventlog::EventLog;

impl<L: EventLog, N: Notifier> App<L, N> {
    /// Create an enabled HTTP monitor which expects `find` in the body of `url`.
    pub async fn create_monitor(
        &self,
        url: &str,
        find: &str,
        now: DateTime<Utc>,
    ) -> Result<HttpMonitor> {
        let parsed = url::Url::parse(url)
            .map_err(|err| Error::InvalidInput(format!("invalid monitor URL {url:?}: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidInput(format!(
                "monitor URL {url:?} must be http or https"
            )));
        }

        let monitor = HttpMonitor {
            id: new_id(),
            created_at: now,
            enabled: true,
            url: url.to_string(),
            find: find.to_string(),
        };
        let created = Envelope::new(
            Meta::system(now),
            events::HttpMonitorCreated {
                id: monitor.id.clone(),
                enabled: monitor.enabled,
                url: monitor.url.clone(),
                find: monitor.find.clone(),
            },
        );

        self.run_transaction("create_monitor", |_| {
            Ok(Decision::new(vec![created.clone()], ()))
        })
        .await?;

        tracing::info!(id = %monitor.id, url = %monitor.url, "created HTTP monitor");
        Ok(monitor)
    }

    pub async fn delete_monitor(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        self.run_transaction("delete_monitor", |state| {
            if state.http_monitor(id).is_none() {
                return Err(Rejection::MonitorNotFound(id.to_string()));
            }
            Ok(Decision::new(
                vec![Envelope::new(
                    Meta::system(now),
                    events::HttpMonitorDeleted { id: id.to_string() },
                )],
                (),
            ))
        })
        .await
    }

    /// Enable or disable monitor `id`. It's an error if the monitor is
    /// already in the requested state.
    pub async fn set_monitor_enabled(
        &self,
        id: &str,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.run_transaction("set_monitor_enabled", |state| {
            let Some(monitor) = state.http_monitor(id) else {
                return Err(Rejection::MonitorNotFound(id.to_string()));
            };
            if monitor.enabled == enabled {
                return Err(Rejection::MonitorUnchanged(id.to_string()));
            }
            Ok(Decision::new(
                vec![Envelope::new(
                    Meta::system(now),
                    events::HttpMonitorEnabledUpdated {
                        id: id.to_string(),
                        enabled,
                    },
                )],
                (),
            ))
        })
        .await
    }
}
