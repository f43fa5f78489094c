use crate::events::{Envelope, Event};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use eventlog::{Cursor, Snapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Alerts which remain un-acknowledged for this long are "unnoticed".
pub fn unnoticed_after() -> Duration {
    Duration::hours(4)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    // Serialized as `alert_key` for compatibility with existing snapshots.
    #[serde(rename = "alert_key")]
    pub id: String,
    pub subject: String,
    pub details: String,
    #[serde(rename = "timestamp")]
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpMonitor {
    pub id: String,
    #[serde(rename = "created")]
    pub created_at: DateTime<Utc>,
    pub enabled: bool,
    pub url: String,
    pub find: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadMansSwitch {
    pub subject: String,
    pub ttl: DateTime<Utc>,
}

impl DeadMansSwitch {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.ttl
    }
}

/// State is the fold of all events of the log.
/// Its serialization is the snapshot format, and must remain stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    #[serde(rename = "last_unnoticed_alerts_notified", default)]
    pub last_unnoticed_alerts_notified_at: DateTime<Utc>,
    /// Active alerts, keyed on alert id.
    #[serde(default)]
    pub active_alerts: BTreeMap<String, Alert>,
    /// HTTP monitors, keyed on monitor id.
    #[serde(default)]
    pub http_monitors: BTreeMap<String, HttpMonitor>,
    /// Dead man's switches, keyed on subject.
    #[serde(default)]
    pub dead_mans_switches: BTreeMap<String, DeadMansSwitch>,
}

impl State {
    /// Apply the event of `envelope` to this State.
    ///
    /// Application never fails: whether an event is permitted is decided
    /// before it's appended, and an event referencing an entity which no
    /// longer exists is a no-op.
    pub fn apply(&mut self, envelope: &Envelope) {
        let Envelope { meta, event } = envelope;

        match event {
            Event::AlertRaised(e) => {
                self.active_alerts.insert(
                    e.id.clone(),
                    Alert {
                        id: e.id.clone(),
                        subject: e.subject.clone(),
                        details: e.details.clone(),
                        raised_at: meta.timestamp,
                    },
                );
            }
            Event::AlertAcknowledged(e) => {
                self.active_alerts.remove(&e.id);
            }
            Event::UnnoticedAlertsNotified(_) => {
                self.last_unnoticed_alerts_notified_at = meta.timestamp;
            }
            Event::HttpMonitorCreated(e) => {
                self.http_monitors.insert(
                    e.id.clone(),
                    HttpMonitor {
                        id: e.id.clone(),
                        created_at: meta.timestamp,
                        enabled: e.enabled,
                        url: e.url.clone(),
                        find: e.find.clone(),
                    },
                );
            }
            Event::HttpMonitorEnabledUpdated(e) => {
                if let Some(monitor) = self.http_monitors.get_mut(&e.id) {
                    monitor.enabled = e.enabled;
                }
            }
            Event::HttpMonitorDeleted(e) => {
                self.http_monitors.remove(&e.id);
            }
            Event::DeadMansSwitchCreated(e) => {
                self.dead_mans_switches.insert(
                    e.subject.clone(),
                    DeadMansSwitch {
                        subject: e.subject.clone(),
                        ttl: e.ttl,
                    },
                );
            }
            Event::DeadMansSwitchCheckin(e) => {
                if let Some(switch) = self.dead_mans_switches.get_mut(&e.subject) {
                    switch.ttl = e.ttl;
                }
            }
            Event::DeadMansSwitchDeleted(e) => {
                self.dead_mans_switches.remove(&e.subject);
            }
        }
    }

    /// Active alerts ordered on raise time, and then on id.
    pub fn active_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<_> = self.active_alerts.values().cloned().collect();
        alerts.sort_by(|a, b| (a.raised_at, &a.id).cmp(&(b.raised_at, &b.id)));
        alerts
    }

    pub fn alert(&self, id: &str) -> Option<&Alert> {
        self.active_alerts.get(id)
    }

    pub fn find_alert_with_subject(&self, subject: &str) -> Option<&Alert> {
        self.active_alerts
            .values()
            .find(|alert| alert.subject == subject)
    }

    /// Active alerts which were raised at least `unnoticed_after()` ago.
    pub fn unnoticed_alerts(&self, now: DateTime<Utc>) -> Vec<Alert> {
        let threshold = unnoticed_after();

        self.active_alerts()
            .into_iter()
            .filter(|alert| now - alert.raised_at >= threshold)
            .collect()
    }

    /// HTTP monitors ordered on creation time, and then on id.
    pub fn http_monitors(&self) -> Vec<HttpMonitor> {
        let mut monitors: Vec<_> = self.http_monitors.values().cloned().collect();
        monitors.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        monitors
    }

    pub fn http_monitor(&self, id: &str) -> Option<&HttpMonitor> {
        self.http_monitors.get(id)
    }

    /// Dead man's switches ordered on subject.
    pub fn dead_mans_switches(&self) -> Vec<DeadMansSwitch> {
        // BTreeMap iteration is already ordered on subject.
        self.dead_mans_switches.values().cloned().collect()
    }

    pub fn dead_mans_switch(&self, subject: &str) -> Option<&DeadMansSwitch> {
        self.dead_mans_switches.get(subject)
    }

    pub fn expired_dead_mans_switches(&self, now: DateTime<Utc>) -> Vec<DeadMansSwitch> {
        self.dead_mans_switches
            .values()
            .filter(|switch| switch.is_expired(now))
            .cloned()
            .collect()
    }
}

/// Store holds a State together with the log Cursor through which it's folded.
/// Reads and applications of events are mutually exclusive, so a reader never
/// observes a partially applied batch.
#[derive(Debug, Default)]
pub struct Store {
    inner: std::sync::Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cursor: Cursor,
    state: State,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> Cursor {
        self.inner.lock().unwrap().cursor
    }

    /// Invoke `f` with the current State and its Cursor.
    pub fn read<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&State, Cursor) -> T,
    {
        let inner = self.inner.lock().unwrap();
        f(&inner.state, inner.cursor)
    }

    /// Apply `envelopes`, which were read from the log after `from` and
    /// through `head`. The Store must currently be at cursor `from`.
    pub fn apply(&self, from: Cursor, envelopes: &[Envelope], head: Cursor) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();

        if inner.cursor != from {
            return Err(Error::CursorMismatch {
                read: from,
                store: inner.cursor,
            });
        }
        for envelope in envelopes {
            tracing::trace!(kind = envelope.event.kind(), "applying event");
            inner.state.apply(envelope);
        }
        inner.cursor = head;

        Ok(())
    }

    /// Serialize the current State and Cursor as a Snapshot.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let inner = self.inner.lock().unwrap();
        let data = serde_json::to_vec_pretty(&inner.state).map_err(Error::Snapshot)?;

        Ok(Snapshot {
            cursor: inner.cursor,
            data,
        })
    }

    /// Replace the current State and Cursor with those of `snapshot`.
    /// If the snapshot cannot be decoded, the Store is left unchanged.
    pub fn install_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let state: State = serde_json::from_slice(&snapshot.data).map_err(Error::Snapshot)?;

        let mut inner = self.inner.lock().unwrap();
        inner.state = state;
        inner.cursor = snapshot.cursor;

        Ok(())
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.read(|state, _| state.active_alerts())
    }

    pub fn http_monitors(&self) -> Vec<HttpMonitor> {
        self.read(|state, _| state.http_monitors())
    }

    pub fn dead_mans_switches(&self) -> Vec<DeadMansSwitch> {
        self.read(|state, _| state.dead_mans_switches())
    }

    pub fn last_unnoticed_alerts_notified_at(&self) -> DateTime<Utc> {
        self.read(|state, _| state.last_unnoticed_alerts_notified_at)
    }
}
