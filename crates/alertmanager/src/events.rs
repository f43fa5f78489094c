//! Events are the facts from which all alertmanager state is derived.
//! The set of events is closed: every log entry decodes into exactly one
//! `Event` variant, or decoding fails.
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Meta describes who appended an event, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
}

impl Meta {
    pub const SYSTEM_ACTOR: &'static str = "system";

    /// Meta of an event which was initiated by alertmanager itself.
    pub fn system(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            actor: Self::SYSTEM_ACTOR.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRaised {
    pub id: String,
    pub subject: String,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertAcknowledged {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnnoticedAlertsNotified {
    pub alert_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpMonitorCreated {
    pub id: String,
    pub enabled: bool,
    pub url: String,
    pub find: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpMonitorEnabledUpdated {
    pub id: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpMonitorDeleted {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadMansSwitchCreated {
    pub subject: String,
    pub ttl: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadMansSwitchCheckin {
    pub subject: String,
    pub ttl: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadMansSwitchDeleted {
    pub subject: String,
}

// Defines the closed Event enum over payload types, along with the
// discriminant of each and its decoding dispatch.
macro_rules! event_catalog {
    ($($kind:ident),* $(,)?) => {
        #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
        #[serde(untagged)]
        pub enum Event {
            $($kind($kind),)*
        }

        impl Event {
            /// Discriminant under which this event is serialized.
            pub fn kind(&self) -> &'static str {
                match self {
                    $(Event::$kind(_) => stringify!($kind),)*
                }
            }

            fn decode_data(kind: &str, data: &str) -> Result<Self> {
                match kind {
                    $(stringify!($kind) => serde_json::from_str::<$kind>(data)
                        .map(Event::$kind)
                        .map_err(|source| Error::MalformedEvent {
                            kind: kind.to_string(),
                            source,
                        }),)*
                    _ => Err(Error::UnsupportedEventType(kind.to_string())),
                }
            }
        }

        $(
            impl From<$kind> for Event {
                fn from(event: $kind) -> Self {
                    Event::$kind(event)
                }
            }
        )*
    };
}

event_catalog!(
    AlertRaised,
    AlertAcknowledged,
    UnnoticedAlertsNotified,
    HttpMonitorCreated,
    HttpMonitorEnabledUpdated,
    HttpMonitorDeleted,
    DeadMansSwitchCreated,
    DeadMansSwitchCheckin,
    DeadMansSwitchDeleted,
);

/// Envelope is an Event together with its Meta, as stored in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub meta: Meta,
    pub event: Event,
}

#[derive(Serialize)]
struct WireOut<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    meta: &'a Meta,
    data: &'a Event,
}

#[derive(Deserialize)]
struct WireIn {
    #[serde(rename = "type")]
    kind: String,
    meta: Meta,
    data: Box<serde_json::value::RawValue>,
}

impl Envelope {
    pub fn new(meta: Meta, event: impl Into<Event>) -> Self {
        Self {
            meta,
            event: event.into(),
        }
    }

    /// Encode as a log entry of the form `{"type":..,"meta":..,"data":..}`.
    pub fn encode(&self) -> String {
        serde_json::to_string(&WireOut {
            kind: self.event.kind(),
            meta: &self.meta,
            data: &self.event,
        })
        .expect("event serialization cannot fail")
    }

    /// Decode a log entry, failing on entries of unknown type.
    pub fn decode(entry: &str) -> Result<Self> {
        let WireIn { kind, meta, data } =
            serde_json::from_str(entry).map_err(|source| Error::MalformedEvent {
                kind: "(unknown)".to_string(),
                source,
            })?;

        Ok(Self {
            meta,
            event: Event::decode_data(&kind, data.get())?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wire_shape() {
        let envelope = Envelope::new(
            Meta::system("2019-09-07T12:00:00Z".parse().unwrap()),
            DeadMansSwitchCheckin {
                subject: "backups".to_string(),
                ttl: "2019-09-08T12:00:00Z".parse().unwrap(),
            },
        );

        let encoded = envelope.encode();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&encoded).unwrap(),
            serde_json::json!({
                "type": "DeadMansSwitchCheckin",
                "meta": {"timestamp": "2019-09-07T12:00:00Z", "actor": "system"},
                "data": {"subject": "backups", "ttl": "2019-09-08T12:00:00Z"},
            })
        );
        assert_eq!(Envelope::decode(&encoded).unwrap(), envelope);
    }

    #[test]
    fn test_unknown_and_malformed_entries() {
        let entry = r#"{"type":"AlertSnoozed","meta":{"timestamp":"2019-09-07T12:00:00Z","actor":"joonas"},"data":{"id":"abc"}}"#;
        assert!(matches!(
            Envelope::decode(entry),
            Err(Error::UnsupportedEventType(kind)) if kind == "AlertSnoozed"
        ));

        let entry = r#"{"type":"AlertRaised","meta":{"timestamp":"2019-09-07T12:00:00Z","actor":"joonas"},"data":{"id":"abc"}}"#;
        assert!(matches!(
            Envelope::decode(entry),
            Err(Error::MalformedEvent { kind, .. }) if kind == "AlertRaised"
        ));
    }
}
