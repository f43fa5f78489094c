use crate::notify::{Message, Notifier};
use crate::{App, Config};
use chrono::{DateTime, Utc};
use eventlog::{Cursor, MemoryLog};
use std::sync::{Arc, Mutex};

pub fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

pub fn cursor(offset: usize) -> Cursor {
    serde_json::from_value(serde_json::json!(offset)).unwrap()
}

/// RecordingNotifier keeps every published Message, and fails to publish
/// when `fail` is set.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    pub published: Arc<Mutex<Vec<Message>>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn subjects(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|message| message.subject.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    async fn publish<'s>(&'s self, message: Message) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("notification channel is unavailable");
        }
        self.published.lock().unwrap().push(message);
        Ok(())
    }
}

pub type TestApp = App<Arc<MemoryLog>, RecordingNotifier>;

pub fn test_app() -> (TestApp, Arc<MemoryLog>, RecordingNotifier) {
    let log = Arc::new(MemoryLog::new());
    let notifier = RecordingNotifier::default();
    let config = Config {
        max_active_alerts: 5,
        api_endpoint: "https://alerts.example.com".to_string(),
    };
    let app = App::new(log.clone(), notifier.clone(), config);

    (app, log, notifier)
}

/// Discriminants of all events in `log`, in order.
pub fn event_kinds(log: &MemoryLog) -> Vec<&'static str> {
    log.entries()
        .iter()
        .map(|entry| crate::events::Envelope::decode(entry).unwrap().event.kind())
        .collect()
}
