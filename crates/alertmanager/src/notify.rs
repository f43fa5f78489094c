use crate::state::Alert;
use anyhow::Context;

/// Maximum length of a full message body, as delivered over e-mail and the like.
pub const BODY_MAX_CHARS: usize = 4 * 1024;
/// Maximum length of a short message body. SMS allows 160 characters, and
/// delivery prefixes messages with "ALERT >".
pub const SHORT_BODY_MAX_CHARS: usize = 160 - 7;

/// Message is a rendered notification.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Message {
    pub subject: String,
    /// Full body of the message.
    #[serde(rename = "default")]
    pub body: String,
    /// Body for channels which allow only short texts.
    #[serde(rename = "sms")]
    pub short_body: String,
}

impl Message {
    /// Render a Message with `subject` and `details`. If `ack_link` is given,
    /// the full body leads with it.
    pub fn new(subject: &str, details: &str, ack_link: Option<&str>) -> Self {
        let text = format!("{subject}\n\n{details}");

        let body = match ack_link {
            Some(link) => format!("Ack: {link}\n\n{}", truncate(&text, BODY_MAX_CHARS)),
            None => truncate(&text, BODY_MAX_CHARS),
        };

        Self {
            subject: subject.to_string(),
            body,
            short_body: truncate(&text, SHORT_BODY_MAX_CHARS),
        }
    }

    /// Render the Message announcing `alert`.
    pub fn for_alert(alert: &Alert, api_endpoint: &str) -> Self {
        let link = (!alert.id.is_empty()).then(|| ack_link(api_endpoint, &alert.id));
        Self::new(&alert.subject, &alert.details, link.as_deref())
    }
}

/// Link which acknowledges alert `id` when visited.
pub fn ack_link(api_endpoint: &str, id: &str) -> String {
    format!("{api_endpoint}/alerts/acknowledge?id={id}")
}

/// Truncate `text` to at most `max` characters. Truncated text ends with an
/// ellipsis, which counts towards `max`.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Notifier is the channel over which alerts are pushed to their subscribers.
/// Publication is best-effort: callers log failures, and don't retry them.
pub trait Notifier: std::fmt::Debug + Send + Sync + 'static {
    fn publish<'s>(
        &'s self,
        message: Message,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send + 's;
}

/// Posts messages as JSON documents to a webhook.
#[derive(Debug)]
pub struct WebhookSender {
    url: url::Url,
    http_client: reqwest::Client,
}

impl WebhookSender {
    async fn send(&self, message: Message) -> anyhow::Result<()> {
        let response = self
            .http_client
            .post(self.url.clone())
            .json(&message)
            .send()
            .await
            .context("calling notification webhook")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("notification webhook responded with {status}: {body}");
        }
        tracing::debug!(subject = %message.subject, %status, "published alert notification");

        Ok(())
    }
}

#[derive(Debug)]
pub enum Sender {
    Disabled,
    Webhook(WebhookSender),
}

impl Sender {
    pub fn webhook(url: url::Url, http_client: reqwest::Client) -> Sender {
        Sender::Webhook(WebhookSender { url, http_client })
    }
}

impl Notifier for Sender {
    async fn publish<'s>(&'s self, message: Message) -> anyhow::Result<()> {
        match self {
            Sender::Disabled => {
                tracing::warn!(
                    subject = %message.subject,
                    body = %message.short_body,
                    "skipping publishing alert notification (disabled)"
                );
                Ok(())
            }
            Sender::Webhook(webhook) => webhook.send(message).await,
        }
    }
}
