//! HTTP adapter of an App.
//!
//! Acknowledgement and check-in are also served over GET (and not only POST),
//! so they can be driven by links in e-mails and by `curl` in cron jobs.
use crate::alerts::Candidate;
use crate::notify::Notifier;
use crate::{Alert, App, DeadMansSwitch, HttpMonitor};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use eventlog::EventLog;
use std::sync::Arc;

/// An error response, having an HTTP status and wrapping an `anyhow::Error`.
#[derive(Debug, thiserror::Error)]
#[error("status: {status}, error: {error}")]
pub struct ApiError {
    pub status: StatusCode,
    #[source]
    pub error: anyhow::Error,
}

impl ApiError {
    pub fn new(status: StatusCode, error: anyhow::Error) -> ApiError {
        ApiError { status, error }
    }

    pub fn bad_request(message: impl std::fmt::Display) -> ApiError {
        ApiError::new(StatusCode::BAD_REQUEST, anyhow::anyhow!("{message}"))
    }
}

impl From<crate::Error> for ApiError {
    fn from(err: crate::Error) -> Self {
        let status = if err.is_validation() {
            StatusCode::BAD_REQUEST
        } else if let Some(rejection) = err.rejection() {
            if rejection.is_not_found() {
                StatusCode::NOT_FOUND
            } else {
                StatusCode::CONFLICT
            }
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        ApiError::new(status, err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = ?self.error, "request failed");
        } else {
            tracing::debug!(status = %self.status, error = %self.error, "request rejected");
        }
        let body = serde_json::json!({ "error": format!("{:#}", self.error) });
        (self.status, Json(body)).into_response()
    }
}

pub fn router<L: EventLog, N: Notifier>(app: Arc<App<L, N>>) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/alerts", get(list_alerts::<L, N>))
        .route("/alerts/acknowledge", get(acknowledge::<L, N>))
        .route("/alerts/ingest", axum::routing::post(ingest::<L, N>))
        .route(
            "/deadmansswitch/checkin",
            get(checkin_query::<L, N>).post(checkin_json::<L, N>),
        )
        .route("/deadmansswitches", get(list_dead_mans_switches::<L, N>))
        .route("/httpmonitors", get(list_http_monitors::<L, N>))
        .with_state(app)
}

type AppState<L, N> = State<Arc<App<L, N>>>;

async fn list_alerts<L: EventLog, N: Notifier>(
    State(app): AppState<L, N>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    app.sync().await?;
    Ok(Json(app.active_alerts()))
}

async fn list_dead_mans_switches<L: EventLog, N: Notifier>(
    State(app): AppState<L, N>,
) -> Result<Json<Vec<DeadMansSwitch>>, ApiError> {
    app.sync().await?;
    Ok(Json(app.dead_mans_switches()))
}

async fn list_http_monitors<L: EventLog, N: Notifier>(
    State(app): AppState<L, N>,
) -> Result<Json<Vec<HttpMonitor>>, ApiError> {
    app.sync().await?;
    Ok(Json(app.http_monitors()))
}

#[derive(Debug, serde::Deserialize)]
struct AcknowledgeRequest {
    // Older acknowledgement links name the parameter `key`.
    #[serde(default, alias = "key")]
    id: String,
}

async fn acknowledge<L: EventLog, N: Notifier>(
    State(app): AppState<L, N>,
    Query(AcknowledgeRequest { id }): Query<AcknowledgeRequest>,
) -> Result<String, ApiError> {
    if id.is_empty() {
        return Err(ApiError::bad_request("id not specified"));
    }
    app.acknowledge(&id, Utc::now()).await?;

    Ok(format!("Ack ok for {id}"))
}

#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct IngestRequest {
    subject: String,
    #[serde(default)]
    details: String,
    /// When the alert happened. Defaults to its time of receipt.
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

async fn ingest<L: EventLog, N: Notifier>(
    State(app): AppState<L, N>,
    Json(request): Json<IngestRequest>,
) -> Result<StatusCode, ApiError> {
    if request.subject.is_empty() {
        return Err(ApiError::bad_request("subject not specified"));
    }
    let candidate = Candidate {
        subject: request.subject,
        details: request.details,
        timestamp: request.timestamp.unwrap_or_else(Utc::now),
    };

    if app.ingest(vec![candidate]).await? {
        Ok(StatusCode::CREATED)
    } else {
        Ok(StatusCode::NO_CONTENT)
    }
}

#[derive(Debug, Default, serde::Deserialize)]
struct CheckinRequest {
    #[serde(default)]
    subject: String,
    /// Deadline of the next check-in, such as `+24h`, `+1d@09:00`,
    /// or an RFC3339 timestamp.
    #[serde(default)]
    ttl: String,
}

async fn checkin_query<L: EventLog, N: Notifier>(
    State(app): AppState<L, N>,
    Query(request): Query<CheckinRequest>,
) -> Result<&'static str, ApiError> {
    checkin(&app, request).await
}

async fn checkin_json<L: EventLog, N: Notifier>(
    State(app): AppState<L, N>,
    Json(request): Json<CheckinRequest>,
) -> Result<&'static str, ApiError> {
    checkin(&app, request).await
}

async fn checkin<L: EventLog, N: Notifier>(
    app: &App<L, N>,
    CheckinRequest { subject, ttl }: CheckinRequest,
) -> Result<&'static str, ApiError> {
    if app.checkin_spec(&subject, &ttl, Utc::now()).await? {
        Ok("Check-in noted; alert that was firing for this dead man's switch was acked")
    } else {
        Ok("Check-in noted")
    }
}
