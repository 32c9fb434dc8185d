use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::Json;
use futures::stream::{self, Stream};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};

use super::AppState;
use crate::crawler::SubmitOutcome;
use crate::notify::{Notification, RelayRequest};
use crate::storage::{lock, CrawlRecord, Storage};
use crate::PageProbeError;

/// Header carrying the authenticated user, set by the upstream auth layer
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

/// The caller's user id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| UserId(value.to_string()))
            .ok_or_else(|| error(StatusCode::UNAUTHORIZED, "missing user identity"))
    }
}

#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StopBody {
    pub status: &'static str,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct RelayBody {
    pub status: &'static str,
    pub delivered: usize,
}

pub async fn health() -> Json<StatusBody> {
    Json(StatusBody { status: "ok" })
}

pub async fn start_crawl(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(url_id): Path<i64>,
) -> Result<(StatusCode, Json<StatusBody>), ApiError> {
    match state.service.submit_crawl(&user_id, url_id) {
        Ok(SubmitOutcome::Submitted { .. }) | Ok(SubmitOutcome::AlreadyActive) => Ok((
            StatusCode::ACCEPTED,
            Json(StatusBody {
                status: "submitted",
            }),
        )),
        Err(e) => Err(api_error(e)),
    }
}

pub async fn stop_crawl(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(url_id): Path<i64>,
) -> Result<Json<StopBody>, ApiError> {
    let count = state
        .service
        .stop_crawl(&user_id, url_id)
        .await
        .map_err(api_error)?;

    Ok(Json(StopBody {
        status: "stopped",
        count,
    }))
}

pub async fn latest_crawl(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(url_id): Path<i64>,
) -> Result<Json<CrawlRecord>, ApiError> {
    let storage = lock(&state.storage);

    if storage
        .get_url_for_user(url_id, &user_id)
        .map_err(|e| api_error(e.into()))?
        .is_none()
    {
        return Err(error(StatusCode::NOT_FOUND, "url not found"));
    }

    storage
        .get_latest_crawl_for_url(url_id)
        .map_err(|e| api_error(e.into()))?
        .map(Json)
        .ok_or_else(|| error(StatusCode::NOT_FOUND, "no crawl for this url"))
}

pub async fn stream_updates(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let subscription = state.broadcaster.subscribe(&user_id);
    tracing::info!(user_id = %user_id, connection_id = subscription.id(), "Live update stream opened");

    // The subscription unregisters itself when the client disconnects and
    // the stream is dropped
    let events = stream::unfold(subscription, |mut subscription| async move {
        let notification = subscription.next().await?;
        Some((Event::default().json_data(&notification), subscription))
    });

    Sse::new(events)
}

/// Publishes an update relayed by a worker process on this host
///
/// Workers share the SQLite file with the server, so they always run on the
/// same machine; calls from any other peer are refused.
pub async fn relay_notification(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(request): Json<RelayRequest>,
) -> Result<Json<RelayBody>, ApiError> {
    if !is_loopback(peer.ip()) {
        tracing::warn!(peer = %peer, "Rejected relay call from non-local peer");
        return Err(error(StatusCode::FORBIDDEN, "relay is only accepted from this host"));
    }

    let delivered = state.broadcaster.publish(
        &request.user_id,
        Notification::crawl_update(&request.user_id, request.url_id),
    );
    tracing::debug!(
        user_id = %request.user_id,
        url_id = request.url_id,
        delivered,
        "Relayed crawl update"
    );

    Ok(Json(RelayBody {
        status: "ok",
        delivered,
    }))
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map_or(v6.is_loopback(), |v4| v4.is_loopback()),
    }
}

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn api_error(err: PageProbeError) -> ApiError {
    match err {
        PageProbeError::UrlNotFound { .. } => error(StatusCode::NOT_FOUND, "url not found"),
        other => {
            tracing::error!(error = %other, "Request failed");
            error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}
