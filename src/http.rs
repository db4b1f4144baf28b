//! Auxiliary HTTP surface: history/statistics API, Prometheus metrics, and
//! health/readiness probes.
//!
//! Read traffic is served from the replica pool when one is configured;
//! authorization goes through the same token verifier and permission
//! oracle as the realtime path.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::auth::Principal;
use crate::authz::{Action, Target};
use crate::db::MessageRecord;
use crate::error::EngineError;
use crate::state::Hub;

/// Default and maximum history page sizes.
const DEFAULT_PAGE: u32 = 50;
const MAX_PAGE: u32 = 200;

/// Uniform response envelope.
#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    message: String,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            message: "ok".to_string(),
        })
    }
}

type ApiError = (StatusCode, Json<ApiResponse<()>>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ApiResponse {
            success: false,
            data: None,
            message: message.into(),
        }),
    )
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Validation(_) | EngineError::UnsupportedCommand(_) => {
                StatusCode::BAD_REQUEST
            }
            EngineError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::ModeratedBlock(_) => StatusCode::FORBIDDEN,
            EngineError::SlowConsumer | EngineError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = match &err {
            EngineError::Internal(detail) => {
                error!(detail = %detail, "api internal error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        api_error(status, message)
    }
}

/// Build the axum router.
pub fn build_router(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/messages", get(history))
        .route("/api/messages/search", get(search))
        .route("/api/messages/stats", get(stats))
        .route("/api/rooms", get(list_rooms))
        .route("/api/rooms/:id/members", get(list_members))
        .with_state(hub)
}

/// Serve the HTTP surface until shutdown.
pub async fn run_http_server(
    listener: tokio::net::TcpListener,
    hub: Arc<Hub>,
) -> std::io::Result<()> {
    let mut shutdown = hub.shutdown_signal();
    let app = build_router(hub);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}

async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

async fn healthz() -> &'static str {
    "ok"
}

/// Readiness fails when the persistence primary has been unreachable past
/// the probe threshold, so an orchestrator can route traffic away.
async fn readyz(State(hub): State<Arc<Hub>>) -> (StatusCode, &'static str) {
    if hub.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "persistence unavailable")
    }
}

/// Authenticate the request's bearer token.
async fn authenticate(hub: &Hub, headers: &HeaderMap) -> Result<Principal, ApiError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "missing bearer token"))?;

    hub.verifier
        .verify(token)
        .await
        .map_err(|e| api_error(StatusCode::UNAUTHORIZED, e.to_string()))
}

/// Authorize `read-history` on a room and report whether the caller gets
/// the moderator view.
async fn authorize_read(
    hub: &Hub,
    principal: &Principal,
    room_id: i64,
) -> Result<bool, ApiError> {
    let membership = hub.db.memberships().active(room_id, principal.id).await.map_err(EngineError::from)?;
    let view = membership.as_ref().map(|m| m.view());
    let is_staff = principal.role.is_staff() || view.as_ref().is_some_and(|v| v.is_room_staff());

    let room = hub
        .db
        .rooms()
        .fetch(room_id)
        .await
        .map_err(EngineError::from)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "room not found"))?;

    hub.oracle
        .check(
            principal,
            Action::ReadHistory,
            &Target {
                membership: view,
                required_level: room.required_level.clamp(0, u8::MAX as i64) as u8,
                is_author: false,
            },
        )
        .map_err(|deny| api_error(StatusCode::FORBIDDEN, deny.to_string()))?;

    Ok(is_staff)
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    room: Option<i64>,
    limit: Option<u32>,
    before: Option<i64>,
    after: Option<i64>,
    user1: Option<i64>,
    user2: Option<i64>,
}

fn clamp_limit(limit: Option<u32>) -> Result<u32, ApiError> {
    let limit = limit.unwrap_or(DEFAULT_PAGE);
    if limit == 0 || limit > MAX_PAGE {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("limit must be between 1 and {MAX_PAGE}"),
        ));
    }
    Ok(limit)
}

/// Wire shape of one history message. Deleted messages keep their id and
/// timestamps but serve redacted content except to the author and staff.
#[derive(Debug, Serialize)]
struct MessageView {
    id: i64,
    room_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    author_id: Option<i64>,
    author_name: String,
    #[serde(rename = "type")]
    kind: &'static str,
    content: String,
    status: &'static str,
    created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    edited_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<i64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    flagged: bool,
}

fn message_view(record: &MessageRecord, viewer: &Principal, staff_view: bool) -> MessageView {
    let redact = record.deleted_at.is_some()
        && !staff_view
        && record.author_id != Some(viewer.id);
    MessageView {
        id: record.room_seq,
        room_id: record.room_id,
        author_id: record.author_id,
        author_name: record.author_name.clone(),
        kind: record.kind.as_str(),
        content: if redact {
            String::new()
        } else {
            record.content.clone()
        },
        status: record.status.as_str(),
        created_at: record.created_at,
        edited_at: record.edited_at,
        reply_to: record.reply_to,
        flagged: record.flagged && staff_view,
    }
}

async fn history(
    State(hub): State<Arc<Hub>>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let principal = authenticate(&hub, &headers).await?;
    let limit = clamp_limit(query.limit)?;

    let room_id = match (query.room, query.user1, query.user2) {
        (Some(room), _, _) => room,
        (None, Some(user1), Some(user2)) => {
            if principal.id != user1 && principal.id != user2 && !principal.role.is_staff() {
                return Err(api_error(
                    StatusCode::FORBIDDEN,
                    "not a party to this conversation",
                ));
            }
            hub.db
                .directs()
                .fetch(user1, user2)
                .await
                .map_err(EngineError::from)?
                .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "conversation not found"))?
                .room_id
        }
        _ => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "expected `room` or `user1`+`user2`",
            ));
        }
    };

    let staff_view = authorize_read(&hub, &principal, room_id).await?;

    let page = hub
        .db
        .messages_read()
        .history(room_id, query.before, query.after, limit, staff_view)
        .await
        .map_err(EngineError::from)?;

    let messages: Vec<MessageView> = page
        .messages
        .iter()
        .map(|m| message_view(m, &principal, staff_view))
        .collect();

    Ok(ApiResponse::ok(json!({
        "messages": messages,
        "next_before": page.next_before,
    })))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    room: i64,
    q: String,
    limit: Option<u32>,
}

async fn search(
    State(hub): State<Arc<Hub>>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let principal = authenticate(&hub, &headers).await?;
    let limit = clamp_limit(query.limit)?;
    if query.q.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "empty query"));
    }

    let staff_view = authorize_read(&hub, &principal, query.room).await?;

    let hits = hub
        .db
        .messages_read()
        .search(query.room, &query.q, limit)
        .await
        .map_err(EngineError::from)?;
    let messages: Vec<MessageView> = hits
        .iter()
        .map(|m| message_view(m, &principal, staff_view))
        .collect();

    Ok(ApiResponse::ok(json!({ "messages": messages })))
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    room: Option<i64>,
    days: Option<u32>,
}

async fn stats(
    State(hub): State<Arc<Hub>>,
    headers: HeaderMap,
    Query(query): Query<StatsQuery>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let principal = authenticate(&hub, &headers).await?;

    match query.room {
        Some(room_id) => {
            authorize_read(&hub, &principal, room_id).await?;
            let stats = hub
                .db
                .messages_read()
                .room_stats(room_id)
                .await
                .map_err(EngineError::from)?;
            let series = hub
                .db
                .messages_read()
                .daily_series(room_id, query.days.unwrap_or(7).min(90))
                .await
                .map_err(EngineError::from)?;
            Ok(ApiResponse::ok(json!({
                "room": stats,
                "daily": series.iter().map(|(day, count)| json!({ "day": day, "count": count })).collect::<Vec<_>>(),
            })))
        }
        None => {
            let (messages, rooms, active_rooms) = hub
                .db
                .messages_read()
                .global_stats()
                .await
                .map_err(EngineError::from)?;
            let sent_by_caller = hub
                .db
                .messages_read()
                .principal_message_count(principal.id)
                .await
                .map_err(EngineError::from)?;
            Ok(ApiResponse::ok(json!({
                "messages": messages,
                "rooms": rooms,
                "active_rooms": active_rooms,
                "sent_by_caller": sent_by_caller,
            })))
        }
    }
}

async fn list_rooms(
    State(hub): State<Arc<Hub>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let principal = authenticate(&hub, &headers).await?;

    let room_ids = hub
        .db
        .memberships()
        .rooms_of(principal.id)
        .await
        .map_err(EngineError::from)?;

    let mut rooms = Vec::with_capacity(room_ids.len());
    for room_id in room_ids {
        if let Some(room) = hub.db.rooms().fetch(room_id).await.map_err(EngineError::from)? {
            rooms.push(json!({
                "id": room.id,
                "uuid": room.uuid,
                "slug": room.slug,
                "name": room.name,
                "type": room.room_type.as_str(),
                "status": room.status.as_str(),
                "topic": room.topic,
                "member_count": room.member_count,
                "last_activity_at": room.last_activity_at,
            }));
        }
    }

    Ok(ApiResponse::ok(json!({ "rooms": rooms })))
}

async fn list_members(
    State(hub): State<Arc<Hub>>,
    headers: HeaderMap,
    Path(room_id): Path<i64>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let principal = authenticate(&hub, &headers).await?;
    authorize_read(&hub, &principal, room_id).await?;

    let members = hub
        .db
        .memberships()
        .list_members(room_id)
        .await
        .map_err(EngineError::from)?;
    let online: Vec<i64> = hub
        .presence
        .online_among(&members.iter().map(|m| m.principal_id).collect::<Vec<_>>());

    let members: Vec<serde_json::Value> = members
        .iter()
        .map(|m| {
            json!({
                "principal_id": m.principal_id,
                "role": m.role.as_str(),
                "joined_at": m.joined_at,
                "last_read_id": m.last_read_id,
                "muted": m.muted_until.is_some_and(|t| t > crate::db::now_millis()),
                "online": online.contains(&m.principal_id),
            })
        })
        .collect();

    Ok(ApiResponse::ok(json!({ "members": members })))
}
