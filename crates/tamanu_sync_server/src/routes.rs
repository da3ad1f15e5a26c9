//! HTTP routes.
//!
//! ```text
//! GET    /v1/health
//! GET    /v1/sync/{channel}?cursor=&since=&limit=
//! POST   /v1/sync/{channel}
//! DELETE /v1/sync/{channel}/{id}
//! POST   /v1/sync/channels
//! ```
//!
//! `{channel}` is one percent-encoded path segment. The literal name
//! `channels` is taken by the change query; pulling from or deleting in it
//! is a 400.

use crate::auth::{bearer_token, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HealthResponse, RequestHandler};
use axum::body::Bytes;
use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tamanu_sync_protocol::{
    decode_json, Channel, ChannelsRequest, ChannelsResponse, DeleteResponse, PullQuery,
    PullResponse, PushBody, PushResponse, RESERVED_CHANNEL,
};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Shared state of the router.
#[derive(Clone)]
pub struct AppState {
    /// Request handler.
    pub handler: Arc<RequestHandler>,
    /// Token validator, when authentication is enabled.
    pub validator: Option<Arc<TokenValidator>>,
}

/// Builds the `/v1` router.
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    let sync = Router::new()
        .route("/sync/channels", get(reserved_channel).post(channels))
        .route("/sync/channels/{id}", delete(reserved_channel))
        .route("/sync/{channel}", get(pull).post(push))
        .route("/sync/{channel}/{id}", delete(remove))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let v1 = Router::new().route("/health", get(health)).merge(sync);

    Router::new()
        .nest("/v1", v1)
        .with_state(state)
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            tracing::info_span!(
                "request",
                method = %request.method(),
                uri = %request.uri(),
                facility = tracing::field::Empty,
            )
        }))
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> ServerResult<Response> {
    let Some(validator) = state.validator.as_ref() else {
        return Ok(next.run(request).await);
    };
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or_else(|| ServerError::AuthenticationFailed("missing bearer token".into()))?;
    let claims = validator.validate(token)?;

    tracing::Span::current().record("facility", claims.facility_id.as_str());
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Runs a handler call on the blocking pool; store writes may fsync.
async fn blocking<T, F>(handler: Arc<RequestHandler>, f: F) -> ServerResult<T>
where
    T: Send + 'static,
    F: FnOnce(&RequestHandler) -> ServerResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&handler))
        .await
        .map_err(|e| ServerError::Internal(format!("handler task failed: {e}")))?
}

fn channel_param(path: Result<Path<String>, PathRejection>) -> ServerResult<Channel> {
    let Path(name) = path.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    Ok(Channel::parse(&name)?)
}

async fn reserved_channel() -> ServerError {
    ServerError::InvalidRequest(format!("channel name {RESERVED_CHANNEL:?} is reserved"))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(state.handler.health())
}

async fn pull(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<PullQuery>, QueryRejection>,
) -> ServerResult<Json<PullResponse>> {
    let channel = channel_param(path)?;
    let Query(query) = query.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let response = blocking(state.handler, move |h| h.handle_pull(&channel, &query)).await?;
    Ok(Json(response))
}

async fn push(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    body: Bytes,
) -> ServerResult<Json<PushResponse>> {
    let channel = channel_param(path)?;
    let body: PushBody = decode_json(&body)?;
    let response = blocking(state.handler, move |h| h.handle_push(&channel, body)).await?;
    Ok(Json(response))
}

async fn remove(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> ServerResult<Json<DeleteResponse>> {
    let Path((name, id)) = path.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let channel = Channel::parse(&name)?;
    let response = blocking(state.handler, move |h| h.handle_delete(&channel, &id)).await?;
    Ok(Json(response))
}

async fn channels(
    State(state): State<AppState>,
    body: Bytes,
) -> ServerResult<Json<ChannelsResponse>> {
    let request: ChannelsRequest = decode_json(&body)?;
    let response = blocking(state.handler, move |h| h.handle_channels(&request)).await?;
    Ok(Json(response))
}
