//! Main sync server.

use crate::auth::{bearer_token, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::routes::{self, AppState};
use axum::Router;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tamanu_sync_protocol::{encode_json, Channel, ErrorBody, PullQuery};
use tamanu_sync_store::{ChannelStore, SyncStore};
use tokio::net::TcpListener;
use tracing::info;

/// The central sync server.
///
/// Bundles configuration, the channel store and the request handler. Serve it
/// over HTTP with [`SyncServer::serve`], or drive it in-process with
/// [`SyncServer::dispatch`].
///
/// # Example
///
/// ```
/// use tamanu_sync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::open(ServerConfig::default()).unwrap();
/// let (status, _body) = server.dispatch("GET", "/v1/health", None, b"");
/// assert_eq!(status, 200);
/// ```
#[derive(Clone)]
pub struct SyncServer {
    config: ServerConfig,
    handler: Arc<RequestHandler>,
    validator: Option<Arc<TokenValidator>>,
}

impl SyncServer {
    /// Opens the store named by the configuration and builds the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory can't be opened or is locked.
    pub fn open(config: ServerConfig) -> ServerResult<Self> {
        let options = config.store_options();
        let store = match &config.data_dir {
            Some(dir) => SyncStore::open_dir(dir, options)?,
            None => SyncStore::in_memory(options),
        };
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Creates a server over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn ChannelStore>) -> Self {
        let validator = config
            .auth
            .clone()
            .map(|auth| Arc::new(TokenValidator::new(auth)));
        let context = Arc::new(HandlerContext::new(config.clone(), store));
        Self {
            config,
            handler: Arc::new(RequestHandler::new(context)),
            validator,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the request handler.
    pub fn handler(&self) -> &Arc<RequestHandler> {
        &self.handler
    }

    /// Returns the token validator, when authentication is enabled.
    pub fn validator(&self) -> Option<&TokenValidator> {
        self.validator.as_deref()
    }

    /// Builds the axum router.
    pub fn router(&self) -> Router {
        let state = AppState {
            handler: Arc::clone(&self.handler),
            validator: self.validator.clone(),
        };
        routes::router(state, &self.config)
    }

    /// Serves HTTP on `listener` until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(
            %addr,
            auth = self.config.require_auth(),
            data_dir = ?self.config.data_dir,
            "sync server listening"
        );
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("sync server stopped");
        Ok(())
    }

    /// Binds the configured address and serves until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the address can't be bound.
    pub async fn bind_and_serve<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Handles one request without HTTP and returns `(status, json body)`.
    ///
    /// `path` may carry a query string. Routes, authentication and error
    /// bodies match the HTTP router.
    pub fn dispatch(
        &self,
        method: &str,
        path: &str,
        authorization: Option<&str>,
        body: &[u8],
    ) -> (u16, Vec<u8>) {
        match self.route(method, path, authorization, body) {
            Ok(reply) => reply,
            Err(err) => {
                let status = err.status().as_u16();
                let body = ErrorBody {
                    code: status,
                    message: err.to_string(),
                };
                (status, encode_json(&body).unwrap_or_default())
            }
        }
    }

    fn route(
        &self,
        method: &str,
        path: &str,
        authorization: Option<&str>,
        body: &[u8],
    ) -> ServerResult<(u16, Vec<u8>)> {
        let (path, query) = path.split_once('?').unwrap_or((path, ""));
        let segments: Vec<&str> = path
            .strip_prefix("/v1/")
            .ok_or_else(|| ServerError::NotFound(path.to_string()))?
            .split('/')
            .collect();
        let method = method.to_ascii_uppercase();
        let handler = &self.handler;

        match (method.as_str(), segments.as_slice()) {
            ("GET", ["health"]) => ok(&handler.health()),
            (_, ["sync", rest @ ..]) if !rest.is_empty() && rest.len() <= 2 => {
                self.authorize(authorization)?;
                match (method.as_str(), rest) {
                    ("POST", ["channels"]) => {
                        let request = tamanu_sync_protocol::decode_json(body)?;
                        ok(&handler.handle_channels(&request)?)
                    }
                    ("GET", [channel]) => {
                        let channel = decode_channel(channel)?;
                        ok(&handler.handle_pull(&channel, &parse_query(query)?)?)
                    }
                    ("POST", [channel]) => {
                        let channel = decode_channel(channel)?;
                        let body = tamanu_sync_protocol::decode_json(body)?;
                        ok(&handler.handle_push(&channel, body)?)
                    }
                    ("DELETE", [channel, id]) => {
                        let channel = decode_channel(channel)?;
                        ok(&handler.handle_delete(&channel, &decode(id)?)?)
                    }
                    _ => Err(ServerError::NotFound(format!("{method} {path}"))),
                }
            }
            _ => Err(ServerError::NotFound(format!("{method} {path}"))),
        }
    }

    fn authorize(&self, authorization: Option<&str>) -> ServerResult<()> {
        if let Some(validator) = &self.validator {
            let token = authorization
                .and_then(bearer_token)
                .ok_or_else(|| ServerError::AuthenticationFailed("missing bearer token".into()))?;
            validator.validate(token)?;
        }
        Ok(())
    }
}

fn ok<T: Serialize>(message: &T) -> ServerResult<(u16, Vec<u8>)> {
    Ok((200, encode_json(message)?))
}

fn decode(segment: &str) -> ServerResult<String> {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .map_err(|e| ServerError::InvalidRequest(format!("bad path segment {segment:?}: {e}")))
}

fn decode_channel(segment: &str) -> ServerResult<Channel> {
    Ok(Channel::parse(&decode(segment)?)?)
}

fn parse_query(query: &str) -> ServerResult<PullQuery> {
    let mut parsed = PullQuery::default();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = decode(value)?;
        match key {
            "cursor" => parsed.cursor = Some(value),
            "since" => parsed.since = Some(value),
            "limit" => {
                parsed.limit = Some(value.parse().map_err(|_| {
                    ServerError::InvalidRequest(format!("limit is not a number: {value:?}"))
                })?);
            }
            _ => {}
        }
    }
    Ok(parsed)
}
