//! HTTP transport implementation.
//!
//! This module provides an HTTP-based transport for the sync engine.
//! The actual HTTP client is abstracted via a trait so the same transport runs
//! over [`ReqwestClient`] in production and [`LoopbackClient`] in tests.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tamanu_sync_protocol::{
    decode_json, encode_json, Channel, ChannelCursor, ChannelsResponse, DeleteResponse, ErrorBody,
    PullResponse, PushResponse, SyncCursor, SyncRecord,
};
use tracing::{debug, warn};

/// HTTP method used by the sync API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// DELETE
    Delete,
}

impl HttpMethod {
    /// Returns the method name.
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. An `Err` means
/// the request never produced a response.
pub trait HttpClient: Send + Sync {
    /// Sends a request with an optional bearer token and JSON body.
    fn send(
        &self,
        method: HttpMethod,
        url: &str,
        bearer: Option<&str>,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based sync transport speaking the `/v1/sync` JSON API.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the central server (e.g., "https://central.example.com").
    base_url: String,
    /// Bearer token.
    token: Option<String>,
    /// HTTP client implementation.
    client: C,
    /// Set false by `close`.
    connected: AtomicBool,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Sets the bearer token sent with every sync request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn set_error(&self, err: &str) {
        *self.last_error.write() = Some(err.to_string());
    }

    fn clear_error(&self) {
        *self.last_error.write() = None;
    }

    fn channel_url(&self, channel: &Channel) -> String {
        format!(
            "{}/v1/sync/{}",
            self.base_url,
            urlencoding::encode(channel.as_str())
        )
    }

    fn request<Req, Res>(&self, method: HttpMethod, url: &str, body: Option<&Req>) -> SyncResult<Res>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let body = body.map(encode_json).transpose()?;
        debug!(method = method.as_str(), url, "sync request");

        let response = self
            .client
            .send(method, url, self.token.as_deref(), body)
            .map_err(|e| {
                self.set_error(&e);
                SyncError::transport_retryable(e)
            })?;

        if !(200..300).contains(&response.status) {
            let message = decode_json::<ErrorBody>(&response.body)
                .map(|b| b.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&response.body).into_owned());
            warn!(status = response.status, %message, url, "sync request failed");
            self.set_error(&message);
            return Err(SyncError::from_status(response.status, message));
        }

        self.clear_error();
        Ok(decode_json(&response.body)?)
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn pull(&self, channel: &Channel, cursor: &SyncCursor, limit: u32) -> SyncResult<PullResponse> {
        let url = format!(
            "{}?cursor={}&limit={limit}",
            self.channel_url(channel),
            urlencoding::encode(&cursor.to_string())
        );
        self.request::<(), _>(HttpMethod::Get, &url, None)
    }

    fn push(&self, channel: &Channel, records: &[SyncRecord]) -> SyncResult<PushResponse> {
        self.request(HttpMethod::Post, &self.channel_url(channel), Some(&records))
    }

    fn delete(&self, channel: &Channel, id: &str) -> SyncResult<DeleteResponse> {
        let url = format!("{}/{}", self.channel_url(channel), urlencoding::encode(id));
        self.request::<(), _>(HttpMethod::Delete, &url, None)
    }

    fn channels_with_changes(&self, request: &[ChannelCursor]) -> SyncResult<ChannelsResponse> {
        let url = format!("{}/v1/sync/channels", self.base_url);
        self.request(HttpMethod::Post, &url, Some(&request))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// [`HttpClient`] over a blocking reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Builds a client with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend can't be initialised.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::transport_fatal(format!("building http client: {e}")))?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn send(
        &self,
        method: HttpMethod,
        url: &str,
        bearer: Option<&str>,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, String> {
        let mut request = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Delete => self.client.delete(url),
        };
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = request.send().map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(|e| e.to_string())?.to_vec();
        Ok(HttpResponse { status, body })
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a request for `path` (query string included).
    fn handle(
        &self,
        method: HttpMethod,
        path: &str,
        authorization: Option<&str>,
        body: &[u8],
    ) -> HttpResponse;
}

/// A loopback HTTP client that routes requests directly to a sync server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn send(
        &self,
        method: HttpMethod,
        url: &str,
        bearer: Option<&str>,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, String> {
        let path = url.find("/v1/").map(|i| &url[i..]).unwrap_or(url);
        let authorization = bearer.map(|t| format!("Bearer {t}"));
        Ok(self.server.handle(
            method,
            path,
            authorization.as_deref(),
            body.as_deref().unwrap_or_default(),
        ))
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone)]
    struct Sent {
        method: HttpMethod,
        url: String,
        bearer: Option<String>,
        body: Option<Vec<u8>>,
    }

    struct TestClient {
        response: Mutex<Result<HttpResponse, String>>,
        sent: Mutex<Vec<Sent>>,
        healthy: AtomicBool,
    }

    impl TestClient {
        fn replying(status: u16, body: &str) -> Self {
            Self {
                response: Mutex::new(Ok(HttpResponse {
                    status,
                    body: body.as_bytes().to_vec(),
                })),
                sent: Mutex::new(Vec::new()),
                healthy: AtomicBool::new(true),
            }
        }

        fn failing(message: &str) -> Self {
            let client = Self::replying(200, "");
            *client.response.lock() = Err(message.to_string());
            client
        }

        fn last(&self) -> Sent {
            self.sent.lock().last().cloned().unwrap()
        }
    }

    impl HttpClient for TestClient {
        fn send(
            &self,
            method: HttpMethod,
            url: &str,
            bearer: Option<&str>,
            body: Option<Vec<u8>>,
        ) -> Result<HttpResponse, String> {
            self.sent.lock().push(Sent {
                method,
                url: url.to_string(),
                bearer: bearer.map(str::to_string),
                body,
            });
            self.response.lock().clone()
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    fn channel() -> Channel {
        Channel::parse("patient/p1/encounter").unwrap()
    }

    #[test]
    fn transport_creation() {
        let transport = HttpTransport::new("https://central.example.com/", TestClient::replying(200, "{}"));
        assert_eq!(transport.base_url(), "https://central.example.com");
        assert!(transport.is_connected());
        assert!(transport.last_error().is_none());
    }

    #[test]
    fn pull_builds_encoded_url() {
        let client = TestClient::replying(
            200,
            r#"{"records":[],"count":0,"cursor":"7;e1","requestedAt":9}"#,
        );
        let transport = HttpTransport::new("http://central", client).with_token("tok");

        let page = transport
            .pull(&channel(), &SyncCursor::new(7, "e1"), 50)
            .unwrap();
        assert_eq!(page.cursor, "7;e1");
        assert_eq!(page.requested_at, 9);

        let sent = transport.client.last();
        assert_eq!(sent.method, HttpMethod::Get);
        assert_eq!(
            sent.url,
            "http://central/v1/sync/patient%2Fp1%2Fencounter?cursor=7%3Be1&limit=50"
        );
        assert_eq!(sent.bearer.as_deref(), Some("tok"));
        assert!(sent.body.is_none());
    }

    #[test]
    fn push_sends_json_array() {
        let transport = HttpTransport::new("http://central", TestClient::replying(200, r#"{"count":1}"#));
        let response = transport
            .push(&channel(), &[SyncRecord::tombstone("e1")])
            .unwrap();
        assert_eq!(response.count, 1);

        let sent = transport.client.last();
        assert_eq!(sent.method, HttpMethod::Post);
        let body: serde_json::Value = serde_json::from_slice(&sent.body.unwrap()).unwrap();
        assert_eq!(body[0]["data"]["id"], "e1");
        assert_eq!(body[0]["isDeleted"], true);
    }

    #[test]
    fn delete_encodes_the_id() {
        let transport = HttpTransport::new("http://central", TestClient::replying(200, r#"{"count":1}"#));
        transport.delete(&channel(), "a b").unwrap();
        assert_eq!(
            transport.client.last().url,
            "http://central/v1/sync/patient%2Fp1%2Fencounter/a%20b"
        );
    }

    #[test]
    fn error_status_uses_server_message() {
        let transport = HttpTransport::new(
            "http://central",
            TestClient::replying(401, r#"{"code":401,"message":"token expired"}"#),
        );
        let err = transport.pull(&channel(), &SyncCursor::start(), 10).unwrap_err();
        assert!(matches!(err, SyncError::AuthenticationFailed(ref m) if m == "token expired"));
        assert_eq!(transport.last_error().as_deref(), Some("token expired"));
    }

    #[test]
    fn transport_errors_are_retryable_and_keep_the_connection() {
        let transport = HttpTransport::new("http://central", TestClient::failing("connection refused"));
        let err = transport.delete(&channel(), "e1").unwrap_err();
        assert!(err.is_retryable());
        assert!(transport.is_connected());
        assert_eq!(transport.last_error().as_deref(), Some("connection refused"));
    }

    #[test]
    fn unhealthy_client_means_not_connected() {
        let client = TestClient::replying(200, "{}");
        client.healthy.store(false, Ordering::SeqCst);
        let transport = HttpTransport::new("http://central", client);

        let err = transport.channels_with_changes(&[]).unwrap_err();
        assert!(matches!(err, SyncError::NotConnected));
    }

    #[test]
    fn closed_transport_refuses_requests() {
        let transport = HttpTransport::new("http://central", TestClient::replying(200, "{}"));
        transport.close().unwrap();
        assert!(matches!(
            transport.pull(&channel(), &SyncCursor::start(), 1),
            Err(SyncError::NotConnected)
        ));
    }

    struct Echo;

    impl LoopbackServer for Echo {
        fn handle(
            &self,
            method: HttpMethod,
            path: &str,
            authorization: Option<&str>,
            body: &[u8],
        ) -> HttpResponse {
            let text = format!(
                "{} {} {} {}",
                method.as_str(),
                path,
                authorization.unwrap_or("-"),
                body.len()
            );
            HttpResponse {
                status: 200,
                body: text.into_bytes(),
            }
        }
    }

    #[test]
    fn loopback_strips_the_host() {
        let client = LoopbackClient::new(Echo);
        let response = client
            .send(
                HttpMethod::Post,
                "http://central:3000/v1/sync/user",
                Some("tok"),
                Some(b"[]".to_vec()),
            )
            .unwrap();
        assert_eq!(
            String::from_utf8(response.body).unwrap(),
            "POST /v1/sync/user Bearer tok 2"
        );
    }
}
