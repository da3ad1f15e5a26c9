//! Request handlers for the channel endpoints.
//!
//! Handlers are plain synchronous functions over parsed requests, so the axum
//! layer, the in-process dispatcher and tests all share them.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tamanu_sync_protocol::{
    convert_from_db_record, convert_to_db_record, Channel, ChannelsRequest, ChannelsResponse,
    DeleteResponse, PullQuery, PullResponse, PushBody, PushResponse, SyncCursor, PROTOCOL_VERSION,
};
use tamanu_sync_store::ChannelStore;
use tracing::debug;

/// Body of `GET /v1/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Wire protocol version.
    pub protocol_version: u16,
}

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// The central channel store.
    pub store: Arc<dyn ChannelStore>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, store: Arc<dyn ChannelStore>) -> Self {
        Self { config, store }
    }
}

/// Handler for sync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Returns the store behind this handler.
    pub fn store(&self) -> &Arc<dyn ChannelStore> {
        &self.context.store
    }

    /// Handles `GET /v1/health`.
    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            protocol_version: PROTOCOL_VERSION,
        }
    }

    /// Handles a pull: one page of rows after the query cursor.
    pub fn handle_pull(&self, channel: &Channel, query: &PullQuery) -> ServerResult<PullResponse> {
        let store = &self.context.store;
        let cursor = query.resolve_cursor()?;
        let limit = query.effective_limit(self.context.config.max_pull_batch);
        let requested_at = store.clock().now();

        // Rows can only enter the region after the cursor, so counting after
        // the read never undercounts the page.
        let rows = store.find_since(channel, &cursor, limit)?;
        let count = store.count_since(channel, &cursor)?;
        let next = rows.last().map(SyncCursor::after).unwrap_or(cursor);

        debug!(
            channel = %channel,
            returned = rows.len(),
            remaining = count,
            cursor = %next,
            "pull"
        );
        Ok(PullResponse {
            records: rows.iter().map(convert_from_db_record).collect(),
            count,
            cursor: next.to_string(),
            requested_at,
        })
    }

    /// Handles a push of one record or a batch.
    pub fn handle_push(&self, channel: &Channel, body: PushBody) -> ServerResult<PushResponse> {
        let max = self.context.config.max_push_batch;
        if body.len() > max as usize {
            return Err(ServerError::BatchTooLarge {
                count: body.len(),
                max,
            });
        }

        let store = &self.context.store;
        let now = store.clock().now();
        let rows = body
            .into_records()
            .into_iter()
            .map(|record| convert_to_db_record(record, now))
            .collect::<Result<Vec<_>, _>>()?;
        let stored = store.upsert_batch(channel, rows)?;

        debug!(channel = %channel, count = stored.len(), "push");
        Ok(PushResponse {
            count: stored.len() as u64,
        })
    }

    /// Handles a delete by id.
    pub fn handle_delete(&self, channel: &Channel, id: &str) -> ServerResult<DeleteResponse> {
        match self.context.store.mark_record_deleted(channel, id)? {
            0 => Err(ServerError::NotFound(format!("{channel}/{id}"))),
            count => {
                debug!(channel = %channel, id, "delete");
                Ok(DeleteResponse { count })
            }
        }
    }

    /// Handles a channel change query.
    pub fn handle_channels(&self, request: &ChannelsRequest) -> ServerResult<ChannelsResponse> {
        let mut response = ChannelsResponse::default();
        for entry in request {
            let cursor = SyncCursor::parse(&entry.cursor)?;
            if self.context.store.count_since(&entry.channel, &cursor)? > 0 {
                response.channels_with_changes.push(entry.channel.clone());
            }
        }
        debug!(
            asked = request.len(),
            changed = response.channels_with_changes.len(),
            "channels"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tamanu_sync_protocol::{ChannelCursor, SyncRecord};
    use tamanu_sync_store::{ClockSource, StoreOptions, SyncStore};

    fn create_handler(config: ServerConfig) -> RequestHandler {
        let store = SyncStore::in_memory(StoreOptions::central().with_clock(ClockSource::Logical));
        let context = Arc::new(HandlerContext::new(config, Arc::new(store)));
        RequestHandler::new(context)
    }

    fn record(value: serde_json::Value) -> SyncRecord {
        serde_json::from_value(value).unwrap()
    }

    fn patient() -> Channel {
        Channel::parse("patient").unwrap()
    }

    #[test]
    fn pull_empty() {
        let handler = create_handler(ServerConfig::default());
        let response = handler.handle_pull(&patient(), &PullQuery::default()).unwrap();
        assert!(response.records.is_empty());
        assert_eq!(response.count, 0);
        assert!(!response.has_more());
        assert_eq!(response.cursor, "0");
    }

    #[test]
    fn push_and_pull() {
        let handler = create_handler(ServerConfig::default());
        let body = PushBody::Many(vec![
            record(json!({ "data": { "id": "p1", "firstName": "Ana" } })),
            record(json!({ "data": { "id": "p2" }, "lastSynced": 99999 })),
        ]);
        assert_eq!(handler.handle_push(&patient(), body).unwrap().count, 2);

        let response = handler.handle_pull(&patient(), &PullQuery::default()).unwrap();
        assert_eq!(response.records.len(), 2);
        assert_eq!(response.records[0].data["firstName"], "Ana");
        // Server stamps replace whatever the client sent.
        assert_eq!(response.records[1].last_synced, Some(2));
        assert_eq!(response.cursor, "2;p2");
    }

    #[test]
    fn single_record_push() {
        let handler = create_handler(ServerConfig::default());
        let body = PushBody::One(record(json!({ "data": { "id": "u1" } })));
        assert_eq!(handler.handle_push(&patient(), body).unwrap().count, 1);
    }

    #[test]
    fn push_without_id_is_rejected() {
        let handler = create_handler(ServerConfig::default());
        let body = PushBody::One(record(json!({ "data": { "name": "x" } })));
        let err = handler.handle_push(&patient(), body).unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn oversized_push_is_rejected() {
        let handler = create_handler(ServerConfig::default().with_max_push_batch(2));
        let body: PushBody = (0..3)
            .map(|i| record(json!({ "data": { "id": format!("r{i}") } })))
            .collect::<Vec<_>>()
            .into();
        let err = handler.handle_push(&patient(), body).unwrap_err();
        assert!(matches!(err, ServerError::BatchTooLarge { count: 3, max: 2 }));
        assert_eq!(handler.store().count_since(&patient(), &SyncCursor::start()).unwrap(), 0);
    }

    #[test]
    fn pull_pagination() {
        let handler = create_handler(ServerConfig::default());
        let body: PushBody = (0..5)
            .map(|i| record(json!({ "data": { "id": format!("r{i}") } })))
            .collect::<Vec<_>>()
            .into();
        handler.handle_push(&patient(), body).unwrap();

        let mut query = PullQuery::new(&SyncCursor::start(), 2);
        let mut pages = Vec::new();
        loop {
            let response = handler.handle_pull(&patient(), &query).unwrap();
            pages.push(response.records.len());
            if !response.has_more() {
                break;
            }
            query.cursor = Some(response.cursor);
        }
        assert_eq!(pages, vec![2, 2, 1]);
    }

    #[test]
    fn limit_is_clamped_to_max_pull_batch() {
        let handler = create_handler(ServerConfig::default().with_max_pull_batch(3));
        let body: PushBody = (0..5)
            .map(|i| record(json!({ "data": { "id": format!("r{i}") } })))
            .collect::<Vec<_>>()
            .into();
        handler.handle_push(&patient(), body).unwrap();

        let response = handler
            .handle_pull(&patient(), &PullQuery::new(&SyncCursor::start(), 1_000))
            .unwrap();
        assert_eq!(response.records.len(), 3);
        assert_eq!(response.count, 5);
    }

    #[test]
    fn legacy_since_query() {
        let handler = create_handler(ServerConfig::default());
        for id in ["a", "b", "c"] {
            handler
                .handle_push(&patient(), PushBody::One(record(json!({ "data": { "id": id } }))))
                .unwrap();
        }
        // A bare timestamp includes rows stamped at exactly that time.
        let query = PullQuery {
            since: Some("2".into()),
            ..PullQuery::default()
        };
        let response = handler.handle_pull(&patient(), &query).unwrap();
        let ids: Vec<_> = response.records.iter().filter_map(|r| r.id()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn delete_then_pull_tombstone() {
        let handler = create_handler(ServerConfig::default());
        handler
            .handle_push(
                &patient(),
                PushBody::One(record(json!({ "data": { "id": "p1", "name": "x" } }))),
            )
            .unwrap();

        assert_eq!(handler.handle_delete(&patient(), "p1").unwrap().count, 1);
        assert!(matches!(
            handler.handle_delete(&patient(), "p1"),
            Err(ServerError::NotFound(_))
        ));

        let response = handler
            .handle_pull(&patient(), &PullQuery::new(&SyncCursor::new(1, "p1"), 10))
            .unwrap();
        assert_eq!(response.records.len(), 1);
        assert!(response.records[0].is_deleted);
        assert_eq!(response.records[0].data, json!({ "id": "p1" }).as_object().cloned().unwrap());
    }

    #[test]
    fn channels_with_changes() {
        let handler = create_handler(ServerConfig::default());
        let encounters = Channel::parse("patient/p1/encounter").unwrap();
        handler
            .handle_push(&encounters, PushBody::One(record(json!({ "data": { "id": "e1" } }))))
            .unwrap();

        let request = vec![
            ChannelCursor {
                channel: encounters.clone(),
                cursor: String::new(),
            },
            ChannelCursor {
                channel: patient(),
                cursor: String::new(),
            },
            ChannelCursor {
                channel: encounters.clone(),
                cursor: "1;e1".into(),
            },
        ];
        let response = handler.handle_channels(&request).unwrap();
        assert_eq!(response.channels_with_changes, vec![encounters]);
    }

    #[test]
    fn health_reports_version() {
        let handler = create_handler(ServerConfig::default());
        let health = handler.health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.protocol_version, PROTOCOL_VERSION);
    }
}
