//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tamanu_sync_protocol::{
    Channel, ChannelCursor, ChannelsResponse, DeleteResponse, PullResponse, PushResponse,
    SyncCursor, SyncRecord,
};

/// A sync transport handles communication with the central server.
///
/// This trait abstracts the network layer, allowing for different implementations
/// (HTTP, in-process loopback, mock for testing, etc.).
pub trait SyncTransport: Send + Sync {
    /// Pulls one page of a channel after `cursor`.
    fn pull(&self, channel: &Channel, cursor: &SyncCursor, limit: u32) -> SyncResult<PullResponse>;

    /// Pushes records to a channel.
    fn push(&self, channel: &Channel, records: &[SyncRecord]) -> SyncResult<PushResponse>;

    /// Tombstones a row on the server.
    fn delete(&self, channel: &Channel, id: &str) -> SyncResult<DeleteResponse>;

    /// Asks which channels have rows after the given cursors.
    fn channels_with_changes(&self, request: &[ChannelCursor]) -> SyncResult<ChannelsResponse>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> SyncResult<()>;
}

/// One request seen by a [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    /// A pull.
    Pull {
        /// Channel pulled.
        channel: Channel,
        /// Cursor sent.
        cursor: SyncCursor,
        /// Limit sent.
        limit: u32,
    },
    /// A push.
    Push {
        /// Channel pushed to.
        channel: Channel,
        /// Records sent.
        records: Vec<SyncRecord>,
    },
    /// A delete.
    Delete {
        /// Channel.
        channel: Channel,
        /// Row id.
        id: String,
    },
    /// A channel change query.
    Channels(Vec<ChannelCursor>),
}

/// A scripted transport for testing.
///
/// Pulls return queued pages in order, then empty pages. Pushes and deletes
/// succeed. The channel query reports every requested channel unless
/// [`MockTransport::set_changed_channels`] narrows it. Every call is recorded.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    pulls: Mutex<VecDeque<PullResponse>>,
    failures: Mutex<VecDeque<SyncError>>,
    changed: Mutex<Option<Vec<Channel>>>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            pulls: Mutex::new(VecDeque::new()),
            failures: Mutex::new(VecDeque::new()),
            changed: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues a pull response.
    pub fn queue_pull(&self, response: PullResponse) {
        self.pulls.lock().push_back(response);
    }

    /// Makes the next call fail with `error`. Failures queue up.
    pub fn fail_next(&self, error: SyncError) {
        self.failures.lock().push_back(error);
    }

    /// Restricts which channels the change query reports.
    pub fn set_changed_channels(&self, channels: Vec<Channel>) {
        *self.changed.lock() = Some(channels);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Returns the records of every push, in order.
    pub fn pushed(&self) -> Vec<SyncRecord> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                MockCall::Push { records, .. } => Some(records.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn begin(&self, call: MockCall) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.calls.lock().push(call);
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTransport for MockTransport {
    fn pull(&self, channel: &Channel, cursor: &SyncCursor, limit: u32) -> SyncResult<PullResponse> {
        self.begin(MockCall::Pull {
            channel: channel.clone(),
            cursor: cursor.clone(),
            limit,
        })?;
        Ok(self.pulls.lock().pop_front().unwrap_or_else(|| PullResponse {
            records: Vec::new(),
            count: 0,
            cursor: cursor.to_string(),
            requested_at: 0,
        }))
    }

    fn push(&self, channel: &Channel, records: &[SyncRecord]) -> SyncResult<PushResponse> {
        self.begin(MockCall::Push {
            channel: channel.clone(),
            records: records.to_vec(),
        })?;
        Ok(PushResponse {
            count: records.len() as u64,
        })
    }

    fn delete(&self, channel: &Channel, id: &str) -> SyncResult<DeleteResponse> {
        self.begin(MockCall::Delete {
            channel: channel.clone(),
            id: id.to_string(),
        })?;
        Ok(DeleteResponse { count: 1 })
    }

    fn channels_with_changes(&self, request: &[ChannelCursor]) -> SyncResult<ChannelsResponse> {
        self.begin(MockCall::Channels(request.to_vec()))?;
        let changed = self.changed.lock();
        let channels_with_changes = request
            .iter()
            .map(|entry| entry.channel.clone())
            .filter(|channel| changed.as_ref().map_or(true, |c| c.contains(channel)))
            .collect();
        Ok(ChannelsResponse {
            channels_with_changes,
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
