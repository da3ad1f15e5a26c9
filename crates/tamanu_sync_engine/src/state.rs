//! Sync engine state machine.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tamanu_sync_protocol::{
    convert_from_db_record, convert_to_db_record, Channel, ChannelCursor, Conflict,
    ConflictPolicy, ConflictResolution, DbRecord, SyncCursor, SyncRecord,
};
use tamanu_sync_store::FacilityStore;
use tracing::{debug, info, warn};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// Engine is connecting to the server.
    Connecting,
    /// Engine is pulling changes from the server.
    Pulling,
    /// Engine is pushing changes to the server.
    Pushing,
    /// Engine has completed a sync cycle.
    Synced,
    /// Engine encountered an error.
    Error,
    /// Engine is waiting before retrying.
    RetryWait,
}

impl SyncState {
    /// Returns true if the engine is in an active sync state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Connecting | SyncState::Pulling | SyncState::Pushing
        )
    }

    /// Returns true if the engine can start a new sync.
    pub fn can_start_sync(&self) -> bool {
        matches!(
            self,
            SyncState::Idle | SyncState::Synced | SyncState::Error | SyncState::RetryWait
        )
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Total number of rows pulled and applied.
    pub records_pulled: u64,
    /// Total number of rows pushed.
    pub records_pushed: u64,
    /// Total number of conflicts encountered.
    pub conflicts_encountered: u64,
    /// Total number of retries.
    pub retries: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// What one cycle did to one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSyncResult {
    /// The channel.
    pub channel: Channel,
    /// Rows pulled and applied.
    pub pulled: u64,
    /// Rows pushed.
    pub pushed: u64,
    /// Watermark after the pull.
    pub cursor: SyncCursor,
}

/// Result of a sync cycle.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// Number of rows pulled.
    pub pulled: u64,
    /// Number of rows pushed.
    pub pushed: u64,
    /// Per-channel breakdown, in sync order.
    pub channels: Vec<ChannelSyncResult>,
    /// Conflicts that were resolved.
    pub resolved_conflicts: Vec<Conflict>,
    /// Conflicts that require manual resolution.
    pub unresolved_conflicts: Vec<Conflict>,
    /// Whether the sync was successful.
    pub success: bool,
    /// Duration of the sync cycle.
    pub duration: Duration,
}

impl SyncCycleResult {
    fn new() -> Self {
        Self {
            pulled: 0,
            pushed: 0,
            channels: Vec::new(),
            resolved_conflicts: Vec::new(),
            unresolved_conflicts: Vec::new(),
            success: false,
            duration: Duration::ZERO,
        }
    }

    fn channel_mut(&mut self, channel: &Channel) -> &mut ChannelSyncResult {
        let index = match self.channels.iter().position(|c| &c.channel == channel) {
            Some(index) => index,
            None => {
                self.channels.push(ChannelSyncResult {
                    channel: channel.clone(),
                    pulled: 0,
                    pushed: 0,
                    cursor: SyncCursor::start(),
                });
                self.channels.len() - 1
            }
        };
        &mut self.channels[index]
    }

    fn record_pull(&mut self, channel: &Channel, pull: ChannelPull) {
        self.pulled += pull.pulled;
        let entry = self.channel_mut(channel);
        entry.pulled += pull.pulled;
        entry.cursor = pull.cursor;
        self.resolved_conflicts.extend(pull.resolved);
        self.unresolved_conflicts.extend(pull.unresolved);
    }
}

/// Outcome of pulling one channel.
struct ChannelPull {
    pulled: u64,
    cursor: SyncCursor,
    resolved: Vec<Conflict>,
    unresolved: Vec<Conflict>,
}

/// Outcome of pushing one channel: rows sent, keyed by id.
struct ChannelPush {
    pushed: u64,
    sent: HashMap<String, DbRecord>,
}

/// True when two rows carry the same payload and deletion state.
fn same_content(a: &DbRecord, b: &DbRecord) -> bool {
    a.is_deleted() == b.is_deleted() && a.fields == b.fields
}

/// The sync engine manages synchronization of a facility store with the
/// central server.
///
/// Each cycle pulls, pushes, then pulls back the channels it pushed to so
/// the server's copies of the pushed rows are stored before the next local
/// edit.
pub struct SyncEngine<T: SyncTransport, S: FacilityStore> {
    config: SyncConfig,
    transport: Arc<T>,
    store: Arc<S>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    conflict_policy: RwLock<ConflictPolicy>,
    unresolved: RwLock<Vec<Conflict>>,
    cancelled: AtomicBool,
    current_retry: AtomicU64,
}

impl<T: SyncTransport, S: FacilityStore> SyncEngine<T, S> {
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, transport: T, store: Arc<S>) -> Self {
        let policy = config.conflict_policy;
        Self {
            config,
            transport: Arc::new(transport),
            store,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            conflict_policy: RwLock::new(policy),
            unresolved: RwLock::new(Vec::new()),
            cancelled: AtomicBool::new(false),
            current_retry: AtomicU64::new(0),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the facility store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Sets the conflict policy.
    pub fn set_conflict_policy(&self, policy: ConflictPolicy) {
        *self.conflict_policy.write() = policy;
    }

    /// Gets the conflict policy.
    pub fn conflict_policy(&self) -> ConflictPolicy {
        *self.conflict_policy.read()
    }

    /// Conflicts left by the last cycle that stopped on them.
    pub fn unresolved_conflicts(&self) -> Vec<Conflict> {
        self.unresolved.read().clone()
    }

    /// Cancels any ongoing sync operation.
    ///
    /// The running cycle stops at the next page boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Performs a full sync cycle: pull then push.
    ///
    /// # Errors
    ///
    /// Returns the first transport, protocol or store error, or
    /// [`SyncError::UnresolvedConflict`] when the manual policy stopped a
    /// channel. Nothing is pushed in that case.
    pub fn sync(&self) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();

        if !self.state().can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", self.state()),
                to: "sync".into(),
            });
        }

        let mut result = SyncCycleResult::new();
        if let Err(e) = self.run_cycle(&mut result) {
            self.handle_error(&e);
            return Err(e);
        }

        if !result.unresolved_conflicts.is_empty() {
            let first = &result.unresolved_conflicts[0];
            let err = SyncError::UnresolvedConflict {
                channel: first.channel.to_string(),
                id: first.id.clone(),
            };
            *self.unresolved.write() = result.unresolved_conflicts.clone();
            self.stats.write().conflicts_encountered +=
                (result.resolved_conflicts.len() + result.unresolved_conflicts.len()) as u64;
            self.handle_error(&err);
            return Err(err);
        }

        result.success = true;
        result.duration = start.elapsed();
        self.set_state(SyncState::Synced);
        self.current_retry.store(0, Ordering::SeqCst);
        self.unresolved.write().clear();

        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.records_pulled += result.pulled;
            stats.records_pushed += result.pushed;
            stats.conflicts_encountered += result.resolved_conflicts.len() as u64;
            stats.last_sync_time = Some(Instant::now());
            stats.last_error = None;
        }

        info!(
            facility = %self.config.facility_id,
            pulled = result.pulled,
            pushed = result.pushed,
            conflicts = result.resolved_conflicts.len(),
            duration_ms = result.duration.as_millis() as u64,
            "sync cycle complete"
        );
        Ok(result)
    }

    fn run_cycle(&self, result: &mut SyncCycleResult) -> SyncResult<()> {
        self.set_state(SyncState::Connecting);
        if !self.transport.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let channels = self.sync_channels()?;
        let changed = self.changed_channels(&channels)?;
        self.check_cancelled()?;

        self.set_state(SyncState::Pulling);
        let nothing_sent = HashMap::new();
        for channel in &changed {
            self.check_cancelled()?;
            let pull = self.pull_channel(channel, &nothing_sent)?;
            result.record_pull(channel, pull);
        }

        if !result.unresolved_conflicts.is_empty() {
            return Ok(());
        }

        self.set_state(SyncState::Pushing);
        let mut pushed_channels = Vec::new();
        for channel in &channels {
            self.check_cancelled()?;
            let push = self.push_channel(channel)?;
            if push.pushed > 0 {
                result.pushed += push.pushed;
                result.channel_mut(channel).pushed = push.pushed;
                pushed_channels.push((channel, push.sent));
            }
        }

        // Absorb the echoes of this cycle's pushes.
        self.set_state(SyncState::Pulling);
        for (channel, sent) in &pushed_channels {
            self.check_cancelled()?;
            let pull = self.pull_channel(channel, sent)?;
            result.record_pull(channel, pull);
        }
        Ok(())
    }

    /// Performs a sync with retry on transient errors.
    ///
    /// # Errors
    ///
    /// Returns the last error once it is not retryable or attempts run out.
    pub fn sync_with_retry(&self) -> SyncResult<SyncCycleResult> {
        self.reset_cancel();
        let retry_config = &self.config.retry;
        let mut last_error = None;

        for attempt in 0..retry_config.max_attempts {
            if attempt > 0 {
                self.set_state(SyncState::RetryWait);
                let delay = retry_config.delay_for_attempt(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying sync");
                std::thread::sleep(delay);

                self.stats.write().retries += 1;
            }

            self.check_cancelled()?;
            self.current_retry.store(u64::from(attempt), Ordering::SeqCst);

            match self.sync() {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if e.is_retryable() && attempt + 1 < retry_config.max_attempts {
                        warn!(attempt, error = %e, "sync attempt failed");
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SyncError::Protocol("no sync attempts made".into())))
    }

    /// Applies a manual resolution to a conflict from a stopped cycle.
    ///
    /// `AcceptRemote` stores the remote row. `KeepLocal` pushes the local row
    /// at once so the server's copy supersedes the remote one on the next
    /// pull. `Skip` does nothing.
    ///
    /// # Errors
    ///
    /// Returns transport or store errors.
    pub fn resolve_conflict(
        &self,
        conflict: &Conflict,
        resolution: ConflictResolution,
    ) -> SyncResult<()> {
        match resolution {
            ConflictResolution::AcceptRemote => {
                self.store
                    .apply_remote(&conflict.channel, conflict.remote.clone())?;
            }
            ConflictResolution::KeepLocal => {
                let local = match self.store.get(&conflict.channel, &conflict.id)? {
                    Some(row) if row.marked_for_push => row,
                    _ => return Ok(()),
                };
                self.transport
                    .push(&conflict.channel, &[convert_from_db_record(&local)])?;
                self.store.mark_records_pushed(
                    &conflict.channel,
                    &[(local.id.clone(), local.local_version)],
                )?;
            }
            ConflictResolution::Skip => return Ok(()),
        }
        self.unresolved
            .write()
            .retain(|c| !(c.channel == conflict.channel && c.id == conflict.id));
        Ok(())
    }

    fn sync_channels(&self) -> SyncResult<Vec<Channel>> {
        if self.config.channels.is_empty() {
            Ok(self.store.channels()?)
        } else {
            Ok(self.config.channels.clone())
        }
    }

    fn changed_channels(&self, channels: &[Channel]) -> SyncResult<Vec<Channel>> {
        if channels.is_empty() {
            return Ok(Vec::new());
        }
        let request = channels
            .iter()
            .map(|channel| {
                Ok(ChannelCursor {
                    channel: channel.clone(),
                    cursor: self.store.pull_cursor(channel)?.to_string(),
                })
            })
            .collect::<SyncResult<Vec<_>>>()?;

        let response = self.transport.channels_with_changes(&request)?;
        // Keep configured order; ignore anything not asked for.
        let changed = channels
            .iter()
            .filter(|c| response.channels_with_changes.contains(c))
            .cloned()
            .collect::<Vec<_>>();
        debug!(asked = channels.len(), changed = changed.len(), "channel change query");
        Ok(changed)
    }

    /// Pulls a channel from its watermark.
    ///
    /// `sent` holds the rows pushed earlier in the cycle. A pulled row whose
    /// content matches the sent row is our own echo: it is not a conflict even
    /// when the local row was edited again and is still marked.
    fn pull_channel(
        &self,
        channel: &Channel,
        sent: &HashMap<String, DbRecord>,
    ) -> SyncResult<ChannelPull> {
        let policy = self.conflict_policy();
        let mut cursor = self.store.pull_cursor(channel)?;
        let mut pull = ChannelPull {
            pulled: 0,
            cursor: cursor.clone(),
            resolved: Vec::new(),
            unresolved: Vec::new(),
        };

        loop {
            self.check_cancelled()?;
            let page = self
                .transport
                .pull(channel, &cursor, self.config.pull_batch_size)?;
            let has_more = page.has_more();
            debug!(
                %channel,
                %cursor,
                records = page.records.len(),
                remaining = page.count,
                "pulled page"
            );

            let mut watermark = cursor.clone();
            let mut stopped = false;
            for record in page.records {
                let last_synced = record.last_synced.ok_or_else(|| {
                    SyncError::Protocol(format!("pulled record in {channel} has no lastSynced"))
                })?;
                let remote = convert_to_db_record(record, self.store.clock().now())?;
                let id = remote.id.clone();

                let echo = sent.get(&id).is_some_and(|row| same_content(row, &remote));
                match self.store.get(channel, &id)? {
                    Some(local) if local.marked_for_push && echo => {
                        debug!(%channel, %id, "echo of a row edited since its push");
                    }
                    Some(local) if local.marked_for_push => {
                        let mut conflict = Conflict::new(channel.clone(), local, remote);
                        policy.resolve(&mut conflict);
                        match conflict.resolution {
                            Some(ConflictResolution::AcceptRemote) => {
                                self.store.apply_remote(channel, conflict.remote.clone())?;
                                pull.pulled += 1;
                                pull.resolved.push(conflict);
                            }
                            Some(ConflictResolution::KeepLocal) => {
                                pull.resolved.push(conflict);
                            }
                            _ => {
                                warn!(%channel, %id, "conflict needs manual resolution");
                                pull.unresolved.push(conflict);
                                stopped = true;
                                break;
                            }
                        }
                    }
                    Some(local) if same_content(&local, &remote) => {
                        self.store.apply_remote(channel, remote)?;
                    }
                    _ => {
                        self.store.apply_remote(channel, remote)?;
                        pull.pulled += 1;
                    }
                }
                watermark = SyncCursor::new(last_synced, id);
            }

            if watermark != cursor {
                self.store.set_pull_cursor(channel, &watermark)?;
            }
            // An empty page that claims more would loop forever.
            let progressed = watermark != cursor;
            cursor = watermark;
            if stopped || !has_more || !progressed {
                break;
            }
        }

        pull.cursor = cursor;
        Ok(pull)
    }

    fn push_channel(&self, channel: &Channel) -> SyncResult<ChannelPush> {
        let mut push = ChannelPush {
            pushed: 0,
            sent: HashMap::new(),
        };

        loop {
            self.check_cancelled()?;

            let rows = self
                .store
                .find_marked_for_push(channel, self.config.push_batch_size)?;
            if rows.is_empty() {
                break;
            }

            let records: Vec<SyncRecord> = rows.iter().map(convert_from_db_record).collect();
            let response = self.transport.push(channel, &records)?;
            debug!(%channel, sent = records.len(), accepted = response.count, "pushed batch");

            let versions: Vec<(String, u64)> = rows
                .iter()
                .map(|row| (row.id.clone(), row.local_version))
                .collect();
            let cleared = self.store.mark_records_pushed(channel, &versions)?;
            push.pushed += rows.len() as u64;
            push.sent.extend(rows.into_iter().map(|row| (row.id.clone(), row)));

            if cleared == 0 {
                warn!(%channel, "no push marks cleared; stopping push for this cycle");
                break;
            }
        }

        Ok(push)
    }

    fn handle_error(&self, error: &SyncError) {
        self.set_state(SyncState::Error);
        self.stats.write().last_error = Some(error.to_string());
    }
}
