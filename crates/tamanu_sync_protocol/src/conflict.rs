//! Conflict detection and resolution.
//!
//! A conflict arises on a facility when a pulled row targets a local row that
//! still has unpushed changes.

use crate::channel::Channel;
use crate::record::DbRecord;
use serde::{Deserialize, Serialize};

/// A conflict between a local row and an incoming remote row.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    /// Channel of the row.
    pub channel: Channel,
    /// Row id.
    pub id: String,
    /// Local row, marked for push.
    pub local: DbRecord,
    /// Row pulled from the server.
    pub remote: DbRecord,
    /// Resolution (if any).
    pub resolution: Option<ConflictResolution>,
}

impl Conflict {
    /// Creates a new unresolved conflict.
    #[must_use]
    pub fn new(channel: Channel, local: DbRecord, remote: DbRecord) -> Self {
        Self {
            channel,
            id: remote.id.clone(),
            local,
            remote,
            resolution: None,
        }
    }

    /// Returns true if one side deleted the row and the other edited it.
    #[must_use]
    pub fn is_update_delete_conflict(&self) -> bool {
        self.local.is_deleted() != self.remote.is_deleted()
    }

    /// Returns true if both sides deleted the row.
    #[must_use]
    pub fn is_delete_delete(&self) -> bool {
        self.local.is_deleted() && self.remote.is_deleted()
    }

    /// Resolves the conflict with the given resolution.
    pub fn resolve(&mut self, resolution: ConflictResolution) {
        self.resolution = Some(resolution);
    }

    /// Returns true if the conflict has been resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(
            self.resolution,
            Some(ConflictResolution::KeepLocal | ConflictResolution::AcceptRemote)
        )
    }
}

/// Resolution for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Keep the local row; it stays marked and is pushed later.
    KeepLocal,
    /// Overwrite the local row with the remote one.
    AcceptRemote,
    /// Leave unresolved.
    Skip,
}

/// Policy for automatic conflict resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Server always wins.
    #[default]
    ServerWins,
    /// Client always wins.
    ClientWins,
    /// The later write wins: the remote row's `lastSynced` against the local
    /// row's `updatedAt`. Ties go to the server.
    LastWriteWins,
    /// Manual resolution required.
    Manual,
}

impl ConflictPolicy {
    /// Returns true if this policy automatically resolves conflicts.
    #[must_use]
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ConflictPolicy::Manual)
    }

    /// Resolves a conflict according to this policy.
    pub fn resolve(&self, conflict: &mut Conflict) {
        let resolution = match self {
            ConflictPolicy::ServerWins => ConflictResolution::AcceptRemote,
            ConflictPolicy::ClientWins => ConflictResolution::KeepLocal,
            ConflictPolicy::LastWriteWins => {
                let remote_at = conflict.remote.last_synced.unwrap_or(0);
                if remote_at >= conflict.local.updated_at {
                    ConflictResolution::AcceptRemote
                } else {
                    ConflictResolution::KeepLocal
                }
            }
            ConflictPolicy::Manual => ConflictResolution::Skip,
        };
        conflict.resolve(resolution);
    }

    /// Parses a policy name as used in configuration.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "server-wins" | "server" => Some(ConflictPolicy::ServerWins),
            "client-wins" | "client" => Some(ConflictPolicy::ClientWins),
            "last-write-wins" | "lww" => Some(ConflictPolicy::LastWriteWins),
            "manual" => Some(ConflictPolicy::Manual),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict(local_updated_at: u64, remote_last_synced: u64) -> Conflict {
        let mut local = DbRecord::new("p1").with_field("name", "local");
        local.updated_at = local_updated_at;
        local.marked_for_push = true;
        let mut remote = DbRecord::new("p1").with_field("name", "remote");
        remote.last_synced = Some(remote_last_synced);
        Conflict::new(Channel::parse("patient").unwrap(), local, remote)
    }

    #[test]
    fn policy_resolution() {
        let mut c = conflict(10, 20);

        ConflictPolicy::ServerWins.resolve(&mut c);
        assert_eq!(c.resolution, Some(ConflictResolution::AcceptRemote));

        ConflictPolicy::ClientWins.resolve(&mut c);
        assert_eq!(c.resolution, Some(ConflictResolution::KeepLocal));

        ConflictPolicy::Manual.resolve(&mut c);
        assert_eq!(c.resolution, Some(ConflictResolution::Skip));
        assert!(!c.is_resolved());
    }

    #[test]
    fn last_write_wins_compares_times() {
        let mut remote_newer = conflict(10, 20);
        ConflictPolicy::LastWriteWins.resolve(&mut remote_newer);
        assert_eq!(remote_newer.resolution, Some(ConflictResolution::AcceptRemote));

        let mut local_newer = conflict(30, 20);
        ConflictPolicy::LastWriteWins.resolve(&mut local_newer);
        assert_eq!(local_newer.resolution, Some(ConflictResolution::KeepLocal));

        let mut tie = conflict(20, 20);
        ConflictPolicy::LastWriteWins.resolve(&mut tie);
        assert_eq!(tie.resolution, Some(ConflictResolution::AcceptRemote));
    }

    #[test]
    fn conflict_kinds() {
        let mut c = conflict(1, 2);
        assert!(!c.is_update_delete_conflict());

        c.remote.make_tombstone(3);
        assert!(c.is_update_delete_conflict());

        c.local.make_tombstone(4);
        assert!(c.is_delete_delete());
    }

    #[test]
    fn policy_names() {
        assert_eq!(ConflictPolicy::from_name("LWW"), Some(ConflictPolicy::LastWriteWins));
        assert_eq!(ConflictPolicy::from_name("client-wins"), Some(ConflictPolicy::ClientWins));
        assert_eq!(ConflictPolicy::from_name("coin-flip"), None);
        assert!(ConflictPolicy::default().auto_resolves());
    }
}
