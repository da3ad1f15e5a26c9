//! Generated push/pull workloads through the in-process dispatcher.

use proptest::prelude::*;
use std::collections::BTreeMap;
use tamanu_sync_protocol::{decode_json, PullResponse, SyncRecord};
use tamanu_sync_server::{ServerConfig, SyncServer};
use tamanu_testkit::{channel_strategy, push_record_strategy};

proptest! {
    /// Every pushed id comes back exactly once, carrying the last pushed
    /// version. Tombstones come back with only their id.
    #[test]
    fn pull_returns_latest_version_per_id(
        ch in channel_strategy(),
        records in prop::collection::vec(push_record_strategy(6), 1..20),
    ) {
        let server = SyncServer::open(ServerConfig::default()).unwrap();
        let path = format!("/v1/sync/{}", urlencoding::encode(ch.as_str()));

        let (status, _) = server.dispatch("POST", &path, None, &serde_json::to_vec(&records).unwrap());
        prop_assert_eq!(status, 200);

        let mut latest: BTreeMap<String, SyncRecord> = BTreeMap::new();
        for record in &records {
            latest.insert(record.id().unwrap().to_string(), record.clone());
        }

        let (status, body) = server.dispatch("GET", &format!("{path}?limit=100"), None, b"");
        prop_assert_eq!(status, 200);
        let page: PullResponse = decode_json(&body).unwrap();
        prop_assert_eq!(page.count, latest.len() as u64);
        prop_assert_eq!(page.records.len(), latest.len());

        for record in page.records {
            let sent = &latest[record.id().unwrap()];
            prop_assert_eq!(record.is_deleted, sent.is_deleted);
            prop_assert!(record.last_synced.is_some());
            if sent.is_deleted {
                prop_assert_eq!(record.data.len(), 1);
            } else {
                prop_assert_eq!(&record.data, &sent.data);
            }
        }
    }
}
