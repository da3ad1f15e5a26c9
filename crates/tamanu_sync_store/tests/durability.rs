//! Store tests against real directories and generated workloads.

use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use tamanu_sync_protocol::{DbRecord, SyncCursor};
use tamanu_sync_store::{
    ChannelStore, ClockSource, FacilityStore, StoreError, StoreOptions, SyncStore, JOURNAL_FILE,
};
use tamanu_testkit::{channel, fields_strategy, random_row, row_id_strategy, TempStoreDir};

#[test]
fn reopened_directory_keeps_rows_and_watermarks() {
    let dir = TempStoreDir::new();
    let ch = channel("patient/p1/encounter");
    let last;
    {
        let store = dir.open_central();
        store.upsert(&ch, DbRecord::new("e1").with_field("reason", "fever")).unwrap();
        last = store.upsert(&ch, DbRecord::new("e2")).unwrap().last_synced.unwrap();
        store.mark_record_deleted(&ch, "e1").unwrap();
    }

    let store = dir.open_central();
    let rows = store.find_since(&ch, &SyncCursor::start(), 10).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].id, "e2");
    assert!(rows[1].is_deleted());

    // New stamps continue past everything replayed.
    let next = store.upsert(&ch, DbRecord::new("e3")).unwrap();
    assert!(next.last_synced.unwrap() > rows[1].last_synced.unwrap());
    assert!(next.last_synced.unwrap() > last);
}

#[test]
fn second_open_of_a_directory_is_refused() {
    let dir = TempStoreDir::new();
    let _first = dir.open_central();

    let err = SyncStore::open_dir(dir.path(), StoreOptions::central()).unwrap_err();
    assert!(matches!(err, StoreError::Locked(_)));
}

#[test]
fn torn_write_is_dropped_on_reopen() {
    let dir = TempStoreDir::new();
    let ch = channel("user");
    {
        let store = dir.open_central();
        store.upsert(&ch, DbRecord::new("u1")).unwrap();
    }
    {
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join(JOURNAL_FILE))
            .unwrap();
        file.write_all(br#"{"op":"put","channel":"user","row":{"id":"u2""#).unwrap();
    }

    let store = dir.open_central();
    assert!(store.get(&ch, "u1").unwrap().is_some());
    assert!(store.get(&ch, "u2").unwrap().is_none());

    // The journal is well framed again, so later writes survive.
    store.upsert(&ch, DbRecord::new("u3")).unwrap();
    drop(store);
    let store = dir.open_central();
    assert!(store.get(&ch, "u3").unwrap().is_some());
}

#[test]
fn facility_state_survives_compaction_and_reopen() {
    let dir = TempStoreDir::new();
    let ch = channel("patient");
    {
        let store = dir.open_facility();
        for _ in 0..5 {
            store.save_local(&ch, "p1", Map::new()).unwrap();
        }
        store.set_pull_cursor(&ch, &SyncCursor::new(77, "p0")).unwrap();
        store.compact().unwrap();
    }

    let store = dir.open_facility();
    let row = store.get(&ch, "p1").unwrap().unwrap();
    assert_eq!(row.local_version, 5);
    assert!(row.marked_for_push);
    assert_eq!(store.pull_cursor(&ch).unwrap(), SyncCursor::new(77, "p0"));
}

#[test]
fn central_compaction_keeps_the_latest_row_per_id() {
    let dir = TempStoreDir::new();
    let ch = channel("reference");
    let ids: Vec<String>;
    {
        let store = dir.open_central();
        ids = (0..4)
            .map(|i| store.upsert(&ch, random_row(json!({ "n": i }))).unwrap().id)
            .collect();
        for id in &ids {
            store.upsert(&ch, DbRecord::new(id.clone()).with_field("n", 99)).unwrap();
        }
        let stats = store.compact().unwrap();
        assert_eq!(stats.entries, 4);
        assert!(stats.bytes_after < stats.bytes_before);
    }

    let store = dir.open_central();
    for id in &ids {
        assert_eq!(store.get(&ch, id).unwrap().unwrap().fields["n"], json!(99));
    }
}

#[derive(Debug, Clone)]
enum Op {
    Upsert(String, Map<String, Value>),
    Delete(String),
    Pull(u32),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (row_id_strategy(12), fields_strategy()).prop_map(|(id, f)| Op::Upsert(id, f)),
        1 => row_id_strategy(12).prop_map(Op::Delete),
        2 => (1u32..5).prop_map(Op::Pull),
    ]
}

proptest! {
    /// A reader paging through the log while writes interleave ends up with
    /// the latest version of every row, and its cursor only moves forward.
    #[test]
    fn interleaved_paging_converges(ops in prop::collection::vec(op(), 1..80)) {
        let store = SyncStore::in_memory(StoreOptions::central().with_clock(ClockSource::Logical));
        let ch = channel("reference");
        let mut cursor = SyncCursor::start();
        let mut seen = std::collections::BTreeMap::new();

        let mut drain = |store: &SyncStore, cursor: &mut SyncCursor, limit: u32| {
            let page = store.find_since(&ch, cursor, limit).unwrap();
            let mut ids = BTreeSet::new();
            for row in page {
                prop_assert!(ids.insert(row.id.clone()), "duplicate id in page");
                let next = SyncCursor::after(&row);
                prop_assert!(*cursor < next);
                *cursor = next;
                seen.insert(row.id.clone(), row);
            }
            Ok::<(), TestCaseError>(())
        };

        for op in ops {
            match op {
                Op::Upsert(id, fields) => {
                    let mut row = DbRecord::new(id);
                    row.fields = fields;
                    store.upsert(&ch, row).unwrap();
                }
                Op::Delete(id) => {
                    store.mark_record_deleted(&ch, &id).unwrap();
                }
                Op::Pull(limit) => drain(&store, &mut cursor, limit)?,
            }
        }
        while store.count_since(&ch, &cursor).unwrap() > 0 {
            drain(&store, &mut cursor, 3)?;
        }

        let all = store.find_since(&ch, &SyncCursor::start(), u32::MAX).unwrap();
        prop_assert_eq!(all.len(), seen.len());
        for row in all {
            prop_assert_eq!(seen.get(&row.id), Some(&row));
        }
    }
}
