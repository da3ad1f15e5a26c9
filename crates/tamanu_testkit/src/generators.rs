//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use proptest::prelude::*;
use serde_json::{Map, Value};
use tamanu_sync_protocol::{Channel, SyncRecord, RESERVED_CHANNEL, RESERVED_KEYS};

/// Strategy for one channel segment.
pub fn segment_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-zA-Z0-9_.-]{0,11}").expect("Invalid regex")
}

/// Strategy for valid channel names, simple or scoped.
pub fn channel_strategy() -> impl Strategy<Value = Channel> {
    prop::collection::vec(segment_strategy(), 1..4)
        .prop_filter("reserved name", |segments| segments.join("/") != RESERVED_CHANNEL)
        .prop_map(|segments| {
            Channel::parse(&segments.join("/")).expect("Generated channel is valid")
        })
}

/// Strategy for row ids drawn from a small pool so updates collide.
pub fn row_id_strategy(pool: usize) -> impl Strategy<Value = String> {
    (0..pool.max(1)).prop_map(|i| format!("row-{i}"))
}

/// Strategy for a field value.
pub fn field_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
    ]
}

/// Strategy for field maps without reserved keys.
pub fn fields_strategy() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map("[a-z][a-zA-Z]{0,8}", field_value_strategy(), 0..5).prop_map(
        |map| {
            map.into_iter()
                .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
                .collect()
        },
    )
}

/// Strategy for records a client might push: live or deleted.
pub fn push_record_strategy(pool: usize) -> impl Strategy<Value = SyncRecord> {
    (row_id_strategy(pool), fields_strategy(), any::<bool>()).prop_map(|(id, mut data, deleted)| {
        data.insert("id".into(), Value::String(id.clone()));
        if deleted {
            SyncRecord::tombstone(id)
        } else {
            SyncRecord::new(data)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tamanu_sync_protocol::convert_to_db_record;

    proptest! {
        #[test]
        fn generated_channels_round_trip_through_parse(channel in channel_strategy()) {
            prop_assert_eq!(Channel::parse(channel.as_str()).unwrap(), channel);
        }

        #[test]
        fn generated_records_convert(record in push_record_strategy(8)) {
            let deleted = record.is_deleted;
            let row = convert_to_db_record(record, 1).unwrap();
            prop_assert!(row.id.starts_with("row-"));
            prop_assert_eq!(row.is_deleted(), deleted);
        }
    }
}
