//! Integration tests for the mapping store

use migrate_idmap::{
    IdInput, IdMapConfig, IdMapError, IdMapStore, IdTuple, IdType, IdValue, RollbackAction,
    SourceRow, Status,
};
use serde_json::json;

fn node_map() -> IdMapStore {
    IdMapStore::open(
        IdMapConfig::new("d7_node")
            .source_id("nid", IdType::Integer)
            .destination_id("id", IdType::Text),
    )
    .unwrap()
}

fn revision_map() -> IdMapStore {
    IdMapStore::open(
        IdMapConfig::new("d7_node_revision")
            .source_id("nid", IdType::Integer)
            .source_id("vid", IdType::Integer)
            .source_id("language", IdType::Text)
            .destination_id("id", IdType::Integer)
            .destination_id("revision_id", IdType::Integer),
    )
    .unwrap()
}

fn text(s: &str) -> IdTuple {
    IdTuple::new(vec![IdValue::from(s)])
}

#[test]
fn test_save_and_read_back() {
    let map = node_map();

    map.save_id_mapping(
        IdInput::named([("nid", 5)]),
        IdInput::named([("id", "n-5")]),
        Status::Imported,
        RollbackAction::Delete,
    )
    .unwrap();

    let row = map.get_row_by_source(IdInput::named([("nid", 5)])).unwrap().unwrap();
    assert_eq!(row.status, Status::Imported);
    assert_eq!(row.rollback_action, RollbackAction::Delete);
    assert_eq!(row.destination, Some(text("n-5")));
    assert_eq!(map.imported_count().unwrap(), 1);
    assert_eq!(map.processed_count().unwrap(), 1);
}

#[test]
fn test_upsert_is_idempotent() {
    let map = node_map();

    map.save_id_mapping(5, "n-5", Status::Imported, RollbackAction::Delete).unwrap();
    map.save_id_mapping(5, "n-5-b", Status::Imported, RollbackAction::Preserve).unwrap();

    assert_eq!(map.processed_count().unwrap(), 1);
    let row = map.get_row_by_source(5).unwrap().unwrap();
    assert_eq!(row.destination, Some(text("n-5-b")));
    assert_eq!(row.rollback_action, RollbackAction::Preserve);

    // The old destination no longer resolves.
    assert!(map.get_row_by_destination("n-5").unwrap().is_empty());
    assert_eq!(map.lookup_source_id("n-5").unwrap(), None);
}

#[test]
fn test_round_trip_lookup() {
    let map = node_map();
    map.save_id_mapping(7, "n-7", Status::Imported, RollbackAction::Delete).unwrap();

    assert_eq!(map.lookup_destination_ids(7).unwrap(), vec![text("n-7")]);
    assert_eq!(map.lookup_destination_id(7).unwrap(), Some(text("n-7")));
    assert_eq!(
        map.lookup_source_id("n-7").unwrap(),
        Some(IdTuple::new(vec![IdValue::Integer(7)]))
    );
}

#[test]
fn test_lookup_misses_are_empty() {
    let map = node_map();
    assert!(map.get_row_by_source(1).unwrap().is_none());
    assert!(map.get_row_by_destination("n-1").unwrap().is_empty());
    assert!(map.lookup_destination_ids(1).unwrap().is_empty());
    assert_eq!(map.lookup_source_id("n-1").unwrap(), None);
}

#[test]
fn test_failed_row_has_no_destination() {
    let map = node_map();
    map.save_id_mapping(9, IdInput::empty(), Status::Failed, RollbackAction::Delete).unwrap();

    let row = map.get_row_by_source(9).unwrap().unwrap();
    assert_eq!(row.destination, None);
    assert_eq!(map.error_count().unwrap(), 1);
    assert!(map.lookup_destination_ids(9).unwrap().is_empty());
}

#[test]
fn test_lookup_by_source_prefix() {
    let map = revision_map();
    map.save_id_mapping(
        IdInput::list([IdValue::from(1), IdValue::from(10), IdValue::from("en")]),
        IdInput::list([100, 1000]),
        Status::Imported,
        RollbackAction::Delete,
    )
    .unwrap();
    map.save_id_mapping(
        IdInput::list([IdValue::from(1), IdValue::from(11), IdValue::from("fr")]),
        IdInput::list([100, 1001]),
        Status::Imported,
        RollbackAction::Delete,
    )
    .unwrap();
    map.save_id_mapping(
        IdInput::list([IdValue::from(2), IdValue::from(20), IdValue::from("en")]),
        IdInput::list([200, 2000]),
        Status::Imported,
        RollbackAction::Delete,
    )
    .unwrap();

    let by_nid = map.lookup_destination_ids(IdInput::named([("nid", 1)])).unwrap();
    assert_eq!(by_nid.len(), 2);

    let by_nid_vid = map.lookup_destination_ids(IdInput::list([1, 11])).unwrap();
    assert_eq!(by_nid_vid, vec![IdTuple::new(vec![IdValue::Integer(100), IdValue::Integer(1001)])]);

    // Skipping a leading column is not a prefix.
    let err = map
        .lookup_destination_ids(IdInput::named([("vid", 10)]))
        .unwrap_err();
    assert!(matches!(err, IdMapError::InvalidIdentifier(_)));

    // Too many values.
    let err = map
        .lookup_destination_ids(IdInput::list([
            IdValue::from(1),
            IdValue::from(10),
            IdValue::from("en"),
            IdValue::from(0),
        ]))
        .unwrap_err();
    assert!(matches!(err, IdMapError::InvalidIdentifier(_)));
}

#[test]
fn test_destination_shared_by_two_sources() {
    let map = node_map();
    map.save_id_mapping(1, "shared", Status::Imported, RollbackAction::Delete).unwrap();
    map.save_id_mapping(2, "shared", Status::Imported, RollbackAction::Delete).unwrap();

    let rows = map.get_row_by_destination("shared").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(
        map.lookup_source_id("shared").unwrap(),
        Some(IdTuple::new(vec![IdValue::Integer(1)]))
    );
}

#[test]
fn test_invalid_identifiers_are_rejected() {
    let map = node_map();

    let err = map
        .save_id_mapping(
            IdInput::named([("vid", 5)]),
            "n-5",
            Status::Imported,
            RollbackAction::Delete,
        )
        .unwrap_err();
    assert!(matches!(err, IdMapError::InvalidIdentifier(_)));

    let err = map
        .save_id_mapping(IdInput::list([1, 2]), "n-5", Status::Imported, RollbackAction::Delete)
        .unwrap_err();
    assert!(matches!(err, IdMapError::InvalidIdentifier(_)));

    // nid is an INTEGER column.
    let err = map.get_row_by_source("5").unwrap_err();
    assert!(matches!(err, IdMapError::InvalidIdentifier(_)));

    assert_eq!(map.processed_count().unwrap(), 0);
}

#[test]
fn test_untyped_columns_keep_integer_and_text_apart() {
    let map = IdMapStore::open(
        IdMapConfig::new("legacy")
            .source_id("key", IdType::Any)
            .destination_id("id", IdType::Any),
    )
    .unwrap();

    map.save_id_mapping(5, "int", Status::Imported, RollbackAction::Delete).unwrap();
    map.save_id_mapping("5", "text", Status::Imported, RollbackAction::Delete).unwrap();

    assert_eq!(map.processed_count().unwrap(), 2);
    assert_eq!(map.lookup_destination_id(5).unwrap(), Some(text("int")));
    assert_eq!(map.lookup_destination_id("5").unwrap(), Some(text("text")));
}

#[test]
fn test_text_columns_coerce_integers() {
    let map = IdMapStore::open(
        IdMapConfig::new("products")
            .source_id("sku", IdType::Text)
            .destination_id("id", IdType::Integer),
    )
    .unwrap();

    map.save_id_mapping(5, 50, Status::Imported, RollbackAction::Delete).unwrap();
    map.save_id_mapping("5", 51, Status::Imported, RollbackAction::Delete).unwrap();

    assert_eq!(map.processed_count().unwrap(), 1);
    assert_eq!(
        map.lookup_destination_id(5).unwrap(),
        Some(IdTuple::new(vec![IdValue::Integer(51)]))
    );
}

#[test]
fn test_set_update_unknown_row_fails() {
    let map = node_map();
    let err = map.set_update(IdInput::named([("nid", 999)])).unwrap_err();
    assert!(matches!(err, IdMapError::RowNotFound(_)));
}

#[test]
fn test_set_update_keeps_destination_and_action() {
    let map = node_map();
    map.save_id_mapping(5, "n-5", Status::Imported, RollbackAction::Preserve).unwrap();
    map.set_update(5).unwrap();

    let row = map.get_row_by_source(5).unwrap().unwrap();
    assert_eq!(row.status, Status::NeedsUpdate);
    assert_eq!(row.destination, Some(text("n-5")));
    assert_eq!(row.rollback_action, RollbackAction::Preserve);
    assert_eq!(map.update_count().unwrap(), 1);
    assert_eq!(map.imported_count().unwrap(), 0);
}

#[test]
fn test_prepare_update_moves_only_imported_rows() {
    let map = node_map();
    map.save_id_mapping(1, "n-1", Status::Imported, RollbackAction::Delete).unwrap();
    map.save_id_mapping(2, "n-2", Status::Imported, RollbackAction::Delete).unwrap();
    map.save_id_mapping(3, IdInput::empty(), Status::Failed, RollbackAction::Delete).unwrap();
    map.save_id_mapping(4, IdInput::empty(), Status::Ignored, RollbackAction::Delete).unwrap();

    let imported_before = map.imported_count().unwrap();
    let flagged = map.prepare_update().unwrap();

    assert_eq!(flagged, imported_before);
    assert_eq!(map.update_count().unwrap(), imported_before);
    assert_eq!(map.imported_count().unwrap(), 0);
    assert_eq!(map.error_count().unwrap(), 1);
    assert_eq!(map.ignored_count().unwrap(), 1);
    assert_eq!(map.processed_count().unwrap(), 4);
}

#[test]
fn test_rows_needing_update_in_batches() {
    let map = node_map();
    for nid in 1..=5 {
        map.save_id_mapping(nid, format!("n-{}", nid), Status::Imported, RollbackAction::Delete)
            .unwrap();
    }
    map.prepare_update().unwrap();

    let mut seen = Vec::new();
    loop {
        let batch = map.get_rows_needing_update(2).unwrap();
        if batch.is_empty() {
            break;
        }
        assert!(batch.len() <= 2);
        for row in batch {
            seen.push(row.source.clone());
            // Re-processing a row writes it back as imported.
            let destination = row.destination.clone().unwrap_or_else(|| IdTuple::new(vec![]));
            map.save_id_mapping(&row.source, destination, Status::Imported, RollbackAction::Delete)
                .unwrap();
        }
    }

    let expected: Vec<_> = (1..=5).map(|i| IdTuple::new(vec![IdValue::Integer(i)])).collect();
    assert_eq!(seen, expected);
    assert_eq!(map.update_count().unwrap(), 0);
}

#[test]
fn test_delete_messages_only_keeps_row() {
    let map = node_map();
    map.save_id_mapping(5, "n-5", Status::Imported, RollbackAction::Delete).unwrap();
    map.save_message(5, "field X missing", Default::default()).unwrap();

    map.delete(5, true).unwrap();
    assert!(map.get_row_by_source(5).unwrap().is_some());
    assert_eq!(map.get_message_iterator(Some(5.into()), None).unwrap().count(), 0);

    map.save_message(5, "again", Default::default()).unwrap();
    map.delete(5, false).unwrap();
    assert!(map.get_row_by_source(5).unwrap().is_none());
    assert_eq!(map.message_count().unwrap(), 0);
}

#[test]
fn test_delete_destination() {
    let map = node_map();
    map.save_id_mapping(1, "shared", Status::Imported, RollbackAction::Delete).unwrap();
    map.save_id_mapping(2, "shared", Status::Imported, RollbackAction::Delete).unwrap();
    map.save_id_mapping(3, "other", Status::Imported, RollbackAction::Delete).unwrap();
    map.save_message(1, "note", Default::default()).unwrap();
    map.save_message(3, "note", Default::default()).unwrap();

    map.delete_destination("shared").unwrap();

    assert_eq!(map.processed_count().unwrap(), 1);
    assert!(map.get_row_by_source(3).unwrap().is_some());
    assert_eq!(map.message_count().unwrap(), 1);

    // Unknown destination is a no-op.
    map.delete_destination("missing").unwrap();
    assert_eq!(map.processed_count().unwrap(), 1);
}

#[test]
fn test_destroy_drops_everything() {
    let map = node_map();
    map.save_id_mapping(1, "n-1", Status::Imported, RollbackAction::Delete).unwrap();
    map.save_message(1, "note", Default::default()).unwrap();

    map.destroy().unwrap();
    assert_eq!(map.processed_count().unwrap(), 0);
    assert_eq!(map.message_count().unwrap(), 0);

    // The store stays usable afterwards.
    map.save_id_mapping(1, "n-1", Status::Imported, RollbackAction::Delete).unwrap();
    assert_eq!(map.processed_count().unwrap(), 1);
}

#[test]
fn test_row_mapping_tracks_source_changes() {
    let map = node_map();

    let mut row = match json!({"nid": 5, "title": "Hello"}) {
        serde_json::Value::Object(fields) => SourceRow::new(fields),
        _ => unreachable!(),
    };
    row.rehash();
    map.save_row_mapping(&row, "n-5", Status::Imported, RollbackAction::Delete).unwrap();

    let stored = map.get_row_by_source(5).unwrap().unwrap();
    assert_eq!(stored.hash.as_deref(), row.hash());
    assert!(!row.changed(&stored));

    row.set("title", "Hello again");
    row.rehash();
    assert!(row.changed(&stored));
}

#[test]
fn test_source_ids_hash_is_stable() {
    let map = node_map();
    map.save_id_mapping(5, "n-5", Status::Imported, RollbackAction::Delete).unwrap();
    let first = map.get_row_by_source(5).unwrap().unwrap().source_ids_hash;
    map.save_id_mapping(5, "n-5", Status::Failed, RollbackAction::Delete).unwrap();
    let second = map.get_row_by_source(5).unwrap().unwrap().source_ids_hash;
    assert_eq!(first, second);
    assert_eq!(first.len(), 64);
}
