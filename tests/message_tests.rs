//! Integration tests for the message log

use migrate_idmap::{
    IdInput, IdMapConfig, IdMapError, IdMapStore, IdType, IdValue, MessageEntry, MessageLevel,
    Result, RollbackAction, Status,
};

fn node_map() -> IdMapStore {
    IdMapStore::open(
        IdMapConfig::new("d7_node")
            .source_id("nid", IdType::Integer)
            .source_id("language", IdType::Text)
            .destination_id("id", IdType::Integer),
    )
    .unwrap()
}

fn src(nid: i64, language: &str) -> IdInput {
    IdInput::list([IdValue::from(nid), IdValue::from(language)])
}

fn collect(map: &IdMapStore, source: Option<IdInput>, level: Option<MessageLevel>) -> Vec<MessageEntry> {
    map.get_message_iterator(source, level)
        .unwrap()
        .collect::<Result<Vec<_>>>()
        .unwrap()
}

#[test]
fn test_messages_are_appended() {
    let map = node_map();
    map.save_message(src(5, "en"), "field X missing", MessageLevel::Error).unwrap();
    map.save_message(src(5, "en"), "field X missing", MessageLevel::Error).unwrap();

    assert_eq!(map.message_count().unwrap(), 2);
    let entries = collect(&map, Some(src(5, "en")), None);
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.message == "field X missing"));
    assert!(entries[0].id < entries[1].id);
}

#[test]
fn test_filter_by_source_prefix_and_level() {
    let map = node_map();
    map.save_message(src(1, "en"), "a", MessageLevel::Error).unwrap();
    map.save_message(src(1, "fr"), "b", MessageLevel::Warning).unwrap();
    map.save_message(src(2, "en"), "c", MessageLevel::Notice).unwrap();
    map.save_message(src(1, "en"), "d", MessageLevel::Informational).unwrap();

    assert_eq!(collect(&map, None, None).len(), 4);

    let nid_one = collect(&map, Some(IdInput::named([("nid", 1)])), None);
    let texts: Vec<_> = nid_one.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(texts, vec!["a", "b", "d"]);

    let errors = collect(&map, None, Some(MessageLevel::Error));
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, "a");

    let combined = collect(&map, Some(src(1, "en")), Some(MessageLevel::Informational));
    assert_eq!(combined.len(), 1);
    assert_eq!(combined[0].message, "d");

    // An empty filter means no filter.
    assert_eq!(collect(&map, Some(IdInput::empty()), None).len(), 4);
}

#[test]
fn test_iterator_is_restartable_and_lazy() {
    let map = node_map();
    map.save_message(src(1, "en"), "first", MessageLevel::Error).unwrap();

    let mut iter = map.get_message_iterator(None, None).unwrap();
    assert_eq!(iter.next().unwrap().unwrap().message, "first");

    // Entries appended while iterating are picked up.
    map.save_message(src(1, "en"), "second", MessageLevel::Error).unwrap();
    assert_eq!(iter.next().unwrap().unwrap().message, "second");
    assert!(iter.next().is_none());
    assert!(iter.next().is_none());

    // A new iterator starts from the beginning.
    assert_eq!(collect(&map, None, None).len(), 2);
}

#[test]
fn test_invalid_filter_is_rejected() {
    let map = node_map();
    let err = map
        .get_message_iterator(Some(IdInput::named([("language", "en")])), None)
        .err()
        .unwrap();
    assert!(matches!(err, IdMapError::InvalidIdentifier(_)));
}

#[test]
fn test_clear_messages_keeps_map_rows() {
    let map = node_map();
    map.save_id_mapping(src(1, "en"), 10, Status::Failed, RollbackAction::Delete).unwrap();
    map.save_message(src(1, "en"), "boom", MessageLevel::Error).unwrap();

    map.clear_messages().unwrap();
    assert_eq!(map.message_count().unwrap(), 0);
    assert_eq!(map.processed_count().unwrap(), 1);
    assert_eq!(map.error_count().unwrap(), 1);
}

#[test]
fn test_failure_is_data() {
    let map = node_map();

    // A row that could not be written is recorded, not raised.
    map.save_id_mapping(src(3, "en"), IdInput::empty(), Status::Failed, RollbackAction::Delete).unwrap();
    map.save_message(src(3, "en"), "destination rejected the title", MessageLevel::Error).unwrap();
    map.save_id_mapping(src(4, "en"), 40, Status::Imported, RollbackAction::Delete).unwrap();

    assert_eq!(map.processed_count().unwrap(), 2);
    assert_eq!(map.imported_count().unwrap(), 1);
    assert_eq!(map.error_count().unwrap(), 1);
    assert_eq!(collect(&map, Some(src(3, "en")), Some(MessageLevel::Error)).len(), 1);
}
