//! Error handling and edge case tests.

use std::sync::Arc;
use std::time::Duration;
use taillog::{
    keys, ClosePolicy, FileKv, FileKvConfig, KvStore, LocalBus, LogService, MemoryKv, NodeId,
    ReaderOptions, Sequence, ServiceConfig, StreamError, MAX_NODE_ID_LEN,
};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn service_with(config: ServiceConfig) -> (Arc<MemoryKv>, LocalBus, LogService) {
    init_tracing();
    let kv = Arc::new(MemoryKv::new());
    let bus = LocalBus::default();
    let service = LogService::new(kv.clone(), Arc::new(bus.clone()), config).unwrap();
    (kv, bus, service)
}

fn service() -> (Arc<MemoryKv>, LocalBus, LogService) {
    service_with(ServiceConfig::default())
}

// --- Registry Errors ---

#[test]
fn test_close_unknown_node() {
    let (_, _, service) = service();
    let result = service.close_node(&NodeId::from(12345));
    assert!(matches!(result, Err(StreamError::NotFound(_))));
}

#[test]
fn test_close_twice() {
    let (_, _, service) = service();
    let node = service.open_node().unwrap();
    service.close_node(&node).unwrap();
    assert!(matches!(
        service.close_node(&node),
        Err(StreamError::NotFound(_))
    ));
}

#[test]
fn test_identity_collision() {
    let (_, _, service) = service();
    let node = service.open_node_as(NodeId::from(7)).unwrap();
    assert!(matches!(
        service.open_node_as(node.clone()),
        Err(StreamError::AlreadyExists(_))
    ));
}

#[test]
fn test_identity_with_history_is_refused() {
    let (_, _, service) = service();
    let node = service.open_node_as(NodeId::from(8)).unwrap();
    service.append(&node, None, b"kept").unwrap();
    service.close_node(&node).unwrap();

    assert!(matches!(
        service.open_node_as(node),
        Err(StreamError::AlreadyExists(_))
    ));
}

#[test]
fn test_invalid_node_ids() {
    assert!(matches!(NodeId::new(""), Err(StreamError::InvalidNode(_))));
    assert!(matches!(NodeId::new("a.b"), Err(StreamError::InvalidNode(_))));
    assert!(matches!(NodeId::new("a b"), Err(StreamError::InvalidNode(_))));
}

#[test]
fn test_longest_identity_works_on_disk() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let service = LogService::open_local(
        FileKvConfig {
            path: dir.path().join("log"),
            create_if_missing: true,
        },
        ServiceConfig::default(),
    )
    .unwrap();

    assert!(matches!(
        NodeId::new("n".repeat(130)),
        Err(StreamError::InvalidNode(_))
    ));

    let node = service
        .open_node_as(NodeId::new("n".repeat(MAX_NODE_ID_LEN)).unwrap())
        .unwrap();
    assert_eq!(service.append(&node, None, b"fits").unwrap(), Sequence(1));
    assert!(service.list_open().unwrap().contains(&node));
    service.close_node(&node).unwrap();
}

// --- Append Errors ---

#[test]
fn test_payload_too_large() {
    let (kv, _, service) = service_with(ServiceConfig {
        max_payload_bytes: 8,
        ..Default::default()
    });
    let node = service.open_node().unwrap();

    let result = service.append(&node, None, &[0u8; 9]);
    assert!(matches!(
        result,
        Err(StreamError::PayloadTooLarge { size: 9, limit: 8 })
    ));
    // Nothing claimed, nothing stored.
    assert_eq!(service.current_sequence(&node).unwrap(), Some(Sequence::ZERO));
    assert!(kv.keys(&keys::data_prefix(&node)).unwrap().is_empty());

    assert_eq!(service.append(&node, None, &[0u8; 8]).unwrap(), Sequence(1));
}

#[test]
fn test_terminal_close_policy() {
    let (_, _, service) = service_with(ServiceConfig {
        close_policy: ClosePolicy::Terminal,
        ..Default::default()
    });
    let node = service.open_node().unwrap();
    service.append(&node, None, b"a").unwrap();
    service.append_close(&node, Some("done")).unwrap();

    assert!(matches!(
        service.append(&node, None, b"b"),
        Err(StreamError::NodeClosed(_))
    ));
    assert_eq!(service.current_sequence(&node).unwrap(), Some(Sequence(2)));
}

#[test]
fn test_advisory_close_policy() {
    let (_, _, service) = service();
    let node = service.open_node().unwrap();
    service.append_close(&node, Some("done")).unwrap();
    assert_eq!(service.append(&node, None, b"more").unwrap(), Sequence(2));
}

#[test]
fn test_append_survives_bus_shutdown() {
    let (_, bus, service) = service();
    let node = service.open_node().unwrap();
    bus.shutdown();

    assert_eq!(service.append(&node, None, b"quiet").unwrap(), Sequence(1));
    assert!(service.get_record(&node, Sequence(1)).unwrap().is_some());
}

// --- Reader Errors ---

#[test]
fn test_stream_from_sequence_zero() {
    let (_, _, service) = service();
    let node = service.open_node().unwrap();
    let result = service.stream(&node, ReaderOptions::from_sequence(Sequence::ZERO));
    assert!(matches!(result, Err(StreamError::InvalidSequence(_))));
}

#[test]
fn test_stream_without_bus() {
    let (_, bus, service) = service();
    let node = service.open_node().unwrap();
    bus.shutdown();

    assert!(matches!(
        service.stream(&node, ReaderOptions::default()),
        Err(StreamError::BusUnavailable(_))
    ));
}

#[test]
fn test_bus_loss_ends_stream_after_known_records() {
    let (_, bus, service) = service();
    let node = service.open_node().unwrap();
    service.append(&node, None, b"a").unwrap();
    service.append(&node, None, b"b").unwrap();

    let mut stream = service.stream(&node, ReaderOptions::default()).unwrap();
    bus.shutdown();

    assert_eq!(
        stream.next_frame(Some(Duration::from_secs(1))).unwrap().unwrap().sequence,
        Sequence(1)
    );
    assert_eq!(
        stream.next_frame(Some(Duration::from_secs(1))).unwrap().unwrap().sequence,
        Sequence(2)
    );
    assert!(matches!(
        stream.next_frame(Some(Duration::from_secs(1))),
        Err(StreamError::SubscriptionClosed(_))
    ));
    assert!(matches!(
        stream.next_frame(None),
        Err(StreamError::EndOfStream)
    ));
}

#[test]
fn test_cancel_wakes_blocked_reader() {
    let (_, _, service) = service();
    let node = service.open_node().unwrap();
    let mut stream = service.stream(&node, ReaderOptions::default()).unwrap();
    let cancel = stream.cancel_handle();

    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        cancel.cancel();
    });

    assert!(matches!(stream.next_frame(None), Err(StreamError::Cancelled)));
    canceller.join().unwrap();
}

#[test]
fn test_corrupt_record_is_skipped() {
    let (kv, _, service) = service();
    let node = service.open_node().unwrap();
    service.append(&node, None, b"a").unwrap();
    service.append(&node, None, b"b").unwrap();
    service.append(&node, None, b"c").unwrap();
    kv.put(&keys::data_key(&node, Sequence(2)), b"{not json").unwrap();

    let mut stream = service.stream(&node, ReaderOptions::default()).unwrap();
    let seqs: Vec<u64> = (0..2)
        .map(|_| {
            stream
                .next_frame(Some(Duration::from_secs(1)))
                .unwrap()
                .unwrap()
                .sequence
                .0
        })
        .collect();
    assert_eq!(seqs, vec![1, 3]);
}

#[test]
fn test_missing_record_is_skipped_after_gap_timeout() {
    let (kv, _, service) = service_with(ServiceConfig {
        gap_timeout: Duration::from_millis(50),
        ..Default::default()
    });
    let node = service.open_node().unwrap();
    service.append(&node, None, b"a").unwrap();
    service.append(&node, None, b"b").unwrap();
    service.append(&node, None, b"c").unwrap();
    kv.delete(&keys::data_key(&node, Sequence(2))).unwrap();

    let mut stream = service.stream(&node, ReaderOptions::default()).unwrap();
    let first = stream.next_frame(Some(Duration::from_secs(1))).unwrap().unwrap();
    let second = stream.next_frame(Some(Duration::from_secs(1))).unwrap().unwrap();
    assert_eq!(first.sequence, Sequence(1));
    assert_eq!(second.sequence, Sequence(3));
}

// --- Store Errors ---

#[test]
fn test_store_locked_by_another_process() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = FileKvConfig {
        path: dir.path().join("log"),
        create_if_missing: true,
    };

    let _held = FileKv::open_or_create(config.clone()).unwrap();
    assert!(matches!(
        LogService::open_local(config, ServiceConfig::default()),
        Err(StreamError::Locked)
    ));
}

#[test]
fn test_open_missing_store_without_create() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let result = LogService::open_local(
        FileKvConfig {
            path: dir.path().join("absent"),
            create_if_missing: false,
        },
        ServiceConfig::default(),
    );
    assert!(result.is_err());
}

#[test]
fn test_invalid_config_from_env() {
    let result = ServiceConfig::from_vars([("TAILLOG_CLOSE_POLICY", "sometimes")]);
    assert!(matches!(result, Err(StreamError::Config(_))));
}
