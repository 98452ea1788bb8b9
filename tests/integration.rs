//! Integration tests for the node log.

use std::time::Duration;
use taillog::{
    keys, EnvelopeFormat, FileKvConfig, Frame, KvStore, LogService, NodeId, Phase, ReaderOptions,
    Sequence, ServiceConfig, TailStream,
};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn memory_service() -> LogService {
    init_tracing();
    LogService::in_memory(ServiceConfig::default()).unwrap()
}

fn local_service(dir: &TempDir) -> LogService {
    init_tracing();
    LogService::open_local(
        FileKvConfig {
            path: dir.path().join("log"),
            create_if_missing: true,
        },
        ServiceConfig::default(),
    )
    .unwrap()
}

fn next(stream: &mut TailStream) -> Frame {
    stream
        .next_frame(Some(Duration::from_secs(2)))
        .unwrap()
        .expect("frame within timeout")
}

// --- Realistic Workflow Tests ---

#[test]
fn test_hello_done_scenario() {
    let service = memory_service();
    let node = service.open_node_as(NodeId::from(7)).unwrap();
    assert_eq!(node.as_str(), "7");

    let seq = service.append(&node, Some("text/plain"), b"hello").unwrap();
    assert_eq!(seq, Sequence(1));

    // The stored record carries the payload hex-encoded.
    let raw = service.kv().get(&keys::data_key(&node, seq)).unwrap().unwrap();
    let json: serde_json::Value = serde_json::from_slice(&raw.value).unwrap();
    assert_eq!(json["payload"], hex::encode("hello"));
    assert_eq!(json["metadata"]["Content-Type"], "text/plain");

    let close = service.append_close(&node, Some("done")).unwrap();
    assert_eq!(close, Sequence(2));

    let mut stream = service.stream(&node, ReaderOptions::default()).unwrap();

    let first = next(&mut stream);
    assert_eq!(first.sequence, Sequence(1));
    assert_eq!(first.payload_bytes(), b"hello");
    assert_eq!(first.metadata.content_type.as_deref(), Some("text/plain"));

    let second = next(&mut stream);
    assert_eq!(second.sequence, Sequence(2));
    assert!(second.is_close());
    assert!(second.payload_bytes().is_empty());
    assert_eq!(second.metadata.reason.as_deref(), Some("done"));

    // Nothing more: the stream blocks.
    assert!(stream
        .next_frame(Some(Duration::from_millis(100)))
        .unwrap()
        .is_none());
    assert_eq!(stream.phase(), Phase::Tailing);
}

#[test]
fn test_k_appends_leave_no_gaps() {
    let service = memory_service();
    let node = service.open_node().unwrap();

    for i in 0..20u8 {
        if i % 7 == 6 {
            service.append_close(&node, None).unwrap();
        } else {
            service.append(&node, None, &[i]).unwrap();
        }
    }

    assert_eq!(service.current_sequence(&node).unwrap(), Some(Sequence(20)));
    for seq in 1..=20 {
        assert!(service.get_record(&node, Sequence(seq)).unwrap().is_some());
    }
    assert!(service.get_record(&node, Sequence(21)).unwrap().is_none());
}

#[test]
fn test_rereads_are_byte_identical() {
    let dir = TempDir::new().unwrap();
    let service = local_service(&dir);
    let node = service.open_node().unwrap();
    service.append(&node, Some("application/json"), br#"{"a":1}"#).unwrap();

    let key = keys::data_key(&node, Sequence(1));
    let first = service.kv().get(&key).unwrap().unwrap();
    let second = service.kv().get(&key).unwrap().unwrap();
    assert_eq!(first.value, second.value);
    assert_eq!(first.revision, second.revision);
}

#[test]
fn test_list_open_tracks_open_and_close() {
    let service = memory_service();
    let a = service.open_node().unwrap();
    let b = service.open_node().unwrap();

    let open = service.list_open().unwrap();
    assert!(open.contains(&a));
    assert!(open.contains(&b));

    service.close_node(&a).unwrap();
    let open = service.list_open().unwrap();
    assert!(!open.contains(&a));
    assert!(open.contains(&b));
    assert!(!service.is_open(&a).unwrap());
}

#[test]
fn test_closed_node_history_still_replays() {
    let service = memory_service();
    let node = service.open_node().unwrap();
    service.append(&node, None, b"one").unwrap();
    service.append(&node, None, b"two").unwrap();
    service.close_node(&node).unwrap();

    let mut stream = service.stream(&node, ReaderOptions::default()).unwrap();
    assert_eq!(stream.replay_bound(), Sequence(2));
    assert_eq!(next(&mut stream).payload_bytes(), b"one");
    assert_eq!(next(&mut stream).payload_bytes(), b"two");
}

#[test]
fn test_start_from_sequence_and_live() {
    let service = memory_service();
    let node = service.open_node().unwrap();
    for i in 1..=5u8 {
        service.append(&node, None, &[i]).unwrap();
    }

    let mut from_four = service
        .stream(&node, ReaderOptions::from_sequence(Sequence(4)))
        .unwrap();
    assert_eq!(next(&mut from_four).sequence, Sequence(4));
    assert_eq!(next(&mut from_four).sequence, Sequence(5));

    let mut live = service.stream(&node, ReaderOptions::live()).unwrap();
    assert!(live.next_frame(Some(Duration::from_millis(50))).unwrap().is_none());
    service.append(&node, None, b"new").unwrap();
    assert_eq!(next(&mut live).sequence, Sequence(6));
}

#[test]
fn test_end_at_close_finishes_iterator() {
    let service = memory_service();
    let node = service.open_node().unwrap();
    service.append(&node, None, b"a").unwrap();
    service.append_close(&node, Some("bye")).unwrap();

    let stream = service
        .stream(&node, ReaderOptions::default().with_end_at_close(true))
        .unwrap();
    let frames: Vec<Frame> = stream.map(|f| f.unwrap()).collect();

    assert_eq!(frames.len(), 2);
    assert!(frames[1].is_close());
}

#[test]
fn test_frames_encode_for_the_wire() {
    let service = memory_service();
    let node = service.open_node().unwrap();
    service.append(&node, Some("text/plain"), b"wire").unwrap();

    let mut stream = service.stream(&node, ReaderOptions::default()).unwrap();
    let frame = next(&mut stream);

    for format in [EnvelopeFormat::Json, EnvelopeFormat::Msgpack] {
        let bytes = frame.encode(format).unwrap();
        let decoded = Frame::decode(&bytes, format).unwrap();
        assert_eq!(decoded, frame);
    }
}

#[test]
fn test_spawned_session_delivers_history_and_live() {
    let service = memory_service();
    let node = service.open_node().unwrap();
    service.append(&node, None, b"old").unwrap();

    let session = service.spawn_stream(&node, ReaderOptions::default()).unwrap();
    let old = session.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
    assert_eq!(old.payload_bytes(), b"old");

    service.append(&node, None, b"new").unwrap();
    let new = session.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
    assert_eq!(new.sequence, Sequence(2));
    assert_eq!(new.payload_bytes(), b"new");

    session.close();
}

// --- Persistence Tests ---

#[test]
fn test_log_survives_reopen() {
    let dir = TempDir::new().unwrap();

    let node = {
        let service = local_service(&dir);
        let node = service.open_node().unwrap();
        service.append(&node, Some("text/plain"), b"first").unwrap();
        service.append_close(&node, Some("shutdown")).unwrap();
        node
    };

    let service = local_service(&dir);
    assert!(service.is_open(&node).unwrap());
    assert_eq!(service.append(&node, None, b"after").unwrap(), Sequence(3));

    let mut stream = service.stream(&node, ReaderOptions::default()).unwrap();
    assert_eq!(next(&mut stream).payload_bytes(), b"first");
    let close = next(&mut stream);
    assert_eq!(close.metadata.reason.as_deref(), Some("shutdown"));
    assert_eq!(next(&mut stream).payload_bytes(), b"after");
}
