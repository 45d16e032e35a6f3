use chrono::{TimeZone, Utc};

use confsnap::models::snapshot::snapshot_id_at;
use confsnap::models::{ConcurrencyToken, Payload, Snapshot, SnapshotKind, SummaryFields};
use confsnap::persistence::SnapshotCodec;
use confsnap::AppError;

fn sample(payload: &[u8]) -> Snapshot {
    let created_at = Utc.with_ymd_and_hms(2026, 5, 6, 7, 8, 9).unwrap();
    Snapshot {
        id: snapshot_id_at(created_at),
        created_at,
        description: "before change\nwith a newline".into(),
        target_id: "web".into(),
        kind: SnapshotKind::Safety,
        payload: Payload::new(payload.to_vec()),
        concurrency_token_at_capture: ConcurrencyToken::new("etag-1"),
        summary_fields: SummaryFields::new().with("flag", 1_i64),
    }
}

fn is_validation(err: &AppError) -> bool {
    matches!(err, AppError::Validation(_))
}

#[test]
fn encoded_snapshot_decodes_identically() {
    // Binary payload containing newlines and invalid UTF-8.
    let snapshot = sample(b"line one\n\xff\xfe\nline three\n");
    let bytes = SnapshotCodec::encode(&snapshot).unwrap();
    assert!(bytes.starts_with(b"CONFSNAP/1\n"));
    assert_eq!(SnapshotCodec::decode(&bytes).unwrap(), snapshot);
}

#[test]
fn empty_payload_is_allowed() {
    let snapshot = sample(b"");
    let bytes = SnapshotCodec::encode(&snapshot).unwrap();
    assert!(SnapshotCodec::decode(&bytes).unwrap().payload.is_empty());
}

#[test]
fn altered_payload_fails_digest_check() {
    let mut bytes = SnapshotCodec::encode(&sample(br#"{"flag":1}"#)).unwrap();
    let last = bytes.len() - 2;
    bytes[last] = b'0';
    let err = SnapshotCodec::decode(&bytes).expect_err("digest mismatch");
    assert!(is_validation(&err));
    assert!(err.to_string().contains("digest"));
}

#[test]
fn truncated_payload_fails_length_check() {
    let mut bytes = SnapshotCodec::encode(&sample(br#"{"flag":1}"#)).unwrap();
    bytes.truncate(bytes.len() - 3);
    let err = SnapshotCodec::decode(&bytes).expect_err("truncated");
    assert!(is_validation(&err));
}

#[test]
fn foreign_or_future_blobs_are_rejected() {
    let bytes = SnapshotCodec::encode(&sample(b"{}")).unwrap();

    let mut future = b"CONFSNAP/2".to_vec();
    future.extend_from_slice(&bytes[b"CONFSNAP/1".len()..]);

    for blob in [
        b"".to_vec(),
        b"{\"not\":\"a snapshot\"}".to_vec(),
        b"PNG\n{}\n".to_vec(),
        future,
        b"CONFSNAP/1\n{broken header\npayload".to_vec(),
    ] {
        let err = SnapshotCodec::decode(&blob).expect_err("rejected");
        assert!(is_validation(&err), "{err}");
    }
}

#[test]
fn header_with_unsafe_target_is_rejected() {
    let mut snapshot = sample(b"{}");
    snapshot.target_id = "../escape".into();
    let bytes = SnapshotCodec::encode(&snapshot).unwrap();
    assert!(is_validation(
        &SnapshotCodec::decode(&bytes).expect_err("unsafe target")
    ));
}
