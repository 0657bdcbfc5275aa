//! Cross-component scenarios from the validator's testable-properties
//! list, exercised against the public API the way a caller embedding
//! this crate would use it (as opposed to the unit tests in `lib.rs`,
//! which poke at internals through test doubles).

use {
    fileguard_core::{Limits, Validator},
    std::path::Path,
};

fn write(dir: &Path, name: &str, contents: &[u8]) -> std::path::PathBuf
{
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn record_then_verify_matches_the_literal_scenario_from_the_spec()
{
    let hash_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let target = write(target_dir.path(), "test.txt", b"test content");
    let resolved = target.canonicalize().unwrap().display().to_string();

    let validator = Validator::new(hash_dir.path()).unwrap();
    let record_path = validator.record(&target, false).unwrap();

    assert_eq!(record_path, hash_dir.path().join(fileguard_codec::encode(&resolved).unwrap()));

    validator.verify(&target).unwrap();
}

#[test]
fn a_modified_file_fails_verification()
{
    let hash_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let target = write(target_dir.path(), "test.txt", b"test content");

    let validator = Validator::new(hash_dir.path()).unwrap();
    validator.record(&target, false).unwrap();

    std::fs::write(&target, b"modified").unwrap();

    let err = validator.verify(&target).unwrap_err();
    assert!(matches!(err, fileguard_core::Error::Mismatch { .. }));
}

#[test]
fn verify_and_read_is_the_only_source_of_truth_for_the_bytes_it_checked()
{
    let hash_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let target = write(target_dir.path(), "test.txt", b"atomic read content");

    let validator = Validator::new(hash_dir.path()).unwrap();
    validator.record(&target, false).unwrap();

    let bytes = validator.verify_and_read(&target).unwrap();
    assert_eq!(bytes, b"atomic read content");

    // A second, independent read of the file agrees with what was
    // returned, confirming no divergence snuck in between hash and
    // return.
    assert_eq!(std::fs::read(&target).unwrap(), bytes);
}

#[test]
fn schema_version_mismatch_leaves_the_record_bit_identical()
{
    let hash_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let target = write(target_dir.path(), "test.txt", b"content");
    let resolved = target.canonicalize().unwrap().display().to_string();

    let validator = Validator::new(hash_dir.path()).unwrap();
    let record_path = hash_dir.path().join(fileguard_codec::encode(&resolved).unwrap());

    let stale = serde_json::json!({
        "schema_version": 999,
        "file_path": resolved,
        "content_hash": "sha256:deadbeef",
        "updated_at": chrono::Utc::now().to_rfc3339(),
    });
    std::fs::write(&record_path, serde_json::to_vec_pretty(&stale).unwrap()).unwrap();
    let before = std::fs::read(&record_path).unwrap();

    let err = validator.verify(&target).unwrap_err();
    assert!(matches!(
        err,
        fileguard_core::Error::SchemaVersionMismatch { expected: 1, actual: 999, .. },
    ));

    let after = std::fs::read(&record_path).unwrap();
    assert_eq!(before, after);
}

#[test]
fn a_large_file_at_exactly_the_cap_is_accepted_one_byte_over_is_not()
{
    let hash_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();

    let at_cap = write(target_dir.path(), "at-cap.bin", &vec![0x42; 64]);
    let validator = Validator::with_limits(
        hash_dir.path(), Limits { max_file_size: 64 },
    ).unwrap();
    validator.record(&at_cap, false).unwrap();
    validator.verify(&at_cap).unwrap();

    let over_cap = write(target_dir.path(), "over-cap.bin", &vec![0x42; 65]);
    let err = validator.record(&over_cap, false).unwrap_err();
    assert!(matches!(err, fileguard_core::Error::TooLarge(_)));
}

#[test]
fn extended_analysis_survives_a_content_hash_update()
{
    let hash_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    let target = write(target_dir.path(), "test.txt", b"content");
    let resolved = target.canonicalize().unwrap().display().to_string();

    let validator = Validator::new(hash_dir.path()).unwrap();
    validator.record(&target, false).unwrap();

    let store = fileguard_store::Store::new(hash_dir.path()).unwrap();
    store.update(&resolved, |record| {
        record.syscall_analysis = Some(serde_json::json!({"syscalls": ["open", "read"]}));
    }).unwrap();

    std::fs::write(&target, b"new content").unwrap();
    validator.record(&target, true).unwrap();

    let after = store.load(&resolved).unwrap();
    assert_eq!(
        after.syscall_analysis,
        Some(serde_json::json!({"syscalls": ["open", "read"]})),
    );
}
