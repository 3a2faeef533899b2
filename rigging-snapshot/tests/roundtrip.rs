//! `restore(capture(R))` leaves R byte-identical, whether or not R existed.

use std::fs;

use rigging_snapshot::{ConfigSnapshot, RestoreOutcome};
use tempfile::TempDir;

#[test]
fn round_trip_for_existing_binary_resource() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("client.keys");
    let original: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
    fs::write(&path, &original).expect("seed");

    let mut snap = ConfigSnapshot::capture(&path).expect("capture");
    snap.apply(b"001 agent any secret\n").expect("apply");
    snap.restore().expect("restore");

    assert_eq!(fs::read(&path).expect("read"), original);
}

#[test]
fn round_trip_for_absent_resource() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("etc").join("shared").join("ar.conf");

    let mut snap = ConfigSnapshot::capture(&path).expect("capture");
    snap.apply("restart-wazuh0 - restart-wazuh - 0\n").expect("apply");
    let outcome = snap.restore().expect("restore");

    assert_eq!(
        outcome,
        RestoreOutcome::Removed {
            path: path.clone()
        }
    );
    assert!(!path.exists());
}

#[test]
fn restore_without_apply_is_unchanged() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("ossec.conf");
    fs::write(&path, "<ossec_config/>\n").expect("seed");

    let snap = ConfigSnapshot::capture(&path).expect("capture");
    assert!(matches!(
        snap.restore().expect("restore"),
        RestoreOutcome::Unchanged { .. }
    ));
}

#[test]
fn restore_undoes_out_of_band_edits() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("ossec.conf");
    fs::write(&path, "before\n").expect("seed");

    let mut snap = ConfigSnapshot::capture(&path).expect("capture");
    snap.apply("during\n").expect("apply");
    // A daemon or test body rewrites the file behind the snapshot's back.
    fs::write(&path, "scribbled\n").expect("scribble");

    snap.restore().expect("restore");
    assert_eq!(fs::read_to_string(&path).expect("read"), "before\n");
}
