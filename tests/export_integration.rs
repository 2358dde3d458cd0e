//! Integration tests for Touchstone export
//!
//! These tests validate what ends up on disk:
//! - File naming from the update time
//! - 2-port files with synthesized cross parameters
//! - Fallback to 1-port when S21 is missing
//! - Files written by the exporter load back as references

mod common;

use chrono::NaiveDate;
use common::builders::tagged_buffer;
use vnasaver_rs::export::{touchstone::SYNTHESIZED_NOTE, ExportScheduler, PortCount, Touchstone};
use vnasaver_rs::store::MeasurementStore;

fn update_time() -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(3, 4, 5)
        .unwrap()
}

#[test]
fn test_file_name_from_update_time() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = ExportScheduler::new(dir.path(), PortCount::Two);

    let path = scheduler
        .export_on_update_at(&tagged_buffer(1, 5), &tagged_buffer(1, 5), update_time())
        .unwrap();

    assert_eq!(path.file_name().unwrap(), "20240102_030405.s2p");
    assert_eq!(path.parent().unwrap(), dir.path());
}

#[test]
fn test_two_port_contents() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = ExportScheduler::new(dir.path(), PortCount::Two);

    let path = scheduler
        .export_on_update_at(&tagged_buffer(3, 4), &tagged_buffer(4, 4), update_time())
        .unwrap();
    let text = std::fs::read_to_string(&path).unwrap();

    let mut lines = text.lines();
    assert_eq!(lines.next(), Some(format!("! {}", SYNTHESIZED_NOTE).as_str()));
    assert_eq!(lines.next(), Some("# HZ S RI R 50"));
    assert_eq!(lines.next(), Some("3000000 3 -3 4 -4 0 0 0 0"));
    assert_eq!(lines.count(), 3);
}

#[test]
fn test_one_port_fallback_without_s21() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = ExportScheduler::new(dir.path(), PortCount::Two);

    let path = scheduler
        .export_on_update_at(&tagged_buffer(1, 5), &[], update_time())
        .unwrap();

    assert_eq!(path.file_name().unwrap(), "20240102_030405.s1p");
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(!text.contains(SYNTHESIZED_NOTE));
    assert_eq!(text.lines().next(), Some("# HZ S RI R 50"));
}

#[test]
fn test_export_then_import_as_reference() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = ExportScheduler::new(dir.path(), PortCount::Two);
    let path = scheduler
        .export_on_update(&tagged_buffer(5, 8), &tagged_buffer(5, 8))
        .unwrap();

    let store = MeasurementStore::default();
    store.load_reference_file(&path).unwrap();

    let reference = store.reference();
    assert_eq!(reference.s11, tagged_buffer(5, 8));
    assert_eq!(reference.s21, tagged_buffer(5, 8));
    assert_eq!(Touchstone::load(&path).unwrap().ports(), 2);
}
