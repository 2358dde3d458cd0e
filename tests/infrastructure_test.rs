//! Test to verify test infrastructure works correctly

mod common;

use common::builders::{tagged_buffer, ControllerBuilder, SweepBuilder};
use vnasaver_rs::backend::ControllerState;
use vnasaver_rs::SweepMode;

#[test]
fn test_infrastructure_setup() {
    let sweep = SweepBuilder::new().range(1_000, 2_000).points(3).build();
    assert_eq!(sweep.mode, SweepMode::Single);
    assert!(sweep.validate().is_ok());

    let harness = ControllerBuilder::new().build();
    assert_eq!(harness.controller.state(), ControllerState::Idle);
    assert!(harness.factory.ops().is_empty());
    assert!(harness.output.path().exists());
}

#[test]
fn test_tagged_buffer() {
    let buffer = tagged_buffer(3, 4);
    assert_eq!(buffer.len(), 4);
    assert!(buffer.iter().all(|p| p.freq / 1_000_000 == 3));
}

#[test]
fn test_float_comparison() {
    common::assert_float_eq(1.0, 1.0000001, 0.001);
}

#[test]
#[should_panic]
fn test_float_comparison_fails() {
    common::assert_float_eq(1.0, 2.0, 0.001);
}
