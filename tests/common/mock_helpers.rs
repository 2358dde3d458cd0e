//! Mock construction helpers

use std::sync::Arc;
use std::time::Duration;
use vnasaver_rs::backend::{
    DeviceSessionManager, SimulatedDriver, SimulatedTransportFactory, TransportOp,
};

/// Session manager over simulated hardware, with no settle delay
pub fn simulated_manager() -> (DeviceSessionManager, SimulatedTransportFactory, SimulatedDriver) {
    let factory = SimulatedTransportFactory::new();
    let driver = SimulatedDriver::new();
    let manager = DeviceSessionManager::new(Arc::new(factory.clone()), Arc::new(driver.clone()))
        .with_settle_delay(Duration::ZERO);
    (manager, factory, driver)
}

/// Count occurrences of an operation in a transport log
pub fn count_ops(ops: &[TransportOp], op: TransportOp) -> usize {
    ops.iter().filter(|&&o| o == op).count()
}
