//! The voltage gate: mutating calls refuse to run while the bus is below
//! the level a flash program/erase needs to complete safely.

/// Reports whether the supply is currently healthy enough to program or
/// erase flash.
///
/// Modeled as a trait rather than a concrete ADC/comparator reading so the
/// store can be mounted against a simulator in tests as easily as against a
/// real board's brownout detector.
pub trait VoltageMonitor {
    /// `true` if a flash write or erase may proceed.
    fn bus_voltage_ok(&self) -> bool;
}

/// A monitor that always reports a healthy bus: the default for hosted
/// tests and demos, where there is no real brownout to model.
pub struct AlwaysOk;

impl VoltageMonitor for AlwaysOk {
    fn bus_voltage_ok(&self) -> bool {
        true
    }
}
