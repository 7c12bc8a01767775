//! Hardware drivers implementing the actuator and sensor contracts.

pub mod simulated;
pub mod soft_pwm;

pub use simulated::{ChamberOutput, ChamberProbe, ChamberRelay, SimulatedChamber};
pub use soft_pwm::SoftPwm;
