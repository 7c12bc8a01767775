//! Error taxonomy of the dehydrator controller.

use thiserror::Error;

/// Errors raised by the controller core.
///
/// Command faults are returned synchronously from `start`/`stop`; faults hit
/// by background tasks are published as [`Event::RegulationFault`].
///
/// [`Event::RegulationFault`]: crate::event::Event::RegulationFault
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    /// The sensor could not be read or returned a non-finite value.
    #[error("sensor fault: {0}")]
    SensorFault(String),

    /// The heater or fan rejected a command.
    #[error("actuator fault: {0}")]
    ActuatorFault(String),

    /// `start` was called while a run is already active.
    #[error("controller is already running")]
    AlreadyRunning,

    /// A run duration could not be represented.
    #[error("invalid run duration: {0}")]
    InvalidDuration(String),

    /// Construction-time settings the regulation loop cannot run with.
    #[error("invalid controller settings: {0}")]
    InvalidSettings(String),

    /// The regulation task panicked; heating was stopped.
    #[error("regulation task panicked: {0}")]
    RegulationPanicked(String),
}

impl ControllerError {
    pub(crate) fn actuator(action: &str, err: anyhow::Error) -> Self {
        Self::ActuatorFault(format!("{action}: {err:#}"))
    }

    pub(crate) fn sensor(err: anyhow::Error) -> Self {
        Self::SensorFault(format!("{err:#}"))
    }
}

pub type ControllerResult<T> = std::result::Result<T, ControllerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use pretty_assertions::assert_eq;

    #[test]
    fn actuator_fault_keeps_action_and_cause() {
        let err = ControllerError::actuator("heater start", anyhow!("relay stuck"));
        assert_eq!(err.to_string(), "actuator fault: heater start: relay stuck");
    }

    #[test]
    fn sensor_fault_includes_context_chain() {
        let err = ControllerError::sensor(anyhow!("adc timeout").context("probe read"));
        assert_eq!(err.to_string(), "sensor fault: probe read: adc timeout");
    }

    #[test]
    fn settings_errors_name_the_field() {
        let err = ControllerError::InvalidSettings("poll_interval must be non-zero".into());
        assert_eq!(
            err.to_string(),
            "invalid controller settings: poll_interval must be non-zero"
        );
    }
}
