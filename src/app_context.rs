//! Application state shared by the daemon's services.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;
use tokio::sync::RwLockReadGuard;

use crate::{
    actuators::RelayFan,
    config::{Config, ConfigManager},
    controller::{ControllerSettings, DehydratorController, Hardware},
    drivers::{ChamberOutput, SimulatedChamber, SoftPwm},
    event::EventBus,
    sensors::TemperatureSensor,
};

/// Shared application state: configuration and the controller driving the
/// chamber.
pub struct AppState {
    /// Configuration manager for centralized config handling
    pub config_manager: Arc<ConfigManager>,
    pub controller: DehydratorController,
    /// Probe the status report reads, the same one the controller regulates on
    pub sensor: Arc<dyn TemperatureSensor>,
}

impl AppState {
    /// Builds the state around a simulated chamber described by the
    /// `simulation` section: heater relay behind a software PWM, fan relay and
    /// probe.
    pub async fn new(config_manager: ConfigManager, event_bus: EventBus) -> Result<Self> {
        let simulation = config_manager.get().await.simulation;
        let chamber = SimulatedChamber::new(simulation);
        info!(
            "Simulated chamber at {:.1}°C, ambient {:.1}°C",
            chamber.temperature(),
            simulation.ambient_temperature
        );

        let hardware = Hardware {
            sensor: Arc::new(chamber.probe()),
            heater: Arc::new(SoftPwm::new(chamber.relay(ChamberOutput::Heater))),
            fan: Arc::new(RelayFan::new(chamber.relay(ChamberOutput::Fan))),
        };
        Self::with_hardware(config_manager, hardware, event_bus).await
    }

    /// Builds the state around the given peripherals, regulated by a standard
    /// PID controller tuned from the `control` section.
    pub async fn with_hardware(
        config_manager: ConfigManager,
        hardware: Hardware,
        event_bus: EventBus,
    ) -> Result<Self> {
        let settings = ControllerSettings::from(&config_manager.get().await.control);
        let sensor = hardware.sensor.clone();
        if let Some(name) = sensor.sensor_name() {
            info!("Regulating on {name}");
        }
        let controller = DehydratorController::with_standard_pid(hardware, settings, event_bus)
            .context("Invalid control settings")?;

        Ok(Self {
            config_manager: Arc::new(config_manager),
            controller,
            sensor,
        })
    }

    /// Gets a read-only reference to the current configuration.
    pub async fn config(&self) -> RwLockReadGuard<'_, Config> {
        self.config_manager.get().await
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }
}
