//! Simulated drying chamber for running the daemon without hardware.
//!
//! The chamber is a first-order thermal model: the heater adds a constant
//! power while its relay is closed and the chamber loses heat towards ambient
//! proportionally to the temperature difference, faster while the fan is on.
//! Between relay changes the model is advanced with the exact exponential
//! solution, so the result does not depend on how often it is sampled.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Instant;

use crate::{actuators::Relay, config::SimulationCfg, sensors::TemperatureSensor};

#[derive(Debug)]
struct ChamberModel {
    params: SimulationCfg,
    temperature: f64,
    heater_on: bool,
    fan_on: bool,
    updated_at: Instant,
}

impl ChamberModel {
    fn advance(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.updated_at).as_secs_f64();
        self.updated_at = now;
        if dt == 0.0 {
            return;
        }

        let ambient = f64::from(self.params.ambient_temperature);
        let loss = f64::from(if self.fan_on {
            self.params.fan_heat_loss
        } else {
            self.params.heat_loss
        });
        let power = if self.heater_on {
            f64::from(self.params.heater_power)
        } else {
            0.0
        };

        let equilibrium = ambient + power / loss;
        self.temperature = equilibrium + (self.temperature - equilibrium) * (-loss * dt).exp();
    }
}

/// Which relay of the chamber a [`ChamberRelay`] switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChamberOutput {
    Heater,
    Fan,
}

/// Shared handle to a simulated chamber.
#[derive(Debug, Clone)]
pub struct SimulatedChamber {
    model: Arc<Mutex<ChamberModel>>,
}

impl SimulatedChamber {
    pub fn new(params: SimulationCfg) -> Self {
        let temperature = params
            .initial_temperature
            .unwrap_or(params.ambient_temperature);
        Self {
            model: Arc::new(Mutex::new(ChamberModel {
                params,
                temperature: f64::from(temperature),
                heater_on: false,
                fan_on: false,
                updated_at: Instant::now(),
            })),
        }
    }

    fn model(&self) -> MutexGuard<'_, ChamberModel> {
        let mut model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
        model.advance(Instant::now());
        model
    }

    /// True chamber temperature, without sensor noise.
    pub fn temperature(&self) -> f32 {
        self.model().temperature as f32
    }

    pub fn relay(&self, output: ChamberOutput) -> ChamberRelay {
        ChamberRelay {
            chamber: self.clone(),
            output,
        }
    }

    pub fn probe(&self) -> ChamberProbe {
        ChamberProbe {
            chamber: self.clone(),
        }
    }
}

/// Heater or fan relay of a [`SimulatedChamber`].
#[derive(Debug, Clone)]
pub struct ChamberRelay {
    chamber: SimulatedChamber,
    output: ChamberOutput,
}

#[async_trait]
impl Relay for ChamberRelay {
    async fn set_on(&self, on: bool) -> Result<()> {
        let mut model = self.chamber.model();
        match self.output {
            ChamberOutput::Heater => model.heater_on = on,
            ChamberOutput::Fan => model.fan_on = on,
        }
        Ok(())
    }

    async fn is_on(&self) -> Result<bool> {
        let model = self.chamber.model();
        Ok(match self.output {
            ChamberOutput::Heater => model.heater_on,
            ChamberOutput::Fan => model.fan_on,
        })
    }
}

/// Temperature probe of a [`SimulatedChamber`], with uniform noise of
/// `sensor_noise` degrees.
#[derive(Debug, Clone)]
pub struct ChamberProbe {
    chamber: SimulatedChamber,
}

#[async_trait]
impl TemperatureSensor for ChamberProbe {
    async fn read_temperature(&self) -> Result<f32> {
        let (temperature, noise) = {
            let model = self.chamber.model();
            (model.temperature as f32, model.params.sensor_noise)
        };
        if noise > 0.0 {
            Ok(temperature + rand::random_range(-noise..=noise))
        } else {
            Ok(temperature)
        }
    }

    fn sensor_name(&self) -> Option<String> {
        Some("simulated chamber probe".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::advance;

    fn quiet_chamber() -> SimulatedChamber {
        SimulatedChamber::new(SimulationCfg {
            ambient_temperature: 20.0,
            initial_temperature: None,
            heater_power: 0.5,
            heat_loss: 0.005,
            fan_heat_loss: 0.01,
            sensor_noise: 0.0,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn idle_chamber_stays_at_ambient() {
        let chamber = quiet_chamber();
        advance(Duration::from_secs(3600)).await;

        let reading = chamber.probe().read_temperature().await.unwrap();
        assert!((reading - 20.0).abs() < 1e-3, "{reading}");
    }

    #[tokio::test(start_paused = true)]
    async fn heater_approaches_equilibrium() {
        let chamber = quiet_chamber();
        chamber.relay(ChamberOutput::Fan).set_on(true).await.unwrap();
        chamber.relay(ChamberOutput::Heater).set_on(true).await.unwrap();

        advance(Duration::from_secs(60)).await;
        let early = chamber.temperature();
        assert!(early > 40.0 && early < 50.0, "{early}");

        // 20 + 0.5 / 0.01
        advance(Duration::from_secs(3600)).await;
        let settled = chamber.temperature();
        assert!((settled - 70.0).abs() < 0.1, "{settled}");
    }

    #[tokio::test(start_paused = true)]
    async fn chamber_cools_towards_ambient() {
        let chamber = SimulatedChamber::new(SimulationCfg {
            initial_temperature: Some(60.0),
            ..quiet_chamber().model().params
        });

        advance(Duration::from_secs(600)).await;
        let cooled = chamber.temperature();
        assert!(cooled < 60.0 && cooled > 20.0, "{cooled}");
    }

    #[tokio::test(start_paused = true)]
    async fn relays_report_state() {
        let chamber = quiet_chamber();
        let heater = chamber.relay(ChamberOutput::Heater);
        let fan = chamber.relay(ChamberOutput::Fan);

        fan.set_on(true).await.unwrap();
        assert!(fan.is_on().await.unwrap());
        assert!(!heater.is_on().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn noise_stays_within_bounds() {
        let chamber = SimulatedChamber::new(SimulationCfg {
            sensor_noise: 0.5,
            ..quiet_chamber().model().params
        });
        let probe = chamber.probe();

        for _ in 0..100 {
            let reading = probe.read_temperature().await.unwrap();
            assert!((19.5..=20.5).contains(&reading), "{reading}");
        }
    }
}
