//! Recording fakes shared by unit tests.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use anyhow::{Result, bail};
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{
    actuators::{Fan, Heater},
    controller::{ControllerSettings, DehydratorController, Hardware},
    event::{Event, EventBus},
    pid::PidRegulator,
    sensors::TemperatureSensor,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeaterCall {
    Frequency(f32),
    Duty(f32),
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegulatorCall {
    Reset,
    Compute { target: f32, measured: f32 },
}

#[derive(Clone, Default)]
pub struct FakeSensor {
    temperature: Arc<Mutex<f32>>,
    failing: Arc<AtomicBool>,
}

impl FakeSensor {
    pub fn new(temperature: f32) -> Self {
        let sensor = Self::default();
        sensor.set(temperature);
        sensor
    }

    pub fn set(&self, temperature: f32) {
        *self.temperature.lock().unwrap() = temperature;
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl TemperatureSensor for FakeSensor {
    async fn read_temperature(&self) -> Result<f32> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("probe disconnected");
        }
        Ok(*self.temperature.lock().unwrap())
    }
}

#[derive(Clone, Default)]
pub struct RecordingHeater {
    calls: Arc<Mutex<Vec<HeaterCall>>>,
    failing_duty: Arc<AtomicBool>,
    failing_stop: Arc<AtomicBool>,
}

impl RecordingHeater {
    pub fn calls(&self) -> Vec<HeaterCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn duty_writes(&self) -> Vec<f32> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HeaterCall::Duty(duty) => Some(duty),
                _ => None,
            })
            .collect()
    }

    pub fn fail_duty(&self, failing: bool) {
        self.failing_duty.store(failing, Ordering::SeqCst);
    }

    pub fn fail_stop(&self, failing: bool) {
        self.failing_stop.store(failing, Ordering::SeqCst);
    }

    fn record(&self, call: HeaterCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Heater for RecordingHeater {
    async fn set_switching_frequency(&self, hz: f32) -> Result<()> {
        self.record(HeaterCall::Frequency(hz));
        Ok(())
    }

    async fn set_duty_cycle(&self, duty: f32) -> Result<()> {
        if self.failing_duty.load(Ordering::SeqCst) {
            bail!("pwm driver offline");
        }
        self.record(HeaterCall::Duty(duty));
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.record(HeaterCall::Start);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.failing_stop.load(Ordering::SeqCst) {
            bail!("relay welded shut");
        }
        self.record(HeaterCall::Stop);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingFan {
    calls: Arc<Mutex<Vec<bool>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingFan {
    pub fn calls(&self) -> Vec<bool> {
        self.calls.lock().unwrap().clone()
    }

    pub fn is_on(&self) -> bool {
        self.calls().last().copied().unwrap_or(false)
    }

    /// Makes every following switch command fail without being recorded.
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fan for RecordingFan {
    async fn set_on(&self, on: bool) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("fan relay stuck");
        }
        self.calls.lock().unwrap().push(on);
        Ok(())
    }
}

/// Regulator returning a fixed, adjustable output.
#[derive(Clone, Default)]
pub struct ScriptedRegulator {
    output: Arc<Mutex<f32>>,
    calls: Arc<Mutex<Vec<RegulatorCall>>>,
    panicking: Arc<AtomicBool>,
    target: f32,
    measured: f32,
}

impl ScriptedRegulator {
    pub fn new(output: f32) -> Self {
        let regulator = Self::default();
        regulator.set_output(output);
        regulator
    }

    pub fn set_output(&self, output: f32) {
        *self.output.lock().unwrap() = output;
    }

    pub fn calls(&self) -> Vec<RegulatorCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn panic_on_compute(&self, panicking: bool) {
        self.panicking.store(panicking, Ordering::SeqCst);
    }
}

impl PidRegulator for ScriptedRegulator {
    fn reset_integrator(&mut self) {
        self.calls.lock().unwrap().push(RegulatorCall::Reset);
    }

    fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    fn set_measured(&mut self, measured: f32) {
        self.measured = measured;
    }

    fn compute_output(&mut self, _now: Instant) -> f32 {
        if self.panicking.load(Ordering::SeqCst) {
            panic!("regulator diverged");
        }
        self.calls.lock().unwrap().push(RegulatorCall::Compute {
            target: self.target,
            measured: self.measured,
        });
        *self.output.lock().unwrap()
    }
}

pub struct TestRig {
    pub controller: DehydratorController,
    pub sensor: FakeSensor,
    pub heater: RecordingHeater,
    pub fan: RecordingFan,
    pub regulator: ScriptedRegulator,
    pub events: broadcast::Receiver<Event>,
}

impl TestRig {
    pub fn new(temperature: f32, output: f32) -> Self {
        Self::with_settings(temperature, output, ControllerSettings::default())
    }

    pub fn with_settings(temperature: f32, output: f32, settings: ControllerSettings) -> Self {
        let sensor = FakeSensor::new(temperature);
        let heater = RecordingHeater::default();
        let fan = RecordingFan::default();
        let regulator = ScriptedRegulator::new(output);
        let event_bus = EventBus::with_capacity(256);
        let events = event_bus.subscribe();

        let hardware = Hardware {
            sensor: Arc::new(sensor.clone()),
            heater: Arc::new(heater.clone()),
            fan: Arc::new(fan.clone()),
        };
        let controller = DehydratorController::new(
            hardware,
            Box::new(regulator.clone()),
            settings,
            event_bus,
        )
        .unwrap();

        Self {
            controller,
            sensor,
            heater,
            fan,
            regulator,
            events,
        }
    }

    /// Drains events published so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn count(events: &[Event], wanted: &Event) -> usize {
    events.iter().filter(|event| *event == wanted).count()
}
