//! The dehydrator controller: run/cooldown state machine and the tasks that
//! regulate chamber temperature.
//!
//! A run is started with a target temperature and an optional duration. While
//! running, a background task reads the sensor every poll interval, feeds the
//! PID regulator and writes its output as the heater's duty cycle. Stopping
//! cancels that task, switches the heater off and leaves the fan running for a
//! cooldown period, after which the fan goes off unless a new run started in
//! the meantime.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use dehydratord::controller::{ControllerSettings, DehydratorController, Hardware};
//! use dehydratord::event::EventBus;
//!
//! # async fn example(hardware: Hardware) -> anyhow::Result<()> {
//! let controller =
//!     DehydratorController::with_standard_pid(hardware, ControllerSettings::default(), EventBus::new())?;
//!
//! controller.start(60.0, Duration::from_secs(8 * 3600)).await?;
//! // ...
//! controller.stop(60).await?;
//! # Ok(())
//! # }
//! ```

mod cooldown;
mod regulation;
mod state;

use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::TimeDelta;
use log::{error, info, warn};
use serde::Serialize;
use tokio::time::{Instant, timeout};

pub use state::{ControllerPhase, ControllerState};

use crate::{
    actuators::{Fan, Heater},
    error::{ControllerError, ControllerResult},
    event::{Event, EventBus},
    pid::{PidRegulator, PidSettings, StandardPidController, bound},
    sensors::{TemperatureSensor, read_checked},
};
use regulation::RegulationHandle;

/// Upper bound on waiting for the regulation task to observe a stop.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Construction-time tuning of the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerSettings {
    /// Regulator tuning; the output range also bounds every duty cycle written.
    pub pid: PidSettings,
    /// Period between regulation passes.
    pub poll_interval: Duration,
    /// Heater PWM frequency applied at start.
    pub heater_start_frequency_hz: f32,
    /// End the run when its duration elapses instead of only reporting it.
    pub stop_on_timer_elapsed: bool,
    /// Cooldown used when a run ends because its duration elapsed.
    pub timer_cooldown_seconds: u32,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            pid: PidSettings::default(),
            poll_interval: Duration::from_millis(2000),
            heater_start_frequency_hz: 0.2,
            stop_on_timer_elapsed: true,
            timer_cooldown_seconds: 60,
        }
    }
}

impl ControllerSettings {
    /// Rejects settings the regulation loop cannot run with.
    pub fn validate(&self) -> ControllerResult<()> {
        let invalid = |reason: String| Err(ControllerError::InvalidSettings(reason));

        if self.poll_interval.is_zero() {
            return invalid("poll_interval must be non-zero".into());
        }
        let (min, max) = (self.pid.output_min, self.pid.output_max);
        if !(min.is_finite() && max.is_finite() && min < max) {
            return invalid(format!("output range [{min}, {max}] is empty or not finite"));
        }
        if min < 0.0 || max > 1.0 {
            return invalid(format!("output range [{min}, {max}] exceeds a duty cycle"));
        }
        let hz = self.heater_start_frequency_hz;
        if !(hz.is_finite() && hz > 0.0) {
            return invalid(format!("heater_start_frequency_hz must be positive, got {hz}"));
        }
        Ok(())
    }
}

/// Peripherals driven by the controller.
#[derive(Clone)]
pub struct Hardware {
    pub sensor: Arc<dyn TemperatureSensor>,
    pub heater: Arc<dyn Heater>,
    pub fan: Arc<dyn Fan>,
}

/// Point-in-time view of the controller for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub phase: ControllerPhase,
    pub target_temperature: f32,
    pub duty_cycle: Option<f32>,
    pub time_remaining_secs: i64,
}

/// Converts user-entered seconds into a run duration.
pub fn run_duration_from_secs(secs: f64) -> ControllerResult<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| ControllerError::InvalidDuration(format!("{secs}: {e}")))
}

struct Inner {
    hardware: Hardware,
    settings: ControllerSettings,
    event_bus: EventBus,
    regulator: Mutex<Box<dyn PidRegulator>>,
    running: AtomicBool,
    state: Mutex<ControllerState>,
    /// Serializes commands and owns the live regulation task.
    commands: tokio::sync::Mutex<Option<RegulationHandle>>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn regulator(&self) -> MutexGuard<'_, Box<dyn PidRegulator>> {
        self.regulator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: ControllerPhase) {
        let changed = {
            let mut state = self.state();
            let changed = state.phase != phase;
            state.phase = phase;
            changed
        };
        if changed {
            self.event_bus.notify(Event::PhaseChanged(phase));
        }
    }
}

/// Closed-loop heater/fan controller. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DehydratorController {
    inner: Arc<Inner>,
}

impl DehydratorController {
    /// Fails with [`ControllerError::InvalidSettings`] when `settings` do not
    /// pass [`ControllerSettings::validate`].
    pub fn new(
        hardware: Hardware,
        regulator: Box<dyn PidRegulator>,
        settings: ControllerSettings,
        event_bus: EventBus,
    ) -> ControllerResult<Self> {
        settings.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                hardware,
                settings,
                event_bus,
                regulator: Mutex::new(regulator),
                running: AtomicBool::new(false),
                state: Mutex::new(ControllerState::default()),
                commands: tokio::sync::Mutex::new(None),
            }),
        })
    }

    /// Creates a controller regulated by a [`StandardPidController`] built
    /// from `settings.pid`.
    pub fn with_standard_pid(
        hardware: Hardware,
        settings: ControllerSettings,
        event_bus: EventBus,
    ) -> ControllerResult<Self> {
        let regulator = Box::new(StandardPidController::new(settings.pid));
        Self::new(hardware, regulator, settings, event_bus)
    }

    /// Starts heating towards `target`. A zero `run_duration` runs until
    /// stopped.
    ///
    /// Fails with [`ControllerError::AlreadyRunning`] while a run is active.
    /// Sensor or actuator faults during start-up are returned and leave the
    /// controller `Faulted` with the heater stopped.
    pub async fn start(&self, target: f32, run_duration: Duration) -> ControllerResult<()> {
        let mut slot = self.inner.commands.lock().await;
        if slot.is_some() || self.is_running() {
            return Err(ControllerError::AlreadyRunning);
        }

        info!("Turning on: target {target:.1}°C, run time {run_duration:?}");
        let epoch = self
            .inner
            .state()
            .begin_run(target, run_duration, Instant::now());
        self.inner.running.store(true, Ordering::SeqCst);

        if let Err(fault) = self.energize(target).await {
            error!("Start-up failed: {fault}");
            self.inner.running.store(false, Ordering::SeqCst);
            if let Err(e) = self.inner.hardware.heater.stop().await {
                error!("Failed to stop heater after start-up fault: {e:#}");
            }
            self.inner.state().end_run(ControllerPhase::Faulted);
            self.inner
                .event_bus
                .notify(Event::PhaseChanged(ControllerPhase::Faulted));
            return Err(fault);
        }

        *slot = Some(regulation::spawn(self.clone(), epoch));
        self.inner
            .event_bus
            .notify(Event::PhaseChanged(ControllerPhase::Running));
        Ok(())
    }

    /// Stops heating and runs the fan for `cooldown_seconds` before turning it
    /// off. Accepted in any phase.
    pub async fn stop(&self, cooldown_seconds: u32) -> ControllerResult<()> {
        let mut slot = self.inner.commands.lock().await;
        self.stop_locked(&mut slot, cooldown_seconds).await
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> ControllerPhase {
        self.inner.state().phase
    }

    pub fn target_temperature(&self) -> f32 {
        self.inner.state().target_temperature
    }

    /// Remaining run time; negative once a timed run overruns, zero when no
    /// timer is armed.
    pub fn time_remaining(&self) -> TimeDelta {
        self.inner.state().time_remaining(Instant::now())
    }

    pub fn status(&self) -> ControllerStatus {
        let state = self.inner.state();
        ControllerStatus {
            phase: state.phase,
            target_temperature: state.target_temperature,
            duty_cycle: state.last_output,
            time_remaining_secs: state.time_remaining(Instant::now()).num_seconds(),
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.inner.settings
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }

    /// Fan on, heater configured and seeded open-loop, heater started.
    async fn energize(&self, target: f32) -> ControllerResult<()> {
        let hardware = &self.inner.hardware;
        let settings = &self.inner.settings;

        // fan stays on for the whole run so the probe reads circulated air
        hardware
            .fan
            .set_on(true)
            .await
            .map_err(|e| ControllerError::actuator("fan on", e))?;

        hardware
            .heater
            .set_switching_frequency(settings.heater_start_frequency_hz)
            .await
            .map_err(|e| ControllerError::actuator("heater frequency", e))?;

        let current = read_checked(hardware.sensor.as_ref())
            .await
            .map_err(ControllerError::sensor)?;
        let seed = if current < target {
            settings.pid.output_max
        } else {
            settings.pid.output_min
        };
        let seed = bound(seed, settings.pid.output_min, settings.pid.output_max);

        hardware
            .heater
            .set_duty_cycle(seed)
            .await
            .map_err(|e| ControllerError::actuator("heater duty cycle", e))?;
        hardware
            .heater
            .start()
            .await
            .map_err(|e| ControllerError::actuator("heater start", e))?;

        self.inner.state().last_output = Some(seed);
        Ok(())
    }

    async fn stop_locked(
        &self,
        slot: &mut Option<RegulationHandle>,
        cooldown_seconds: u32,
    ) -> ControllerResult<()> {
        info!("Turning off, cooldown {cooldown_seconds} secs");

        if let Some(handle) = slot.take() {
            Self::join_regulation(handle).await;
        }
        self.inner.running.store(false, Ordering::SeqCst);

        let heater_result = self.inner.hardware.heater.stop().await;

        let epoch = {
            let mut state = self.inner.state();
            state.end_run(ControllerPhase::CoolingDown);
            state.epoch
        };
        self.inner
            .event_bus
            .notify(Event::PhaseChanged(ControllerPhase::CoolingDown));

        cooldown::spawn(self.clone(), epoch, cooldown_seconds);

        heater_result.map_err(|e| ControllerError::actuator("heater stop", e))
    }

    async fn join_regulation(mut handle: RegulationHandle) {
        handle.token.cancel();
        match timeout(TASK_JOIN_TIMEOUT, &mut handle.join).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Regulation supervisor for run {} failed: {e}", handle.epoch),
            Err(_) => {
                warn!(
                    "Regulation task for run {} did not stop in time, aborting",
                    handle.epoch
                );
                handle.regulation.abort();
                handle.join.abort();
            }
        }
    }

    /// Ends a run whose duration elapsed, unless it was already stopped.
    async fn finish_timed_run(&self, epoch: u64) {
        let mut slot = self.inner.commands.lock().await;
        if slot.as_ref().map(|handle| handle.epoch) != Some(epoch) {
            return;
        }

        let cooldown_seconds = self.inner.settings.timer_cooldown_seconds;
        if let Err(e) = self.stop_locked(&mut slot, cooldown_seconds).await {
            error!("Failed to stop after run time elapsed: {e}");
            self.inner.event_bus.notify(Event::RegulationFault(e));
        }
        self.inner.event_bus.notify(Event::RunTimeElapsed);
    }

    /// Records a fault that ended the regulation task. The task has already
    /// stopped the heater; the fan is left running. Faults of a run that was
    /// superseded by a later start are dropped.
    async fn handle_regulation_fault(&self, epoch: u64, fault: ControllerError) {
        let mut slot = self.inner.commands.lock().await;
        let current_epoch = self.inner.state().epoch;
        if current_epoch != epoch {
            warn!("Dropping fault of superseded run {epoch} (now run {current_epoch}): {fault}");
            return;
        }
        if slot.as_ref().map(|handle| handle.epoch) == Some(epoch) {
            if let Some(handle) = slot.take() {
                Self::join_regulation(handle).await;
            }
            self.inner.running.store(false, Ordering::SeqCst);
            self.inner.state().end_run(ControllerPhase::Faulted);
            self.inner
                .event_bus
                .notify(Event::PhaseChanged(ControllerPhase::Faulted));
        }
        self.inner.event_bus.notify(Event::RegulationFault(fault));
    }

    /// Turns the fan off if nothing restarted the controller since the stop
    /// that scheduled this cooldown.
    async fn finish_cooldown(&self, epoch: u64) {
        let _slot = self.inner.commands.lock().await;

        let current_epoch = self.inner.state().epoch;
        if self.is_running() || current_epoch != epoch {
            info!("Restarted during cooldown, leaving fan on");
            return;
        }

        match self.inner.hardware.fan.set_on(false).await {
            Ok(()) => {
                info!("Cooldown elapsed, turning fan off.");
                if self.phase() == ControllerPhase::CoolingDown {
                    self.inner.set_phase(ControllerPhase::Idle);
                }
                self.inner.event_bus.notify(Event::CooldownElapsed);
            }
            Err(e) => {
                let fault = ControllerError::actuator("fan off", e);
                error!("Cooldown failed: {fault}");
                self.inner.set_phase(ControllerPhase::Faulted);
                self.inner.event_bus.notify(Event::RegulationFault(fault));
            }
        }
    }
}
