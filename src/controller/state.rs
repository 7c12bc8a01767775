//! Run state owned by the dehydrator controller.

use std::time::Duration;

use chrono::TimeDelta;
use serde::Serialize;
use tokio::time::Instant;

/// Lifecycle phase of the controller.
///
/// `Idle -> Running -> CoolingDown -> Idle`, with `Faulted` entered when a
/// safety fault stops heating. `start` is accepted from every phase except
/// `Running`; `stop` is accepted from every phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ControllerPhase {
    Idle,
    Running,
    CoolingDown,
    Faulted,
}

/// Mutable run data. The `running` flag itself lives in an atomic next to
/// this struct so background tasks can poll it without locking.
#[derive(Debug, Clone)]
pub struct ControllerState {
    pub phase: ControllerPhase,
    pub target_temperature: f32,
    /// Requested run time; zero means unlimited.
    pub run_duration: Duration,
    pub timer_armed: bool,
    pub start_time: Option<Instant>,
    /// Incremented by every start; a cooldown only acts if it is unchanged.
    pub epoch: u64,
    /// Last duty cycle written to the heater during the current run.
    pub last_output: Option<f32>,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            phase: ControllerPhase::Idle,
            target_temperature: 0.0,
            run_duration: Duration::ZERO,
            timer_armed: false,
            start_time: None,
            epoch: 0,
            last_output: None,
        }
    }
}

impl ControllerState {
    /// Records a new run and returns its epoch.
    pub fn begin_run(&mut self, target: f32, run_duration: Duration, now: Instant) -> u64 {
        self.phase = ControllerPhase::Running;
        self.target_temperature = target;
        self.run_duration = run_duration;
        self.timer_armed = !run_duration.is_zero();
        self.start_time = Some(now);
        self.last_output = None;
        self.epoch += 1;
        self.epoch
    }

    /// Clears the timer and moves to `phase`. The target is kept for display.
    pub fn end_run(&mut self, phase: ControllerPhase) {
        self.phase = phase;
        self.run_duration = Duration::ZERO;
        self.timer_armed = false;
        self.start_time = None;
    }

    /// Instant at which an armed timer expires.
    pub fn deadline(&self) -> Option<Instant> {
        match (self.timer_armed, self.start_time) {
            (true, Some(start)) => start.checked_add(self.run_duration),
            _ => None,
        }
    }

    /// `run_duration - (now - start_time)`, unclamped; zero without a timer.
    pub fn time_remaining(&self, now: Instant) -> TimeDelta {
        match (self.timer_armed, self.start_time) {
            (true, Some(start)) => {
                let elapsed = to_delta(now.saturating_duration_since(start));
                to_delta(self.run_duration)
                    .checked_sub(&elapsed)
                    .unwrap_or(TimeDelta::MIN)
            }
            _ => TimeDelta::zero(),
        }
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}
