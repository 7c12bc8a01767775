//! PID regulation capability used by the controller.
//!
//! The controller only depends on [`PidRegulator`]. [`StandardPidController`]
//! is the standard-form (gain, integral time, derivative time) implementation
//! used by the daemon.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// A resettable control law producing a bounded output.
pub trait PidRegulator: Send {
    /// Clears accumulated integral error and derivative history.
    fn reset_integrator(&mut self);

    fn set_target(&mut self, target: f32);

    fn set_measured(&mut self, measured: f32);

    /// Computes the next output for a sample taken at `now`, bounded to the
    /// configured range.
    fn compute_output(&mut self, now: Instant) -> f32;
}

/// Tuning and output range of a standard-form PID controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidSettings {
    pub proportional_gain: f32,
    /// Integral time in minutes. Zero disables the integral term.
    pub integral_time_minutes: f32,
    /// Derivative time in minutes. Zero disables the derivative term.
    pub derivative_time_minutes: f32,
    pub output_min: f32,
    pub output_max: f32,
}

impl Default for PidSettings {
    /// PI tuning for a slow resistive element read through a noisy probe.
    fn default() -> Self {
        Self {
            proportional_gain: 0.5,
            integral_time_minutes: 0.55,
            derivative_time_minutes: 0.0,
            output_min: 0.0,
            output_max: 1.0,
        }
    }
}

/// Clamps `value` into `[min, max]` without panicking; NaN maps to `min`.
pub fn bound(value: f32, min: f32, max: f32) -> f32 {
    value.max(min).min(max)
}

/// Standard-form PID: `Kp * (e + 1/Ti * ∫e dt + Td * de/dt)`, time in minutes.
///
/// The integral only accumulates while the output is not saturated, so a long
/// warm-up does not overshoot once the target is reached.
#[derive(Debug, Clone)]
pub struct StandardPidController {
    settings: PidSettings,
    target: f32,
    measured: f32,
    integral: f32,
    last_error: Option<f32>,
    last_update: Option<Instant>,
}

impl StandardPidController {
    pub fn new(settings: PidSettings) -> Self {
        Self {
            settings,
            target: 0.0,
            measured: 0.0,
            integral: 0.0,
            last_error: None,
            last_update: None,
        }
    }

    /// Accumulated error in degree-minutes.
    pub fn integral(&self) -> f32 {
        self.integral
    }

    fn output_for(&self, error: f32, integral: f32, elapsed_minutes: f32) -> f32 {
        let s = &self.settings;

        let integral_term = if s.integral_time_minutes > 0.0 {
            integral / s.integral_time_minutes
        } else {
            0.0
        };

        let derivative_term = match self.last_error {
            Some(last) if s.derivative_time_minutes > 0.0 && elapsed_minutes > 0.0 => {
                s.derivative_time_minutes * (error - last) / elapsed_minutes
            }
            _ => 0.0,
        };

        s.proportional_gain * (error + integral_term + derivative_term)
    }
}

impl Default for StandardPidController {
    fn default() -> Self {
        Self::new(PidSettings::default())
    }
}

impl PidRegulator for StandardPidController {
    fn reset_integrator(&mut self) {
        self.integral = 0.0;
        self.last_error = None;
        self.last_update = None;
    }

    fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    fn set_measured(&mut self, measured: f32) {
        self.measured = measured;
    }

    fn compute_output(&mut self, now: Instant) -> f32 {
        let elapsed_minutes = self
            .last_update
            .map(|last| now.saturating_duration_since(last).as_secs_f32() / 60.0)
            .unwrap_or(0.0);

        let error = self.target - self.measured;
        let candidate = self.integral + error * elapsed_minutes;

        let raw = self.output_for(error, candidate, elapsed_minutes);
        let output = bound(raw, self.settings.output_min, self.settings.output_max);

        if output == raw {
            self.integral = candidate;
        }
        self.last_error = Some(error);
        self.last_update = Some(now);

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::time::Duration;

    fn pi(kp: f32, ti: f32) -> StandardPidController {
        StandardPidController::new(PidSettings {
            proportional_gain: kp,
            integral_time_minutes: ti,
            derivative_time_minutes: 0.0,
            output_min: 0.0,
            output_max: 1.0,
        })
    }

    #[test]
    fn repeated_sample_instant_adds_no_integral() {
        let now = Instant::now();
        let mut pid = pi(0.1, 1.0);
        pid.set_target(60.0);
        pid.set_measured(59.0);

        pid.compute_output(now);
        pid.compute_output(now);

        assert_eq!(pid.integral(), 0.0);
    }

    #[test]
    fn bound_handles_nan_and_overshoot() {
        assert_eq!(bound(f32::NAN, 0.0, 1.0), 0.0);
        assert_eq!(bound(7.5, 0.0, 1.0), 1.0);
        assert_eq!(bound(-2.0, 0.0, 1.0), 0.0);
        assert_eq!(bound(0.25, 0.0, 1.0), 0.25);
    }

    #[test]
    fn default_settings_are_proportional_integral_only() {
        let settings = PidSettings::default();
        assert_eq!(settings.proportional_gain, 0.5);
        assert_eq!(settings.integral_time_minutes, 0.55);
        assert_eq!(settings.derivative_time_minutes, 0.0);
        assert_eq!((settings.output_min, settings.output_max), (0.0, 1.0));
    }

    #[test]
    fn first_sample_is_purely_proportional() {
        let mut pid = pi(0.5, 0.55);
        pid.set_target(60.0);
        pid.set_measured(59.0);

        assert_eq!(pid.compute_output(Instant::now()), 0.5);
        assert_eq!(pid.integral(), 0.0);
    }

    #[test]
    fn integral_accumulates_over_time() {
        let start = Instant::now();
        let mut pid = pi(0.1, 1.0);
        pid.set_target(60.0);
        pid.set_measured(59.0);
        pid.compute_output(start);

        let output = pid.compute_output(start + Duration::from_secs(60));

        // error 1 for one minute with Ti = 1 min doubles the proportional term
        assert!((pid.integral() - 1.0).abs() < 1e-4);
        assert!((output - 0.2).abs() < 1e-4);
    }

    #[test]
    fn saturation_stops_integration() {
        let start = Instant::now();
        let mut pid = pi(0.5, 0.55);
        pid.set_target(60.0);
        pid.set_measured(20.0);

        for step in 0..10 {
            assert_eq!(pid.compute_output(start + Duration::from_secs(2 * step)), 1.0);
        }
        assert_eq!(pid.integral(), 0.0);
    }

    #[test]
    fn reset_clears_accumulated_bias() {
        let start = Instant::now();
        let mut pid = pi(0.05, 0.55);
        pid.set_target(60.0);
        pid.set_measured(58.0);

        for step in 0..30 {
            pid.compute_output(start + Duration::from_secs(2 * step));
        }
        assert!(pid.integral() > 0.0);

        pid.reset_integrator();
        assert_eq!(pid.integral(), 0.0);
        let later = start + Duration::from_secs(60);
        assert!((pid.compute_output(later) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn derivative_reacts_to_error_change() {
        let start = Instant::now();
        let mut pid = StandardPidController::new(PidSettings {
            proportional_gain: 0.1,
            integral_time_minutes: 0.0,
            derivative_time_minutes: 1.0,
            output_min: -10.0,
            output_max: 10.0,
        });
        pid.set_target(50.0);
        pid.set_measured(40.0);
        pid.compute_output(start);

        pid.set_measured(45.0);

        // error 5, de/dt = -5 per minute
        let output = pid.compute_output(start + Duration::from_secs(60));
        assert!((output - 0.0).abs() < 1e-4);
    }

    proptest! {
        #[test]
        fn output_stays_within_bounds(
            target in -500.0f32..500.0,
            measured in -500.0f32..500.0,
            kp in 0.0f32..50.0,
            ti in 0.0f32..5.0,
            td in 0.0f32..5.0,
        ) {
            let mut pid = StandardPidController::new(PidSettings {
                proportional_gain: kp,
                integral_time_minutes: ti,
                derivative_time_minutes: td,
                output_min: 0.0,
                output_max: 1.0,
            });
            pid.set_target(target);
            pid.set_measured(measured);
            let start = Instant::now();
            for step in 0..3 {
                let output = pid.compute_output(start + Duration::from_secs(2 * step));
                prop_assert!((0.0..=1.0).contains(&output));
            }
        }
    }
}
