//! Software PWM over a plain relay.
//!
//! Heating elements switched by a mechanical or solid-state relay cannot follow
//! a hardware PWM signal, so the heater is driven with a slow software
//! generator: each period the relay is closed for `duty * period` and opened
//! for the rest. Frequency and duty changes take effect from the next period.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use log::{debug, error};
use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::actuators::{Heater, Relay};

#[derive(Debug, Clone, Copy, PartialEq)]
struct PwmSettings {
    period: Duration,
    duty_cycle: f32,
}

impl Default for PwmSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            duty_cycle: 0.0,
        }
    }
}

struct Generator {
    token: CancellationToken,
    join: JoinHandle<()>,
}

#[derive(Default)]
struct Shared {
    settings: Mutex<PwmSettings>,
    /// Why the last generator died, reported on the next heater command.
    failure: Mutex<Option<String>>,
}

impl Shared {
    fn settings(&self) -> MutexGuard<'_, PwmSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn failure(&self) -> MutexGuard<'_, Option<String>> {
        self.failure.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_failure(&self) -> Result<()> {
        match self.failure().as_deref() {
            Some(reason) => bail!("PWM generator stopped: {reason}"),
            None => Ok(()),
        }
    }
}

/// [`Heater`] implemented by toggling a [`Relay`] from a background task.
pub struct SoftPwm<R> {
    relay: Arc<R>,
    shared: Arc<Shared>,
    generator: tokio::sync::Mutex<Option<Generator>>,
}

impl<R: Relay + 'static> SoftPwm<R> {
    pub fn new(relay: R) -> Self {
        Self {
            relay: Arc::new(relay),
            shared: Arc::new(Shared::default()),
            generator: tokio::sync::Mutex::new(None),
        }
    }

    #[cfg(test)]
    pub fn duty_cycle(&self) -> f32 {
        self.shared.settings().duty_cycle
    }

    #[cfg(test)]
    pub fn period(&self) -> Duration {
        self.shared.settings().period
    }

    #[cfg(test)]
    pub async fn is_generating(&self) -> bool {
        self.generator
            .lock()
            .await
            .as_ref()
            .is_some_and(|generator| !generator.join.is_finished())
    }
}

#[async_trait]
impl<R: Relay + 'static> Heater for SoftPwm<R> {
    async fn set_switching_frequency(&self, hz: f32) -> Result<()> {
        if !hz.is_finite() || hz <= 0.0 {
            bail!("invalid PWM frequency {hz} Hz");
        }
        let period = Duration::try_from_secs_f32(hz.recip())
            .with_context(|| format!("invalid PWM frequency {hz} Hz"))?;
        self.shared.settings().period = period;
        Ok(())
    }

    async fn set_duty_cycle(&self, duty: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&duty) {
            bail!("duty cycle {duty} outside [0, 1]");
        }
        self.shared.check_failure()?;
        self.shared.settings().duty_cycle = duty;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let mut generator = self.generator.lock().await;
        if generator
            .as_ref()
            .is_some_and(|generator| !generator.join.is_finished())
        {
            return Ok(());
        }

        *self.shared.failure() = None;
        let token = CancellationToken::new();
        let join = tokio::spawn(generate(
            self.relay.clone(),
            self.shared.clone(),
            token.clone(),
        ));
        *generator = Some(Generator { token, join });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(generator) = self.generator.lock().await.take() {
            generator.token.cancel();
            if let Err(e) = generator.join.await {
                error!("PWM generator panicked: {e}");
            }
        }
        self.relay
            .set_on(false)
            .await
            .context("Failed to open heater relay")
    }
}

async fn generate<R: Relay>(relay: Arc<R>, shared: Arc<Shared>, token: CancellationToken) {
    if let Err(e) = run_periods(relay.as_ref(), &shared, &token).await {
        error!("PWM generator failed: {e:#}");
        *shared.failure() = Some(format!("{e:#}"));
    }
}

async fn run_periods<R: Relay>(
    relay: &R,
    shared: &Shared,
    token: &CancellationToken,
) -> Result<()> {
    let mut energized = None;

    loop {
        let PwmSettings { period, duty_cycle } = *shared.settings();
        let on_time = period.mul_f32(duty_cycle).min(period);
        let off_time = period - on_time;

        for (on, phase) in [(true, on_time), (false, off_time)] {
            if phase.is_zero() {
                continue;
            }
            if energized != Some(on) {
                relay.set_on(on).await?;
                energized = Some(on);
            }
            tokio::select! {
                () = token.cancelled() => {
                    debug!("PWM generator cancelled");
                    return Ok(());
                }
                () = sleep(phase) => {}
            }
        }
    }
}
