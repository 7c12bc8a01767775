//! Actuator abstractions driven by the controller.

use anyhow::Result;
use async_trait::async_trait;

/// Pulse-width-modulated heater output.
///
/// # Example
///
/// ```no_run
/// use dehydratord::actuators::Heater;
/// use anyhow::Result;
///
/// struct NullHeater;
///
/// #[async_trait::async_trait]
/// impl Heater for NullHeater {
///     async fn set_switching_frequency(&self, hz: f32) -> Result<()> { Ok(()) }
///     async fn set_duty_cycle(&self, duty: f32) -> Result<()> { Ok(()) }
///     async fn start(&self) -> Result<()> { Ok(()) }
///     async fn stop(&self) -> Result<()> { Ok(()) }
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Heater: Send + Sync {
    /// Sets the PWM switching frequency in hertz.
    async fn set_switching_frequency(&self, hz: f32) -> Result<()>;

    /// Sets the fraction of each period the heater is energized, in `[0, 1]`.
    async fn set_duty_cycle(&self, duty: f32) -> Result<()>;

    /// Starts PWM generation.
    async fn start(&self) -> Result<()>;

    /// Stops PWM generation and leaves the heater de-energized.
    async fn stop(&self) -> Result<()>;
}

/// Circulation fan.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fan: Send + Sync {
    async fn set_on(&self, on: bool) -> Result<()>;
}

/// Binary output such as a mechanical or solid-state relay.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Relay: Send + Sync {
    async fn set_on(&self, on: bool) -> Result<()>;

    async fn is_on(&self) -> Result<bool>;
}

/// A fan wired straight to a relay.
pub struct RelayFan<R>(R);

impl<R: Relay> RelayFan<R> {
    pub fn new(relay: R) -> Self {
        Self(relay)
    }
}

#[async_trait]
impl<R: Relay> Fan for RelayFan<R> {
    async fn set_on(&self, on: bool) -> Result<()> {
        self.0.set_on(on).await
    }
}
