use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use log::{info, warn};
use std::{sync::Arc, time::Duration};
use tokio::{sync::broadcast, time::timeout};
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    controller::ControllerPhase,
    error::ControllerError,
    event::Event,
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Slack on top of the cooldown when waiting for the fan to go off.
const COOLDOWN_SLACK: Duration = Duration::from_secs(5);

/// Drying program service provider.
///
/// Starts the configured program when the service starts and owns its
/// shutdown: once cancelled, heating is stopped and the service waits for the
/// fan cooldown to finish so the daemon never exits with the chamber hot and
/// unventilated.
///
/// # Priority and Criticality
///
/// - **Priority**: 10 (high)
/// - **Critical**: Yes (the daemon has nothing to do without a program)
pub struct ProgramServiceProvider {
    state: Arc<AppState>,
}

impl ProgramServiceProvider {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ServiceProvider for ProgramServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let program = self.state.config().await.program;
        let run_duration = program.run_duration()?;

        self.state
            .controller
            .start(program.target_temperature, run_duration)
            .await
            .context("Failed to start drying program")?;
        if run_duration.is_zero() {
            info!(
                "Drying at {:.1}°C until stopped",
                program.target_temperature
            );
        } else {
            info!(
                "Drying at {:.1}°C for {run_duration:?}",
                program.target_temperature
            );
        }

        let state = self.state.clone();
        task_manager.spawn_task(self.name(), |cancel_token| async move {
            finish_program(state, cancel_token).await
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ProgramService"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_critical(&self) -> bool {
        true
    }
}

async fn finish_program(state: Arc<AppState>, cancel_token: CancellationToken) -> Result<()> {
    cancel_token.cancelled().await;

    let (cooldown_seconds, wait_limit) = {
        let config = state.config().await;
        (
            config.program.cooldown_seconds,
            config.longest_cooldown() + COOLDOWN_SLACK,
        )
    };
    let controller = &state.controller;
    // subscribe before looking at the phase so a cooldown ending in between is seen
    let mut events = controller.event_bus().subscribe();

    match controller.phase() {
        ControllerPhase::Idle => return Ok(()),
        ControllerPhase::CoolingDown => info!("Waiting for the running cooldown to finish"),
        ControllerPhase::Running | ControllerPhase::Faulted => {
            controller
                .stop(cooldown_seconds)
                .await
                .context("Failed to stop heating")?;
        }
    }

    match timeout(wait_limit, wait_for_cooldown(&mut events)).await {
        Ok(result) => result,
        Err(_) => {
            warn!("Fan cooldown did not finish within {wait_limit:?}");
            Ok(())
        }
    }
}

async fn wait_for_cooldown(events: &mut broadcast::Receiver<Event>) -> Result<()> {
    loop {
        match events.recv().await {
            Ok(Event::CooldownElapsed) => return Ok(()),
            Ok(Event::RegulationFault(fault @ ControllerError::ActuatorFault(_))) => {
                return Err(fault).context("Cooldown failed");
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Missed {n} events while waiting for cooldown");
            }
            Err(broadcast::error::RecvError::Closed) => bail!("Event bus closed"),
        }
    }
}
