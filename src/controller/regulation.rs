//! Background temperature regulation, one task per active run.

use log::{debug, error, info};
use tokio::{
    task::{AbortHandle, JoinHandle},
    time::{Instant, MissedTickBehavior, interval, sleep_until},
};
use tokio_util::sync::CancellationToken;

use super::DehydratorController;
use crate::{
    error::{ControllerError, ControllerResult},
    event::Event,
    pid::bound,
    sensors::read_checked,
};

/// Handle to the live regulation task of a run.
///
/// The loop runs in its own task; `join` is the supervisor awaiting it, so a
/// panic in the loop is handled like any other fault.
pub(super) struct RegulationHandle {
    pub epoch: u64,
    pub token: CancellationToken,
    pub join: JoinHandle<()>,
    pub regulation: AbortHandle,
}

#[derive(Debug, PartialEq, Eq)]
enum RegulationExit {
    Cancelled,
    TimerElapsed,
}

pub(super) fn spawn(controller: DehydratorController, epoch: u64) -> RegulationHandle {
    let token = CancellationToken::new();
    let task_token = token.clone();
    let task_controller = controller.clone();
    let regulation = tokio::spawn(async move { regulate(&task_controller, &task_token).await });
    let abort = regulation.abort_handle();

    let join = tokio::spawn(async move {
        let outcome = match regulation.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => Err(ControllerError::RegulationPanicked(e.to_string())),
            Err(_) => {
                debug!("Regulation task for run {epoch} aborted");
                return;
            }
        };

        match outcome {
            Ok(RegulationExit::Cancelled) => {
                debug!("Regulation task for run {epoch} stopped");
            }
            Ok(RegulationExit::TimerElapsed) => {
                tokio::spawn(async move { controller.finish_timed_run(epoch).await });
            }
            Err(fault) => {
                error!("Regulation task for run {epoch} failed: {fault}");
                if let Err(e) = controller.inner.hardware.heater.stop().await {
                    error!("Failed to stop heater after fault: {e:#}");
                }
                tokio::spawn(async move { controller.handle_regulation_fault(epoch, fault).await });
            }
        }
    });

    RegulationHandle {
        epoch,
        token,
        join,
        regulation: abort,
    }
}

async fn regulate(
    controller: &DehydratorController,
    token: &CancellationToken,
) -> ControllerResult<RegulationExit> {
    let inner = &controller.inner;
    let settings = inner.settings;

    inner.regulator().reset_integrator();

    let deadline = inner.state().deadline();
    let mut timer_pending = deadline.is_some();

    let mut ticker = interval(settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => return Ok(RegulationExit::Cancelled),
            () = sleep_until(deadline.unwrap_or_else(Instant::now)), if timer_pending => {
                timer_pending = false;
                if settings.stop_on_timer_elapsed {
                    info!("Run time elapsed, stopping");
                    return Ok(RegulationExit::TimerElapsed);
                }
                info!("Run time elapsed, continuing to regulate");
                inner.event_bus.notify(Event::RunTimeElapsed);
                continue;
            }
            _ = ticker.tick() => {}
        }

        let measured = read_checked(inner.hardware.sensor.as_ref())
            .await
            .map_err(ControllerError::sensor)?;

        if token.is_cancelled() {
            return Ok(RegulationExit::Cancelled);
        }

        let target = inner.state().target_temperature;
        let output = {
            let mut pid = inner.regulator();
            pid.set_target(target);
            pid.set_measured(measured);
            pid.compute_output(Instant::now().into_std())
        };
        let duty = bound(output, settings.pid.output_min, settings.pid.output_max);

        inner
            .hardware
            .heater
            .set_duty_cycle(duty)
            .await
            .map_err(|e| ControllerError::actuator("heater duty cycle", e))?;
        inner.state().last_output = Some(duty);

        debug!(
            "Temp: {measured:.1}/{target:.0}°C, duty cycle {:.0}%",
            duty * 100.0
        );
    }
}
