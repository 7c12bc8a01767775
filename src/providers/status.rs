use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::time::interval;
use tokio_stream::{StreamExt, wrappers::IntervalStream};
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    controller::ControllerStatus,
    providers::traits::ServiceProvider,
    sensors::read_checked,
    task_manager::TaskManager,
};

/// Periodic status report service provider.
///
/// Logs one JSON line per `status_interval_secs` with the controller phase,
/// target, last duty cycle, remaining run time and the current probe reading.
///
/// # Priority and Criticality
///
/// - **Priority**: 3 (low)
/// - **Critical**: No (optional service)
pub struct StatusServiceProvider {
    state: Arc<AppState>,
}

impl StatusServiceProvider {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ServiceProvider for StatusServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let state = self.state.clone();
        task_manager.spawn_task(self.name(), |cancel_token| async move {
            run_status_service(state, cancel_token).await
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "StatusService"
    }

    fn priority(&self) -> i32 {
        3
    }
}

#[derive(Debug, Serialize)]
struct StatusReport {
    temperature: Option<f32>,
    #[serde(flatten)]
    controller: ControllerStatus,
}

async fn run_status_service(state: Arc<AppState>, cancel_token: CancellationToken) -> Result<()> {
    let period = Duration::from_secs(u64::from(state.config().await.status_interval_secs));
    let mut ticks = IntervalStream::new(interval(period));

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Status service cancelled");
                break;
            }
            Some(_) = ticks.next() => {
                info!("{}", status_line(&state).await?);
            }
        }
    }
    Ok(())
}

async fn status_line(state: &AppState) -> Result<String> {
    let temperature = match read_checked(state.sensor.as_ref()).await {
        Ok(temperature) => Some(temperature),
        Err(e) => {
            warn!("Status: sensor unavailable: {e:#}");
            None
        }
    };
    let report = StatusReport {
        temperature,
        controller: state.controller.status(),
    };
    serde_json::to_string(&report).context("Failed to serialize status report")
}
