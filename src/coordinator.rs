//! System coordinator for managing service lifecycle and dependency injection.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use log::{error, info, warn};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::broadcast::error::RecvError,
};

use crate::{
    app_context::AppState,
    config::ConfigManager,
    controller::ControllerPhase,
    event::{Event, EventBus},
    providers::{
        AppStateProvider, AsyncProvider, ProgramServiceProvider, ServiceProvider,
        StatusServiceProvider,
    },
    task_manager::TaskManager,
};

/// Extra time services get on shutdown beyond the longest fan cooldown.
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(10);

/// What the main loop does after handling an event.
#[derive(Debug, PartialEq)]
enum LoopControl {
    Continue,
    Exit,
}

/// Owns the services and the event loop of the daemon.
///
/// Services are started in priority order; critical ones must start. The
/// event loop ends on a termination signal, a shutdown request, a regulation
/// fault, or once a finished program has cooled down and `exit_when_done` is
/// set. Every exit path goes through the services' shutdown, which stops
/// heating and waits out the fan cooldown.
pub struct SystemCoordinator {
    task_manager: TaskManager,
    event_bus: EventBus,
    shared_state: Option<Arc<AppState>>,
    service_providers: Vec<Box<dyn ServiceProvider>>,
}

impl Default for SystemCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCoordinator {
    pub fn new() -> Self {
        Self {
            task_manager: TaskManager::new(),
            event_bus: EventBus::new(),
            shared_state: None,
            service_providers: Vec::new(),
        }
    }

    /// Builds the application state from configuration and registers the
    /// services.
    pub async fn initialize(&mut self, config_manager: ConfigManager) -> Result<()> {
        info!("Initializing SystemCoordinator...");

        let state = AppStateProvider::new(config_manager, self.event_bus.clone())
            .provide()
            .await
            .context("Failed to initialize application state")?;
        self.initialize_with_state(state).await
    }

    /// Registers the services around an already built state. The state's
    /// controller must publish on this coordinator's [`event_bus`](Self::event_bus).
    pub async fn initialize_with_state(&mut self, state: Arc<AppState>) -> Result<()> {
        let shutdown_timeout = state.config().await.longest_cooldown() + SHUTDOWN_MARGIN;
        self.task_manager = TaskManager::new().with_shutdown_timeout(shutdown_timeout);

        let mut providers: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(ProgramServiceProvider::new(state.clone())),
            Box::new(StatusServiceProvider::new(state.clone())),
        ];
        providers.sort_by_key(|provider| std::cmp::Reverse(provider.priority()));
        self.service_providers = providers;
        self.shared_state = Some(state);

        info!(
            "Registered service providers in priority order: {}",
            self.registered_services().join(", ")
        );
        Ok(())
    }

    /// Starts all registered services in priority order.
    ///
    /// Critical services must start successfully, while non-critical services
    /// can fail without stopping the system.
    pub async fn start_all_services(&mut self) -> Result<()> {
        info!(
            "Starting {} services in priority order...",
            self.service_providers.len()
        );

        for provider in &self.service_providers {
            let is_critical = provider.is_critical();

            match provider.start(&mut self.task_manager).await {
                Ok(()) => {
                    info!(
                        "Service '{}' started (priority: {}, critical: {})",
                        provider.name(),
                        provider.priority(),
                        is_critical
                    );
                }
                Err(e) if is_critical => {
                    return Err(e).with_context(|| {
                        format!("Critical service '{}' failed to start", provider.name())
                    });
                }
                Err(e) => {
                    warn!(
                        "Non-critical service '{}' failed to start: {e:#}",
                        provider.name()
                    );
                }
            }
        }

        info!("All critical services started successfully");
        Ok(())
    }

    /// Runs until a signal, a shutdown request, a fault or the end of the
    /// program, then shuts the services down.
    ///
    /// Returns an error after a regulation fault so the process exits with a
    /// failure status.
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut event_rx = self.event_bus.subscribe();
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        info!("Starting main event loop");

        let outcome = loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        break Err(anyhow!(e).context("Failed to listen for Ctrl+C"));
                    }
                    info!("Received Ctrl+C, initiating graceful shutdown...");
                    break Ok(());
                }
                _ = terminate.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown...");
                    break Ok(());
                }
                event = event_rx.recv() => {
                    match self.handle_event(event).await {
                        Ok(LoopControl::Continue) => {}
                        Ok(LoopControl::Exit) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
            }
        };

        self.shutdown().await;
        info!("Main event loop terminated");
        outcome
    }

    async fn handle_event(&self, event: Result<Event, RecvError>) -> Result<LoopControl> {
        match event {
            Ok(Event::PhaseChanged(phase)) => {
                info!("Controller phase: {phase:?}");
            }
            Ok(Event::RunTimeElapsed) => {
                info!("Drying time elapsed");
            }
            Ok(Event::CooldownElapsed) => {
                if self.program_finished().await {
                    info!("Program finished and cooled down, exiting");
                    return Ok(LoopControl::Exit);
                }
            }
            Ok(Event::RegulationFault(fault)) => {
                error!("Regulation fault: {fault}");
                return Err(anyhow!(fault).context("Heating stopped after a regulation fault"));
            }
            Ok(Event::SystemShutdown) => {
                info!("Processing SystemShutdown event");
                return Ok(LoopControl::Exit);
            }
            Err(RecvError::Lagged(n)) => {
                warn!("Event bus lagged by {n} messages");
            }
            Err(RecvError::Closed) => {
                bail!("Event bus channel closed unexpectedly");
            }
        }
        Ok(LoopControl::Continue)
    }

    /// True once the controller is idle again and the daemon was asked to
    /// exit when the program ends.
    async fn program_finished(&self) -> bool {
        match &self.shared_state {
            Some(state) => {
                state.config().await.program.exit_when_done
                    && state.controller.phase() == ControllerPhase::Idle
            }
            None => false,
        }
    }

    async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.task_manager.shutdown_all().await {
            error!("Error during task shutdown: {e:#}");
        }

        info!("Shutdown complete");
    }

    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Names of the registered services, highest priority first.
    pub fn registered_services(&self) -> Vec<&'static str> {
        self.service_providers.iter().map(|p| p.name()).collect()
    }
}
