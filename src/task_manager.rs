//! Named background tasks sharing one cancellation root.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};
use tokio::{task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Tracks service tasks and stops them together.
///
/// Every task gets a child of the manager's token; [`shutdown_all`](Self::shutdown_all)
/// cancels the root and waits for each task, up to the shutdown timeout.
pub struct TaskManager {
    tasks: Vec<NamedTask>,
    global_token: CancellationToken,
    shutdown_timeout: Duration,
}

struct NamedTask {
    name: String,
    handle: JoinHandle<Result<()>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            global_token: CancellationToken::new(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// How long each task may take to finish once cancelled. Services that
    /// wait out a fan cooldown on shutdown need more than the default.
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Spawns `task_fn` with its own child cancellation token.
    pub fn spawn_task<F, Fut>(&mut self, name: impl Into<String>, task_fn: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let token = self.global_token.child_token();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let result = task_fn(token).await;
            match &result {
                Ok(()) => info!("Task '{task_name}' finished"),
                Err(e) => error!("Task '{task_name}' failed: {e:#}"),
            }
            result
        });

        info!("Task '{name}' spawned");
        self.tasks.push(NamedTask { name, handle });
    }

    /// Cancels every task and waits for them in spawn order.
    ///
    /// Returns the first failure, panic or timeout encountered.
    pub async fn shutdown_all(&mut self) -> Result<()> {
        info!("Stopping all {} tasks", self.tasks.len());
        self.global_token.cancel();

        let mut first_error = None;
        for NamedTask { name, handle } in self.tasks.drain(..) {
            let outcome = match timeout(self.shutdown_timeout, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(anyhow!("task panicked: {e}")),
                Err(_) => Err(anyhow!(
                    "did not stop within {:?}",
                    self.shutdown_timeout
                )),
            };
            if let Err(e) = outcome {
                warn!("Task '{name}' failed during shutdown: {e:#}");
                first_error.get_or_insert(e.context(format!("task '{name}'")));
            }
        }

        match first_error {
            Some(error) => Err(error).context("One or more tasks failed during shutdown"),
            None => {
                info!("All tasks stopped");
                Ok(())
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|task| !task.handle.is_finished())
            .count()
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}
