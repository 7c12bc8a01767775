//! Application entry point and builder pattern implementation.

use crate::{config::ConfigManager, coordinator::SystemCoordinator};
use anyhow::{Result, anyhow};

/// The daemon: one drying program from start to cooled-down exit.
///
/// # Example
///
/// ```no_run
/// use dehydratord::application::Application;
/// use dehydratord::config;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config_manager = config::ConfigManager::load_or_default(None).await?;
/// let mut app = Application::builder()
///     .with_config_manager(config_manager)
///     .build()?;
///
/// app.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Application {
    pub coordinator: SystemCoordinator,
    config_manager: ConfigManager,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Runs the complete daemon lifecycle: initialize, start services, and run main loop.
    pub async fn run(&mut self) -> Result<()> {
        self.coordinator
            .initialize(self.config_manager.clone())
            .await?;

        self.coordinator.start_all_services().await?;

        self.coordinator.run_main_loop().await
    }
}

/// Builder pattern for creating Application instances.
pub struct ApplicationBuilder {
    config_manager: Option<ConfigManager>,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self {
            config_manager: None,
        }
    }

    pub fn with_config_manager(mut self, config_manager: ConfigManager) -> Self {
        self.config_manager = Some(config_manager);
        self
    }

    pub fn build(self) -> Result<Application> {
        let config_manager = self
            .config_manager
            .ok_or_else(|| anyhow!("Configuration manager is required"))?;

        Ok(Application {
            coordinator: SystemCoordinator::new(),
            config_manager,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn build_requires_config_manager() {
        assert!(Application::builder().build().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_simulated_program_to_completion() {
        let mut config = Config::default();
        config.control.poll_interval_ms = 500;
        config.control.heater_start_frequency_hz = 1.0;
        config.control.timer_cooldown_seconds = 10;
        config.program.target_temperature = 45.0;
        config.program.run_duration_secs = 900.0;

        let mut app = Application::builder()
            .with_config_manager(ConfigManager::new(config, None))
            .build()
            .unwrap();

        timeout(Duration::from_secs(3600), app.run())
            .await
            .expect("program did not finish")
            .unwrap();
    }
}
