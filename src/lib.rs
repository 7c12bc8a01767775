//! # dehydratord
//!
//! Closed-loop temperature control for a food dehydrator: a PID regulator
//! drives a PWM heater from a noisy temperature probe while a circulation fan
//! runs for the whole run and a cooldown period after it.
//!
//! ## Architecture
//!
//! - [`DehydratorController`](controller::DehydratorController) - run/cooldown
//!   state machine and the background regulation task
//! - [`EventBus`](event::EventBus) - controller notifications
//! - [`SystemCoordinator`](coordinator::SystemCoordinator) - daemon lifecycle
//! - [`AppState`](app_context::AppState) - shared application state
//! - Service providers running the drying program and status reports
//!
//! The daemon runs against a simulated chamber
//! ([`drivers::SimulatedChamber`]) with its heater relay behind a software
//! PWM ([`drivers::SoftPwm`]).
//!
//! ## Example
//!
//! ```no_run
//! use dehydratord::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config_manager = ConfigManager::load_or_default(None).await?;
//!     Application::builder()
//!         .with_config_manager(config_manager)
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```

pub mod actuators;
pub mod app_context;
pub mod application;
pub mod cli;
pub mod config;
pub mod controller;
pub mod coordinator;
pub mod drivers;
pub mod error;
pub mod event;
pub mod pid;
pub mod providers;
pub mod sensors;
pub mod task_manager;

#[cfg(test)]
pub(crate) mod testing;
