//! Dependency injection providers for service management.
//!
//! Providers build the shared application state and start the daemon's
//! services through the [`TaskManager`](crate::task_manager::TaskManager).

pub mod app_state;
pub mod program;
pub mod status;
pub mod traits;

pub use app_state::AppStateProvider;
pub use program::ProgramServiceProvider;
pub use status::StatusServiceProvider;
pub use traits::{AsyncProvider, ServiceProvider};
