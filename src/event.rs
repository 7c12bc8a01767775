//! Event-driven communication between the controller and its consumers.

use anyhow::Result;
use tokio::sync::broadcast;

use crate::{controller::ControllerPhase, error::ControllerError};

/// Controller events.
///
/// Events are published through the EventBus after the state change they
/// describe, so a subscriber that queries the controller on receipt observes
/// the new state.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A timed run reached its requested duration.
    RunTimeElapsed,
    /// The post-stop fan period ended without an intervening restart.
    CooldownElapsed,
    /// The controller moved to a new phase.
    PhaseChanged(ControllerPhase),
    /// A background task stopped because of a sensor or actuator fault.
    RegulationFault(ControllerError),
    SystemShutdown,
}

/// Event bus for publish-subscribe messaging.
///
/// # Example
///
/// ```no_run
/// use dehydratord::event::{Event, EventBus};
///
/// let event_bus = EventBus::new();
/// let mut subscriber = event_bus.subscribe();
///
/// event_bus.publish(Event::CooldownElapsed);
///
/// // In async context, receive events:
/// // let event = subscriber.recv().await;
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a new EventBus with default capacity.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    #[cfg(test)]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns an error if there are no active subscribers.
    pub fn publish(&self, event: Event) -> Result<()> {
        self.sender.send(event)?;
        Ok(())
    }

    /// Publishes an event, ignoring the absence of subscribers.
    pub(crate) fn notify(&self, event: Event) {
        if let Err(e) = self.publish(event) {
            log::debug!("Event dropped: {e}");
        }
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each subscriber receives all events published after subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
