//! Lifecycle event system.
//!
//! The orchestrator reports every state change and every surfaced error as a [`LifecycleEvent`].
//! Hosting code registers handlers with the [`EventDispatcher`] to observe the lifecycle; handlers
//! never influence it. A failing handler is logged and the remaining handlers still run.

use crate::recovery::types::{AccountId, ErrorKind, LifecycleState};

use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Stage of the recovery flow an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Resume,
    Provision,
    Install,
    GuardianAcceptance,
    RecoveryRequest,
    RecoveryWait,
    RecoveryCompletion,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resume => "resume",
            Stage::Provision => "provision",
            Stage::Install => "install",
            Stage::GuardianAcceptance => "guardian_acceptance",
            Stage::RecoveryRequest => "recovery_request",
            Stage::RecoveryWait => "recovery_wait",
            Stage::RecoveryCompletion => "recovery_completion",
        };
        f.write_str(name)
    }
}

/// Events emitted while driving an account through its lifecycle
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The account entered a new lifecycle state
    StateChanged {
        account_id: AccountId,
        state: LifecycleState,
    },
    /// An operation failed and the error was returned to the caller
    Error {
        account_id: AccountId,
        kind: ErrorKind,
        stage: Stage,
        message: String,
    },
}

impl LifecycleEvent {
    pub fn account_id(&self) -> &AccountId {
        match self {
            LifecycleEvent::StateChanged { account_id, .. }
            | LifecycleEvent::Error { account_id, .. } => account_id,
        }
    }
}

/// Failure reported by an event handler.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

/// Trait for handling lifecycle events.
#[async_trait::async_trait]
pub trait LifecycleEventHandler: Send + Sync {
    /// Handle a lifecycle event.
    async fn handle(&mut self, event: &LifecycleEvent) -> Result<(), HandlerError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Event dispatcher that manages multiple event handlers.
///
/// Handlers are called in registration order for every event.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Box<dyn LifecycleEventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(&mut self, handler: Box<dyn LifecycleEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Dispatch an event to all registered handlers.
    ///
    /// Errors from handlers are logged, but do not stop other handlers from running.
    pub async fn dispatch(&mut self, event: &LifecycleEvent) {
        for handler in &mut self.handlers {
            if let Err(e) = handler.handle(event).await {
                error!("Handler {} failed to process event: {}", handler.name(), e);
            }
        }
    }
}

/// Writes every event to the tracing log.
pub struct LoggingEventHandler;

#[async_trait::async_trait]
impl LifecycleEventHandler for LoggingEventHandler {
    async fn handle(&mut self, event: &LifecycleEvent) -> Result<(), HandlerError> {
        match event {
            LifecycleEvent::StateChanged { account_id, state } => {
                info!("Account {} is now {}", account_id, state);
            }
            LifecycleEvent::Error {
                account_id,
                kind,
                stage,
                message,
            } => {
                warn!(
                    "Account {} failed during {} ({}): {}",
                    account_id, stage, kind, message
                );
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}

/// Forwards events to a channel, for UIs that consume them elsewhere.
pub struct ChannelEventHandler {
    sender: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelEventHandler {
    /// Create a handler together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait::async_trait]
impl LifecycleEventHandler for ChannelEventHandler {
    async fn handle(&mut self, event: &LifecycleEvent) -> Result<(), HandlerError> {
        self.sender
            .send(event.clone())
            .map_err(|_| HandlerError("subscriber dropped".to_string()))
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingHandler;

    #[async_trait::async_trait]
    impl LifecycleEventHandler for FailingHandler {
        async fn handle(&mut self, _event: &LifecycleEvent) -> Result<(), HandlerError> {
            Err(HandlerError("boom".into()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn state_changed() -> LifecycleEvent {
        LifecycleEvent::StateChanged {
            account_id: AccountId::from("alice"),
            state: LifecycleState::GuardianConfigured,
        }
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_dispatch() {
        let mut dispatcher = EventDispatcher::new();
        let (channel, mut events) = ChannelEventHandler::channel();
        dispatcher.register_handler(Box::new(FailingHandler));
        dispatcher.register_handler(Box::new(channel));

        dispatcher.dispatch(&state_changed()).await;

        assert_eq!(events.recv().await, Some(state_changed()));
    }

    #[tokio::test]
    async fn dropped_subscriber_is_reported_as_handler_error() {
        let (mut channel, events) = ChannelEventHandler::channel();
        drop(events);
        assert!(channel.handle(&state_changed()).await.is_err());
    }

    #[test]
    fn error_event_serializes_with_stage_and_kind() {
        let event = LifecycleEvent::Error {
            account_id: AccountId::from("alice"),
            kind: ErrorKind::RelayRejected,
            stage: Stage::GuardianAcceptance,
            message: "400".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["stage"], "guardian_acceptance");
        assert_eq!(json["kind"], "RelayRejected");
    }
}
