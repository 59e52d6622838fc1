//! Command Executor
//!
//! Owns the active polling tasks, one per executing transport task, each
//! with its own cancellation token. `execute` validates the assignment,
//! triggers the strategy, and spawns the polling loop; the registration
//! disappears (and the token with it) when the poll finishes, however it
//! finishes. Trigger and polling failures are mapped onto coded
//! `TaskFailed` events before the error reaches the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::barcode::BarcodeValidator;
use crate::config::TaskTimeoutConfig;
use crate::dispatch::{TaskAssignment, TaskDispatcher};
use crate::error::{codes, ErrorDetail, GatewayError, GatewayResult, PlcError};
use crate::events::EventBus;
use crate::model::CommandType;
use crate::monitor::DeviceMonitor;

use super::inbound::InboundStrategy;
use super::outbound::OutboundStrategy;
use super::outcome::OutcomeHandle;
use super::strategy::{run_poll, CommandStrategy, PollContext};
use super::transfer::TransferStrategy;

struct ActivePoll {
    token: CancellationToken,
    outcome: Arc<OutcomeHandle>,
}

/// Shared registry of active polls, keyed by task id.
///
/// The executor registers every running poll here. The barcode validator
/// holds the same registry so a failed verdict write reaches the task's
/// own [`OutcomeHandle`] instead of emitting a second, independent
/// outcome.
#[derive(Clone, Default)]
pub struct ActivePolls {
    inner: Arc<Mutex<HashMap<String, ActivePoll>>>,
}

impl ActivePolls {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &self,
        task_id: String,
        token: CancellationToken,
        outcome: Arc<OutcomeHandle>,
    ) {
        self.inner
            .lock()
            .expect("active lock poisoned")
            .insert(task_id, ActivePoll { token, outcome });
    }

    fn remove(&self, task_id: &str) {
        self.inner
            .lock()
            .expect("active lock poisoned")
            .remove(task_id);
    }

    /// The outcome handle of a running task's poll.
    pub fn outcome(&self, task_id: &str) -> Option<Arc<OutcomeHandle>> {
        self.inner
            .lock()
            .expect("active lock poisoned")
            .get(task_id)
            .map(|poll| poll.outcome.clone())
    }

    /// Cancel the poll for a task. Returns false when none is registered
    /// under that id.
    pub fn cancel(&self, task_id: &str) -> bool {
        let inner = self.inner.lock().expect("active lock poisoned");
        match inner.get(task_id) {
            Some(poll) => {
                debug!(task_id, "cancelling active poll");
                poll.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel and forget every registered poll.
    pub fn cancel_all(&self) {
        let mut inner = self.inner.lock().expect("active lock poisoned");
        for (task_id, poll) in inner.drain() {
            debug!(task_id, "cancelling poll on dispose");
            poll.token.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("active lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct CommandExecutor {
    dispatcher: Arc<TaskDispatcher>,
    monitor: Arc<DeviceMonitor>,
    validator: Arc<BarcodeValidator>,
    events: EventBus,
    timeouts: TaskTimeoutConfig,
    active: ActivePolls,
}

impl CommandExecutor {
    pub fn new(
        dispatcher: Arc<TaskDispatcher>,
        monitor: Arc<DeviceMonitor>,
        validator: Arc<BarcodeValidator>,
        events: EventBus,
        timeouts: TaskTimeoutConfig,
        active: ActivePolls,
    ) -> Self {
        Self {
            dispatcher,
            monitor,
            validator,
            events,
            timeouts,
            active,
        }
    }

    /// Run one assignment: trigger the command and start its polling
    /// loop. Exactly one outcome event will follow, emitted either by the
    /// poll or by the failure mapping below.
    pub async fn execute(&self, assignment: TaskAssignment) -> GatewayResult<()> {
        let TaskAssignment {
            task,
            priority: _,
            profile,
            connector,
        } = assignment;

        if task.task_id.trim().is_empty() || profile.id.trim().is_empty() {
            return Err(GatewayError::Validation(
                "assignment with empty task or device id".into(),
            ));
        }
        task.validate()?;

        let strategy: Arc<dyn CommandStrategy> = match task.command_type {
            CommandType::Inbound => Arc::new(InboundStrategy::new(self.validator.clone())),
            CommandType::Outbound => Arc::new(OutboundStrategy),
            CommandType::Transfer => Arc::new(TransferStrategy),
        };

        let token = CancellationToken::new();
        let outcome = OutcomeHandle::new(
            task.task_id.clone(),
            profile.id.clone(),
            self.dispatcher.clone(),
            self.monitor.clone(),
            self.events.clone(),
            token.clone(),
        );
        let ctx = PollContext {
            timeout: self.timeouts.timeout_for(task.command_type),
            timeout_minutes: self.timeouts.minutes_for(task.command_type),
            device_id: profile.id.clone(),
            signals: profile.signals.clone(),
            connector,
            token: token.clone(),
            outcome: outcome.clone(),
            task: task.clone(),
        };

        debug!(task_id = %task.task_id, device_id = %profile.id, command = %task.command_type, "triggering command");
        if let Err(e) = strategy.trigger(&ctx).await {
            let detail = trigger_failure_detail(&e);
            outcome.failed(detail);
            return Err(e.into());
        }

        self.active
            .register(task.task_id.clone(), token.clone(), outcome.clone());

        let active = self.active.clone();
        let task_id = task.task_id.clone();
        tokio::spawn(async move {
            if let Err(e) = run_poll(strategy, ctx).await {
                // A failed signal read ends the poll; surface it as the
                // task's terminal outcome.
                warn!(task_id = %task_id, error = %e, "polling aborted");
                outcome.failed(e.to_detail());
            }
            active.remove(&task_id);
        });
        Ok(())
    }

    /// Cancel the active poll for a task. Returns false when no poll is
    /// registered under that id.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        self.active.cancel(task_id)
    }

    /// Cancel and release every outstanding poll.
    pub fn dispose(&self) {
        self.active.cancel_all();
    }

    /// Number of polls currently registered.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

/// Trigger failures map onto the executor's error categories: connection
/// problems and timeouts keep their codes, anything else is an execution
/// exception.
fn trigger_failure_detail(error: &PlcError) -> ErrorDetail {
    match error {
        PlcError::ConnectionFailed { .. } | PlcError::NotConnected => {
            ErrorDetail::new(codes::PLC_CONNECTION_FAILED, "PLC connection failed")
                .with_cause(error)
        }
        PlcError::Timeout { .. } => {
            ErrorDetail::new(codes::TIMEOUT, "command trigger timed out").with_cause(error)
        }
        _ => ErrorDetail::new(codes::EXECUTION_EXCEPTION, "command trigger failed")
            .with_cause(error),
    }
}
