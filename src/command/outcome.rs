//! Task Outcome Handling
//!
//! One [`OutcomeHandle`] exists per executing task. It funnels every
//! success/failure/cancel emission through a single claim flag so that
//! exactly one terminal outcome leaves the gateway per task, no matter
//! how many paths (polling loop, alarm resolution, barcode validation,
//! executor cleanup) race to report one.
//!
//! A terminal emission also releases the device's assignment and cancels
//! the poll token, so sibling work unwinds promptly.
//!
//! An alarm observed mid-poll is reported as a non-terminal `TaskFailed`:
//! the assignment stays in place while the alarm-resolution loop decides
//! whether the task ultimately cancels or completes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dispatch::TaskDispatcher;
use crate::error::ErrorDetail;
use crate::events::{EventBus, GatewayEvent};
use crate::model::DeviceStatus;
use crate::monitor::DeviceMonitor;

pub struct OutcomeHandle {
    task_id: String,
    device_id: String,
    dispatcher: Arc<TaskDispatcher>,
    monitor: Arc<DeviceMonitor>,
    events: EventBus,
    token: CancellationToken,
    claimed: AtomicBool,
}

impl OutcomeHandle {
    pub fn new(
        task_id: String,
        device_id: String,
        dispatcher: Arc<TaskDispatcher>,
        monitor: Arc<DeviceMonitor>,
        events: EventBus,
        token: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            task_id,
            device_id,
            dispatcher,
            monitor,
            events,
            token,
            claimed: AtomicBool::new(false),
        })
    }

    /// Whether a terminal outcome has already been emitted.
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// The command completed. Releases the assignment, emits
    /// `TaskSucceeded`, returns the device to Idle.
    pub fn succeeded(&self) {
        if !self.claim() {
            return;
        }
        info!(task_id = %self.task_id, device_id = %self.device_id, "task succeeded");
        self.dispatcher
            .complete_task_assignment(&self.device_id, &self.task_id);
        self.events.emit(GatewayEvent::TaskSucceeded {
            device_id: self.device_id.clone(),
            task_id: self.task_id.clone(),
        });
        self.monitor
            .update_device_status(&self.device_id, DeviceStatus::Idle);
    }

    /// The device raised its cancel bit. Releases the assignment, emits
    /// `TaskCancelled`, puts the device in Error for operator attention.
    pub fn cancelled(&self) {
        if !self.claim() {
            return;
        }
        info!(task_id = %self.task_id, device_id = %self.device_id, "task cancelled by device");
        self.dispatcher
            .complete_task_assignment(&self.device_id, &self.task_id);
        self.events.emit(GatewayEvent::TaskCancelled {
            device_id: self.device_id.clone(),
            task_id: self.task_id.clone(),
        });
        self.monitor
            .update_device_status(&self.device_id, DeviceStatus::Error);
    }

    /// Terminal failure. Failures that require manual resume (device
    /// running failures, lost PLC connections) also put the device in
    /// Error and pause the dispatcher before the assignment is released.
    pub fn failed(&self, detail: ErrorDetail) {
        if !self.claim() {
            return;
        }
        warn!(
            task_id = %self.task_id,
            device_id = %self.device_id,
            "task failed: {}",
            detail.full_message()
        );
        if detail.requires_manual_resume() {
            self.monitor
                .update_device_status(&self.device_id, DeviceStatus::Error);
            self.dispatcher.pause_for_failure(&detail);
        }
        self.dispatcher
            .complete_task_assignment(&self.device_id, &self.task_id);
        self.events.emit(GatewayEvent::TaskFailed {
            device_id: self.device_id.clone(),
            task_id: self.task_id.clone(),
            detail,
        });
    }

    /// Terminal failure that always halts dispatching, whatever the
    /// failure code. Used for PLC faults outside the polling loop, such
    /// as a validation verdict that never reached the device.
    pub fn failed_requiring_resume(&self, detail: ErrorDetail) {
        if !self.claim() {
            return;
        }
        warn!(
            task_id = %self.task_id,
            device_id = %self.device_id,
            "task failed: {}",
            detail.full_message()
        );
        self.monitor
            .update_device_status(&self.device_id, DeviceStatus::Error);
        self.dispatcher.pause_for_failure(&detail);
        self.dispatcher
            .complete_task_assignment(&self.device_id, &self.task_id);
        self.events.emit(GatewayEvent::TaskFailed {
            device_id: self.device_id.clone(),
            task_id: self.task_id.clone(),
            detail,
        });
    }

    /// Non-terminal failure report for an observed alarm. The assignment
    /// stays in place; the alarm-resolution loop will produce the
    /// terminal outcome (or leave the task for operator recovery).
    pub fn failed_pending_resolution(&self, detail: ErrorDetail) {
        if self.is_claimed() {
            return;
        }
        warn!(
            task_id = %self.task_id,
            device_id = %self.device_id,
            "device alarm: {}",
            detail.full_message()
        );
        self.monitor
            .update_device_status(&self.device_id, DeviceStatus::Error);
        self.dispatcher.pause_for_failure(&detail);
        self.events.emit(GatewayEvent::TaskFailed {
            device_id: self.device_id.clone(),
            task_id: self.task_id.clone(),
            detail,
        });
    }

    fn claim(&self) -> bool {
        if self.claimed.swap(true, Ordering::AcqRel) {
            return false;
        }
        // Stop any sibling work (poll loop, pending validation) for this
        // task.
        self.token.cancel();
        true
    }
}
