//! Gateway Events
//!
//! Outbound fan-out to the warehouse software. Events are published on a
//! `tokio::sync::broadcast` channel; any number of subscribers may listen
//! and a slow subscriber only lags its own receiver. Task outcomes are
//! emitted exactly once per `(task_id, outcome)` — the executor's outcome
//! guard enforces that, not the bus.

use tokio::sync::broadcast;
use tracing::debug;

use crate::error::ErrorDetail;
use crate::model::{DeviceStatus, Location};

/// Default buffer depth per subscriber.
const DEFAULT_CAPACITY: usize = 256;

/// Everything the gateway reports to the outside world.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// A device read a pallet barcode during an inbound move; the external
    /// validator is expected to answer with `send_validation_result`.
    BarcodeReceived {
        device_id: String,
        task_id: String,
        barcode: String,
        /// Device location at read time, when it could be read.
        location: Option<Location>,
    },
    TaskSucceeded {
        device_id: String,
        task_id: String,
    },
    TaskFailed {
        device_id: String,
        task_id: String,
        detail: ErrorDetail,
    },
    TaskCancelled {
        device_id: String,
        task_id: String,
    },
    DeviceStatusChanged {
        device_id: String,
        status: DeviceStatus,
        previous: DeviceStatus,
    },
}

impl GatewayEvent {
    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BarcodeReceived { .. } => "barcode_received",
            Self::TaskSucceeded { .. } => "task_succeeded",
            Self::TaskFailed { .. } => "task_failed",
            Self::TaskCancelled { .. } => "task_cancelled",
            Self::DeviceStatusChanged { .. } => "device_status_changed",
        }
    }
}

/// Cloneable handle to the gateway's broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GatewayEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Publishing with no subscribers is not an error;
    /// the event is simply dropped.
    pub fn emit(&self, event: GatewayEvent) {
        debug!(kind = event.kind(), "emitting gateway event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
