//! Barcode Validation
//!
//! Pairs a device-initiated barcode read with the external validator's
//! verdict. `send_barcode` registers a pending entry, publishes a
//! [`BarcodeRequest`] onto a bounded channel (re-emitted to subscribers
//! as `BarcodeReceived` by the drain loop), and awaits the verdict that
//! `send_validation_result` delivers, all under a timeout. The verdict
//! writes the valid/invalid bit pair plus routing back to the PLC.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::command::ActivePolls;
use crate::config::BarcodeConfig;
use crate::dispatch::TaskDispatcher;
use crate::error::{codes, ErrorDetail, GatewayError, GatewayResult, PlcResult};
use crate::events::{EventBus, GatewayEvent};
use crate::model::{Direction, Location, SignalMap};
use crate::monitor::DeviceMonitor;
use crate::plc::{ConnectionPool, PlcConnector};

/// How many times a full request channel is retried before the task
/// fails.
const SEND_RETRIES: usize = 3;

/// Backoff between channel retries.
const SEND_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A barcode awaiting an external verdict.
#[derive(Debug, Clone)]
pub struct BarcodeRequest {
    pub device_id: String,
    pub task_id: String,
    pub barcode: String,
    pub location: Option<Location>,
}

struct PendingValidation {
    device_id: String,
    verdict_tx: oneshot::Sender<Result<(), ErrorDetail>>,
}

pub struct BarcodeValidator {
    pending: Mutex<HashMap<String, PendingValidation>>,
    request_tx: mpsc::Sender<BarcodeRequest>,
    dispatcher: Arc<TaskDispatcher>,
    monitor: Arc<DeviceMonitor>,
    pool: Arc<ConnectionPool>,
    /// Active-poll registry shared with the executor, so a failed verdict
    /// write reaches the task's own outcome handle.
    polls: ActivePolls,
    config: BarcodeConfig,
}

impl BarcodeValidator {
    /// Build the validator and the receiving end of its request channel.
    /// Channel capacity equals the device count (minimum 1). The gateway
    /// wires the receiver into [`run_request_loop`].
    pub fn new(
        dispatcher: Arc<TaskDispatcher>,
        monitor: Arc<DeviceMonitor>,
        pool: Arc<ConnectionPool>,
        polls: ActivePolls,
        config: BarcodeConfig,
    ) -> (Arc<Self>, mpsc::Receiver<BarcodeRequest>) {
        let (request_tx, request_rx) = mpsc::channel(pool.device_count().max(1));
        let validator = Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            request_tx,
            dispatcher,
            monitor,
            pool,
            polls,
            config,
        });
        (validator, request_rx)
    }

    /// Assemble a barcode from the ten character words, read in parallel.
    ///
    /// The result is the prefix of single-character words; assembly stops
    /// at the first empty or multi-character word. Any read error yields
    /// an empty string so the inbound loop simply tries again next tick.
    pub async fn read_barcode(
        &self,
        connector: &Arc<dyn PlcConnector>,
        signals: &SignalMap,
    ) -> String {
        let word_count = self.config.max_barcode_length.min(signals.barcode_chars.len());
        let reads = signals.barcode_chars[..word_count]
            .iter()
            .map(|address| connector.read_char_word(address));
        let words: Vec<PlcResult<String>> = join_all(reads).await;

        let mut barcode = String::new();
        for word in words {
            match word {
                Ok(w) if w.chars().count() == 1 => barcode.push_str(&w),
                Ok(_) => break,
                Err(e) => {
                    debug!(error = %e, "barcode read failed");
                    return String::new();
                }
            }
        }
        barcode
    }

    /// Register a pending validation and publish the barcode to the
    /// external validator, then await the verdict.
    ///
    /// Fails when the request channel stays full after the retries,
    /// when the verdict names a different device, or when no verdict
    /// arrives within the validation timeout.
    pub async fn send_barcode(
        &self,
        device_id: &str,
        task_id: &str,
        barcode: &str,
    ) -> GatewayResult<()> {
        let (verdict_tx, verdict_rx) = oneshot::channel();
        self.pending.lock().expect("pending lock poisoned").insert(
            task_id.to_string(),
            PendingValidation {
                device_id: device_id.to_string(),
                verdict_tx,
            },
        );

        let location = self.monitor.get_current_location(device_id).await;
        let mut request = BarcodeRequest {
            device_id: device_id.to_string(),
            task_id: task_id.to_string(),
            barcode: barcode.to_string(),
            location,
        };
        info!(device_id, task_id, barcode, "barcode read; requesting validation");

        let mut sent = false;
        for attempt in 1..=SEND_RETRIES {
            match self.request_tx.try_send(request) {
                Ok(()) => {
                    sent = true;
                    break;
                }
                Err(mpsc::error::TrySendError::Full(returned)) => {
                    warn!(task_id, attempt, "barcode channel full; backing off");
                    request = returned;
                    tokio::time::sleep(SEND_RETRY_DELAY).await;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
        if !sent {
            self.pending
                .lock()
                .expect("pending lock poisoned")
                .remove(task_id);
            return Err(GatewayError::coded(
                codes::VALIDATION_EXCEPTION,
                format!("barcode for task {task_id} could not be published for validation"),
            ));
        }

        match tokio::time::timeout(self.config.validation_timeout(), verdict_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(detail))) => Err(GatewayError::Detail(detail)),
            Ok(Err(_dropped)) => Err(GatewayError::coded(
                codes::VALIDATION_EXCEPTION,
                format!("validation for task {task_id} was abandoned"),
            )),
            Err(_elapsed) => {
                self.pending
                    .lock()
                    .expect("pending lock poisoned")
                    .remove(task_id);
                Err(GatewayError::coded(
                    codes::VALIDATION_EXCEPTION,
                    format!(
                        "no validation verdict for task {} within {} minutes",
                        task_id, self.config.validation_timeout_minutes
                    ),
                ))
            }
        }
    }

    /// Complete the pending validation for `task_id` when the device
    /// matches. A device mismatch fails the pending entry; a missing
    /// entry is reported to the caller as not found.
    pub fn try_complete_validation_task(&self, task_id: &str, device_id: &str) -> bool {
        self.complete_validation(task_id, device_id).is_ok()
    }

    fn complete_validation(&self, task_id: &str, device_id: &str) -> GatewayResult<()> {
        let entry = self
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(task_id);
        match entry {
            Some(pending) if pending.device_id == device_id => {
                let _ = pending.verdict_tx.send(Ok(()));
                Ok(())
            }
            Some(pending) => {
                let detail = ErrorDetail::new(
                    codes::MISMATCHED_DEVICE,
                    format!(
                        "validation for task {} belongs to device {}, not {}",
                        task_id, pending.device_id, device_id
                    ),
                );
                let _ = pending.verdict_tx.send(Err(detail.clone()));
                Err(GatewayError::Detail(detail))
            }
            None => Err(GatewayError::coded(
                codes::NOT_FOUND_TASK,
                format!("no pending validation for task {task_id}"),
            )),
        }
    }

    /// Deliver the external verdict and write it back to the PLC.
    ///
    /// A valid barcode writes the valid/invalid pair plus the routing
    /// target, direction and gate; an invalid barcode writes only the
    /// inverse bit pair. A PLC failure fails the task through its own
    /// outcome handle, which stops the running poll, releases the
    /// assignment and pauses the dispatcher.
    pub async fn send_validation_result(
        &self,
        device_id: &str,
        task_id: &str,
        is_valid: bool,
        target: Option<Location>,
        direction: Direction,
        gate_number: u16,
    ) -> GatewayResult<()> {
        self.complete_validation(task_id, device_id)?;

        let profile = self
            .pool
            .profile(device_id)
            .ok_or_else(|| {
                GatewayError::coded(
                    codes::DEVICE_NOT_REGISTERED,
                    format!("device {device_id} is not registered"),
                )
            })?
            .clone();
        let signals = &profile.signals;
        let connector = self.pool.get_or_create(device_id).await?;

        let write_result: PlcResult<()> = async {
            if is_valid {
                let target = target.ok_or_else(|| crate::error::PlcError::WriteFailed {
                    address: signals.target_floor.clone(),
                    reason: "valid verdict without a target location".to_string(),
                })?;
                connector.write_bool(&signals.barcode_valid, true).await?;
                connector.write_bool(&signals.barcode_invalid, false).await?;
                connector.write_i16(&signals.target_floor, target.floor).await?;
                connector.write_i16(&signals.target_rail, target.rail).await?;
                connector.write_i16(&signals.target_block, target.block).await?;
                connector
                    .write_bool(&signals.in_dir_block, direction.as_plc_bool())
                    .await?;
                connector
                    .write_i16(&signals.gate_number, gate_number as i16)
                    .await?;
            } else {
                connector.write_bool(&signals.barcode_valid, false).await?;
                connector.write_bool(&signals.barcode_invalid, true).await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = write_result {
            let detail = ErrorDetail::new(
                codes::VALIDATION_EXCEPTION,
                "validation result could not be written to the device",
            )
            .with_cause(&e);
            warn!(device_id, task_id, "validation write failed: {}", detail.full_message());
            match self.polls.outcome(task_id) {
                // The task's poll owns the terminal outcome: claiming it
                // here cancels the poll and keeps the emission unique.
                Some(outcome) => outcome.failed_requiring_resume(detail),
                // The poll already finished (and emitted); still halt
                // dispatching until an operator looks at the device.
                None => self.dispatcher.pause_for_failure(&detail),
            }
            return Err(GatewayError::Plc(e));
        }

        info!(device_id, task_id, is_valid, "validation result written");
        Ok(())
    }

    /// Number of validations awaiting a verdict.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending lock poisoned").len()
    }
}

/// Drain loop: re-emit each queued barcode request as a `BarcodeReceived`
/// event. Runs until the validator side closes the channel.
pub async fn run_request_loop(events: EventBus, mut request_rx: mpsc::Receiver<BarcodeRequest>) {
    while let Some(request) = request_rx.recv().await {
        events.emit(GatewayEvent::BarcodeReceived {
            device_id: request.device_id,
            task_id: request.task_id,
            barcode: request.barcode,
            location: request.location,
        });
    }
    debug!("barcode request loop stopped");
}
