//! Gateway Façade
//!
//! Wires the pool, monitor, dispatcher, executor and validator together
//! and exposes the operational API the warehouse software calls. The
//! executor↔dispatcher cycle is resolved by post-construction wiring: the
//! dispatcher publishes assignments on a channel, a gateway-owned pump
//! feeds them to the executor, and the executor reports completions back
//! through an `Arc` handle — neither component owns the other.
//!
//! A process-wide singleton cell is offered for embeddings that want one
//! ([`init_global`] / [`global`] / [`dispose_global`]); the gateway itself
//! is instance-based and freely constructible.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use crate::barcode::{self, BarcodeRequest, BarcodeValidator};
use crate::command::{ActivePolls, CommandExecutor};
use crate::config::GatewayConfig;
use crate::dispatch::{TaskAssignment, TaskDispatcher};
use crate::error::{codes, GatewayError, GatewayResult};
use crate::events::{EventBus, GatewayEvent};
use crate::model::{DeviceInfo, DeviceStatus, Direction, Location, TransportTask};
use crate::monitor::DeviceMonitor;
use crate::plc::{ConnectionPool, ConnectorFactory};

pub struct Gateway {
    config: GatewayConfig,
    pool: Arc<ConnectionPool>,
    monitor: Arc<DeviceMonitor>,
    dispatcher: Arc<TaskDispatcher>,
    validator: Arc<BarcodeValidator>,
    executor: Arc<CommandExecutor>,
    events: EventBus,
    pumps: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl Gateway {
    /// Build and wire a gateway. Must be called from within a tokio
    /// runtime; the internal pump tasks are spawned here.
    pub fn new(
        config: GatewayConfig,
        factory: Arc<dyn ConnectorFactory>,
    ) -> GatewayResult<Arc<Self>> {
        config.validate()?;

        let events = EventBus::default();
        let pool = Arc::new(ConnectionPool::new(
            factory,
            config.devices.clone(),
            config.mode,
            config.plc.clone(),
        ));
        let monitor = Arc::new(DeviceMonitor::new(
            pool.clone(),
            config.device_monitor.clone(),
            config.mode,
            events.clone(),
        ));
        let (dispatcher, assignment_rx) = TaskDispatcher::new(
            monitor.clone(),
            pool.clone(),
            config.task_dispatcher.clone(),
        );
        // One active-poll registry shared by the executor and the
        // validator, so verdict-write failures land on the running
        // task's outcome handle.
        let polls = ActivePolls::new();
        let (validator, request_rx) = BarcodeValidator::new(
            dispatcher.clone(),
            monitor.clone(),
            pool.clone(),
            polls.clone(),
            config.barcode_handler.clone(),
        );
        let executor = Arc::new(CommandExecutor::new(
            dispatcher.clone(),
            monitor.clone(),
            validator.clone(),
            events.clone(),
            config.task_timeout.clone(),
            polls,
        ));

        let gateway = Arc::new(Self {
            config,
            pool,
            monitor,
            dispatcher,
            validator,
            executor,
            events,
            pumps: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        });
        gateway.spawn_pumps(assignment_rx, request_rx);
        info!(
            devices = gateway.config.devices.len(),
            mode = ?gateway.config.mode,
            "gateway constructed"
        );
        Ok(gateway)
    }

    fn spawn_pumps(
        self: &Arc<Self>,
        mut assignment_rx: mpsc::Receiver<TaskAssignment>,
        request_rx: mpsc::Receiver<BarcodeRequest>,
    ) {
        let mut pumps = self.pumps.lock().expect("pump lock poisoned");

        // Assignments flow from the dispatcher into the executor.
        let executor = self.executor.clone();
        pumps.push(tokio::spawn(async move {
            while let Some(assignment) = assignment_rx.recv().await {
                let task_id = assignment.task.task_id.clone();
                if let Err(e) = executor.execute(assignment).await {
                    error!(task_id = %task_id, error = %e, "assignment execution failed");
                }
            }
        }));

        // Barcode requests re-emerge as BarcodeReceived events.
        pumps.push(tokio::spawn(barcode::run_request_loop(
            self.events.clone(),
            request_rx,
        )));

        // Devices turning idle wake the dispatcher.
        let dispatcher = self.dispatcher.clone();
        let mut status_rx = self.events.subscribe();
        pumps.push(tokio::spawn(async move {
            loop {
                match status_rx.recv().await {
                    Ok(GatewayEvent::DeviceStatusChanged {
                        status: DeviceStatus::Idle,
                        ..
                    }) => dispatcher.handle_device_idle(),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }));
    }

    fn ensure_live(&self) -> GatewayResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(GatewayError::Disposed);
        }
        Ok(())
    }

    // ── Events ────────────────────────────────────────────────────

    /// Subscribe to all gateway events.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    // ── Devices ───────────────────────────────────────────────────

    /// Connect to a device and begin monitoring it.
    pub async fn activate_device(&self, device_id: &str) -> GatewayResult<()> {
        self.ensure_live()?;
        self.monitor.start_monitoring(device_id).await
    }

    /// Stop monitoring a device: cancel any command it is running and
    /// release its connection.
    pub async fn deactivate_device(&self, device_id: &str) -> GatewayResult<()> {
        self.ensure_live()?;
        if let Some(task_id) = self.dispatcher.get_current_task(device_id) {
            self.executor.cancel_task(&task_id);
        }
        self.monitor.stop_monitoring(device_id).await;
        Ok(())
    }

    pub async fn is_connected(&self, device_id: &str) -> bool {
        self.pool.is_connected(device_id).await
    }

    pub fn get_device_status(&self, device_id: &str) -> DeviceStatus {
        self.monitor.get_device_status(device_id)
    }

    pub async fn reset_device_status(&self, device_id: &str) -> GatewayResult<bool> {
        self.ensure_live()?;
        self.monitor.reset_device_status(device_id).await
    }

    /// Test-mode-only full signal reset.
    pub async fn reset_system(&self, device_id: &str) -> GatewayResult<()> {
        self.ensure_live()?;
        self.monitor.reset_system(device_id).await
    }

    pub async fn get_idle_devices(&self) -> Vec<DeviceInfo> {
        self.monitor.get_idle_devices().await
    }

    pub async fn get_actual_location(&self, device_id: &str) -> Option<Location> {
        self.monitor.get_current_location(device_id).await
    }

    // ── Commands ──────────────────────────────────────────────────

    /// Submit one transport task.
    pub async fn send_command(&self, task: TransportTask) -> GatewayResult<()> {
        self.send_multiple_commands(vec![task]).await
    }

    /// Submit a batch of transport tasks. Validation is synchronous and
    /// all-or-nothing: duplicate or malformed tasks reject the whole
    /// batch with no event emitted and the queue unchanged.
    pub async fn send_multiple_commands(
        &self,
        tasks: Vec<TransportTask>,
    ) -> GatewayResult<()> {
        self.ensure_live()?;
        if tasks.is_empty() {
            return Err(GatewayError::Validation(
                "task list must not be empty".into(),
            ));
        }

        let mut seen = HashSet::new();
        for task in &tasks {
            task.validate()?;
            if !seen.insert(task.task_id.as_str()) {
                return Err(GatewayError::Validation(format!(
                    "duplicate task_id in batch: {}",
                    task.task_id
                )));
            }
        }

        // Pinned tasks require the device to be under software control.
        for task in &tasks {
            if let Some(device_id) = &task.device_id {
                let profile = self.config.device(device_id).ok_or_else(|| {
                    GatewayError::coded(
                        codes::DEVICE_NOT_REGISTERED,
                        format!("device {device_id} is not registered"),
                    )
                })?;
                let connector = self.pool.get_or_create(device_id).await?;
                let connected = connector
                    .read_bool(&profile.signals.connected_to_software)
                    .await?;
                if !connected {
                    return Err(GatewayError::InvalidOperation(format!(
                        "device {device_id} is not connected to software control"
                    )));
                }
            }
        }

        self.dispatcher.enqueue_tasks(tasks)
    }

    // ── Validation ────────────────────────────────────────────────

    /// Deliver the external barcode verdict for an inbound task.
    pub async fn send_validation_result(
        &self,
        device_id: &str,
        task_id: &str,
        is_valid: bool,
        target: Option<Location>,
        direction: Direction,
        gate_number: u16,
    ) -> GatewayResult<()> {
        self.ensure_live()?;
        if device_id.trim().is_empty() || task_id.trim().is_empty() {
            return Err(GatewayError::Validation(
                "device_id and task_id must not be empty".into(),
            ));
        }
        if is_valid && target.is_none() {
            return Err(GatewayError::Validation(
                "a valid verdict requires a target location".into(),
            ));
        }
        self.validator
            .send_validation_result(device_id, task_id, is_valid, target, direction, gate_number)
            .await
    }

    // ── Queue ─────────────────────────────────────────────────────

    pub fn pause_queue(&self) {
        self.dispatcher.pause();
    }

    pub fn resume_queue(&self) {
        self.dispatcher.resume();
    }

    pub fn is_queue_paused(&self) -> bool {
        self.dispatcher.is_paused()
    }

    /// Snapshot of the queued (not yet assigned) tasks in dispatch order.
    pub fn get_pending_tasks(&self) -> Vec<TransportTask> {
        self.dispatcher.get_queued_tasks()
    }

    /// Remove queued tasks by id. Returns false while the queue is
    /// running (removal needs a paused queue) and for ids that were not
    /// removable; tasks already assigned to a device are never removed.
    pub fn remove_transport_tasks(&self, task_ids: &[String]) -> GatewayResult<bool> {
        self.ensure_live()?;
        if task_ids.is_empty() {
            return Err(GatewayError::Validation(
                "task id list must not be empty".into(),
            ));
        }
        if !self.dispatcher.is_paused() {
            debug!("task removal refused: queue is not paused");
            return Ok(false);
        }
        Ok(self.dispatcher.remove_tasks(task_ids))
    }

    pub fn get_current_task(&self, device_id: &str) -> Option<String> {
        self.dispatcher.get_current_task(device_id)
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// Tear the gateway down: stop dispatching, cancel every active
    /// poll, stop the pumps and release all connections. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("gateway disposing");
        self.dispatcher.dispose();
        self.executor.dispose();
        for pump in self.pumps.lock().expect("pump lock poisoned").drain(..) {
            pump.abort();
        }
        self.pool.dispose().await;
    }
}

// ── Process-wide singleton cell ───────────────────────────────────

enum GlobalState {
    Uninitialized,
    Initialized(Arc<Gateway>),
    Disposed,
}

static GLOBAL: Mutex<GlobalState> = Mutex::new(GlobalState::Uninitialized);

/// Install a gateway as the process-wide instance. Fails when one is
/// already installed, and permanently after [`dispose_global`].
pub fn init_global(gateway: Arc<Gateway>) -> GatewayResult<()> {
    let mut global = GLOBAL.lock().expect("global cell poisoned");
    match &*global {
        GlobalState::Uninitialized => {
            *global = GlobalState::Initialized(gateway);
            Ok(())
        }
        GlobalState::Initialized(_) => Err(GatewayError::InvalidOperation(
            "global gateway is already initialized".into(),
        )),
        GlobalState::Disposed => Err(GatewayError::InvalidOperation(
            "global gateway was disposed; re-initialization is not allowed".into(),
        )),
    }
}

/// The process-wide instance, if one is installed.
pub fn global() -> Option<Arc<Gateway>> {
    match &*GLOBAL.lock().expect("global cell poisoned") {
        GlobalState::Initialized(gateway) => Some(gateway.clone()),
        _ => None,
    }
}

/// Dispose the process-wide instance. The cell stays disposed for the
/// rest of the process lifetime.
pub async fn dispose_global() -> GatewayResult<()> {
    let gateway = {
        let mut global = GLOBAL.lock().expect("global cell poisoned");
        match std::mem::replace(&mut *global, GlobalState::Disposed) {
            GlobalState::Initialized(gateway) => gateway,
            GlobalState::Uninitialized => {
                return Err(GatewayError::InvalidOperation(
                    "global gateway was never initialized".into(),
                ))
            }
            GlobalState::Disposed => {
                return Err(GatewayError::InvalidOperation(
                    "global gateway is already disposed".into(),
                ))
            }
        }
    };
    gateway.dispose().await;
    Ok(())
}
