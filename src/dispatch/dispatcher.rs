//! Task Dispatcher
//!
//! Owns the priority queue and the device→task assignment map, and drives
//! the processing loop that turns queued tasks into assignments. The
//! processing pass is single-flight: an atomic flag guarantees at most one
//! concurrent pass across every trigger (enqueue, resume, device-idle,
//! task completion). Assignments are published on an mpsc channel consumed
//! by the command executor, which reports back through
//! [`complete_task_assignment`](TaskDispatcher::complete_task_assignment).
//!
//! Pause semantics distinguish why the dispatcher is paused: an automatic
//! empty-queue pause wakes up by itself when work arrives, while a manual
//! or failure-driven pause holds until an operator calls `resume()`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::DispatcherConfig;
use crate::error::{codes, ErrorDetail, GatewayError, GatewayResult};
use crate::model::{
    DeviceProfile, DispatcherState, TaskPriority, TransportTask,
};
use crate::monitor::DeviceMonitor;
use crate::plc::{ConnectionPool, PlcConnector};

use super::assignment::HybridAssignment;
use super::queue::PriorityTaskQueue;

/// Bound on the synchronous readiness re-read before committing an
/// assignment. The check is an optimization against races; when it cannot
/// complete quickly we proceed optimistically.
const READY_CHECK_TIMEOUT: Duration = Duration::from_millis(250);

/// An assignment handed to the command executor.
pub struct TaskAssignment {
    pub task: TransportTask,
    pub priority: TaskPriority,
    pub profile: DeviceProfile,
    pub connector: Arc<dyn PlcConnector>,
}

struct DispatchState {
    state: DispatcherState,
    /// True when the current pause came from the empty-queue auto-pause
    /// (or the initial state) and may be lifted automatically.
    auto_paused: bool,
}

pub struct TaskDispatcher {
    queue: Mutex<PriorityTaskQueue>,
    assignments: Mutex<HashMap<String, String>>,
    state: Mutex<DispatchState>,
    /// Single-flight guard for the processing pass.
    processing: AtomicBool,
    /// A trigger arrived while a pass held the flag; run another pass.
    pending_pass: AtomicBool,
    strategy: HybridAssignment,
    monitor: Arc<DeviceMonitor>,
    pool: Arc<ConnectionPool>,
    profiles: HashMap<String, DeviceProfile>,
    assignment_tx: mpsc::Sender<TaskAssignment>,
    config: DispatcherConfig,
}

impl TaskDispatcher {
    /// Build the dispatcher and the receiving end of its assignment
    /// channel. The gateway wires the receiver to the executor after
    /// construction, so neither component owns the other.
    pub fn new(
        monitor: Arc<DeviceMonitor>,
        pool: Arc<ConnectionPool>,
        config: DispatcherConfig,
    ) -> (Arc<Self>, mpsc::Receiver<TaskAssignment>) {
        let (assignment_tx, assignment_rx) =
            mpsc::channel(pool.device_count().max(1));
        let profiles = pool
            .profiles()
            .map(|p| (p.id.clone(), p.clone()))
            .collect();
        let initial = if config.auto_pause_when_empty {
            DispatchState {
                state: DispatcherState::Paused,
                auto_paused: true,
            }
        } else {
            DispatchState {
                state: DispatcherState::Running,
                auto_paused: false,
            }
        };
        let dispatcher = Arc::new(Self {
            queue: Mutex::new(PriorityTaskQueue::new()),
            assignments: Mutex::new(HashMap::new()),
            state: Mutex::new(initial),
            processing: AtomicBool::new(false),
            pending_pass: AtomicBool::new(false),
            strategy: HybridAssignment::new(),
            monitor,
            pool,
            profiles,
            assignment_tx,
            config,
        });
        (dispatcher, assignment_rx)
    }

    // ── State machine ─────────────────────────────────────────────

    pub fn state(&self) -> DispatcherState {
        self.state.lock().expect("state lock poisoned").state
    }

    pub fn is_paused(&self) -> bool {
        self.state() == DispatcherState::Paused
    }

    /// Operator pause. Idempotent; holds until an explicit `resume()`.
    pub fn pause(&self) {
        let mut state = self.state.lock().expect("state lock poisoned");
        if state.state == DispatcherState::Running {
            info!("dispatcher paused");
            state.state = DispatcherState::Paused;
        }
        state.auto_paused = false;
    }

    /// Pause after a failure that requires operator intervention.
    pub fn pause_for_failure(&self, detail: &ErrorDetail) {
        let mut state = self.state.lock().expect("state lock poisoned");
        if state.state != DispatcherState::Disposed {
            warn!(code = detail.code, "dispatcher paused pending manual resume");
            state.state = DispatcherState::Paused;
            state.auto_paused = false;
        }
    }

    /// Operator resume. Idempotent; schedules a processing pass.
    pub fn resume(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if state.state == DispatcherState::Disposed {
                return;
            }
            if state.state == DispatcherState::Paused {
                info!("dispatcher resumed");
            }
            state.state = DispatcherState::Running;
            state.auto_paused = false;
        }
        self.process_queue_if_needed();
    }

    /// Terminal transition; every later operation is a no-op or error.
    pub fn dispose(&self) {
        let mut state = self.state.lock().expect("state lock poisoned");
        state.state = DispatcherState::Disposed;
    }

    // ── Queue operations ──────────────────────────────────────────

    /// Enqueue a batch atomically: either every task enters the queue or
    /// none does. Pinned tasks enter at High priority, the rest at
    /// Normal. Wakes the processing loop unless the dispatcher is held
    /// paused by an operator or a failure.
    pub fn enqueue_tasks(
        self: &Arc<Self>,
        tasks: Vec<TransportTask>,
    ) -> GatewayResult<()> {
        if self.state() == DispatcherState::Disposed {
            return Err(GatewayError::Disposed);
        }
        if tasks.is_empty() {
            return Ok(());
        }
        {
            let mut queue = self.queue.lock().expect("queue lock poisoned");
            if queue.len() + tasks.len() > self.config.max_queue_size {
                let first = &tasks[0].task_id;
                return Err(GatewayError::Detail(ErrorDetail::new(
                    codes::TASK_QUEUE_FULL,
                    format!(
                        "Task queue is full. Cannot enqueue task {}. Current: {}, Max: {}",
                        first,
                        queue.len(),
                        self.config.max_queue_size
                    ),
                )));
            }
            for task in &tasks {
                if queue.contains(&task.task_id) {
                    return Err(GatewayError::Validation(format!(
                        "task {} is already queued",
                        task.task_id
                    )));
                }
            }
            for task in tasks {
                let priority = TaskPriority::for_task(&task);
                debug!(task_id = %task.task_id, ?priority, "task enqueued");
                queue
                    .enqueue(task, priority)
                    .map_err(GatewayError::Validation)?;
            }
        }
        self.wake_if_auto_paused();
        Ok(())
    }

    /// Put a task back at its original priority after a failed
    /// assignment.
    pub fn requeue(&self, task: TransportTask, priority: TaskPriority) {
        let mut queue = self.queue.lock().expect("queue lock poisoned");
        if let Err(e) = queue.enqueue(task, priority) {
            warn!(error = %e, "requeue after failed assignment rejected");
        }
    }

    /// Remove a queued task. Returns false for unknown ids and for tasks
    /// already assigned to a device (in-flight work is never removable
    /// here).
    pub fn remove_task(&self, task_id: &str) -> bool {
        let removed = {
            let mut queue = self.queue.lock().expect("queue lock poisoned");
            queue.try_remove(task_id).is_some()
        };
        if removed {
            debug!(task_id, "task removed from queue");
            self.auto_pause_if_drained();
        }
        removed
    }

    /// Remove a batch; true only if every id was removed.
    pub fn remove_tasks(&self, task_ids: &[String]) -> bool {
        task_ids
            .iter()
            .fold(true, |all, id| self.remove_task(id) && all)
    }

    /// The task currently assigned to a device.
    pub fn get_current_task(&self, device_id: &str) -> Option<String> {
        self.assignments
            .lock()
            .expect("assignment lock poisoned")
            .get(device_id)
            .cloned()
    }

    /// Snapshot of the queue in dispatch order.
    pub fn get_queued_tasks(&self) -> Vec<TransportTask> {
        self.queue.lock().expect("queue lock poisoned").snapshot()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().expect("queue lock poisoned").len()
    }

    pub fn queue_is_empty(&self) -> bool {
        self.queue.lock().expect("queue lock poisoned").is_empty()
    }

    /// Whether a queued task with this id exists.
    pub fn is_queued(&self, task_id: &str) -> bool {
        self.queue
            .lock()
            .expect("queue lock poisoned")
            .contains(task_id)
    }

    // ── Assignment lifecycle ──────────────────────────────────────

    /// Release a device's assignment iff it still maps to `task_id`.
    /// With work left in the queue an automatic pause is lifted and
    /// another pass scheduled; with an empty queue the auto-pause (when
    /// configured) engages.
    pub fn complete_task_assignment(
        self: &Arc<Self>,
        device_id: &str,
        task_id: &str,
    ) -> bool {
        let removed = {
            let mut assignments =
                self.assignments.lock().expect("assignment lock poisoned");
            match assignments.get(device_id) {
                Some(current) if current == task_id => {
                    assignments.remove(device_id);
                    true
                }
                _ => false,
            }
        };
        if removed {
            debug!(device_id, task_id, "assignment released");
        }
        if !self.queue_is_empty() {
            self.wake_if_auto_paused();
        } else {
            self.auto_pause_if_drained();
        }
        removed
    }

    /// React to a device becoming idle.
    pub fn handle_device_idle(self: &Arc<Self>) {
        if self.state() == DispatcherState::Running && !self.queue_is_empty() {
            self.process_queue_if_needed();
        }
    }

    // ── Processing loop ───────────────────────────────────────────

    /// Schedule a processing pass. Single-flight: when a pass is already
    /// running the trigger is latched and honoured when the pass ends.
    pub fn process_queue_if_needed(self: &Arc<Self>) {
        if self.state() != DispatcherState::Running || self.queue_is_empty() {
            return;
        }
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let dispatcher = self.clone();
            tokio::spawn(async move { dispatcher.run_processing_pass().await });
        } else {
            self.pending_pass.store(true, Ordering::Release);
        }
    }

    async fn run_processing_pass(self: Arc<Self>) {
        loop {
            self.drain_cycle().await;
            self.processing.store(false, Ordering::Release);
            // Honour triggers that arrived while the flag was held.
            let rerun = self.pending_pass.swap(false, Ordering::AcqRel)
                && self.state() == DispatcherState::Running
                && !self.queue_is_empty()
                && self
                    .processing
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok();
            if !rerun {
                return;
            }
        }
    }

    /// One pass: up to `max_tasks_per_cycle` assignment attempts using
    /// the peek-then-commit form, which keeps the head stable while an
    /// assignment attempt fails.
    async fn drain_cycle(&self) {
        for _ in 0..self.config.max_tasks_per_cycle {
            if self.state() != DispatcherState::Running {
                return;
            }
            let head = {
                let mut queue = self.queue.lock().expect("queue lock poisoned");
                queue.try_peek().cloned()
            };
            let Some(entry) = head else { return };

            let idle_devices = self.monitor.get_idle_devices().await;
            let assigning = self
                .assignments
                .lock()
                .expect("assignment lock poisoned")
                .clone();
            let Some(profile) = self.strategy.select_device(
                &entry.task,
                &idle_devices,
                &self.profiles,
                &assigning,
                &self.config,
            ) else {
                // No eligible device; leave the task at the head.
                return;
            };

            // The idle snapshot may be stale: re-check under the
            // assignment lock and re-peek when the device is taken.
            if self
                .assignments
                .lock()
                .expect("assignment lock poisoned")
                .contains_key(&profile.id)
            {
                continue;
            }

            let connector = match self.pool.get_or_create(&profile.id).await {
                Ok(connector) => connector,
                Err(e) => {
                    warn!(device_id = %profile.id, error = %e, "assignment skipped: no connection");
                    continue;
                }
            };

            // Best-effort readiness re-read; only a prompt, definitive
            // `false` blocks the assignment.
            if let Ok(Ok(false)) = tokio::time::timeout(
                READY_CHECK_TIMEOUT,
                connector.read_bool(&profile.signals.device_ready),
            )
            .await
            {
                debug!(device_id = %profile.id, "device not ready; leaving task queued");
                continue;
            }

            // Commit: atomically pull the specific task we peeked. A
            // miss means the head changed under us (removal or drain).
            let removed = {
                let mut queue = self.queue.lock().expect("queue lock poisoned");
                queue.try_remove(&entry.task.task_id)
            };
            let Some(removed) = removed else { continue };

            self.assignments
                .lock()
                .expect("assignment lock poisoned")
                .insert(profile.id.clone(), removed.task.task_id.clone());
            info!(
                task_id = %removed.task.task_id,
                device_id = %profile.id,
                command = %removed.task.command_type,
                "task assigned"
            );

            let assignment = TaskAssignment {
                task: removed.task.clone(),
                priority: removed.priority,
                profile: profile.clone(),
                connector,
            };
            if self.assignment_tx.send(assignment).await.is_err() {
                // Executor side has shut down: roll the assignment back.
                warn!(task_id = %removed.task.task_id, "assignment channel closed; rolling back");
                self.assignments
                    .lock()
                    .expect("assignment lock poisoned")
                    .remove(&profile.id);
                self.requeue(removed.task, removed.priority);
                return;
            }

            // Rate-limit PLC bursts between consecutive assignments.
            tokio::time::sleep(self.config.assignment_delay()).await;
        }
    }

    // ── Internal transitions ──────────────────────────────────────

    /// Lift an automatic pause (never a manual or failure pause) and
    /// schedule a pass.
    fn wake_if_auto_paused(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if state.state == DispatcherState::Paused && state.auto_paused {
                debug!("auto-pause lifted");
                state.state = DispatcherState::Running;
                state.auto_paused = false;
            }
        }
        self.process_queue_if_needed();
    }

    /// Engage the empty-queue auto-pause when configured.
    fn auto_pause_if_drained(&self) {
        if !self.config.auto_pause_when_empty || !self.queue_is_empty() {
            return;
        }
        let mut state = self.state.lock().expect("state lock poisoned");
        if state.state == DispatcherState::Running {
            debug!("queue drained; auto-pausing");
            state.state = DispatcherState::Paused;
            state.auto_paused = true;
        }
    }
}
