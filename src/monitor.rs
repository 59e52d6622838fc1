//! Device Monitor
//!
//! Tracks per-device status, reads readiness and location from the PLC,
//! and emits `DeviceStatusChanged` events. Status transitions are
//! serialized by one status lock; event emission happens under that lock
//! so subscribers observe transitions in order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::{DeviceMonitorConfig, Mode};
use crate::error::{GatewayError, GatewayResult};
use crate::events::{EventBus, GatewayEvent};
use crate::model::{DeviceInfo, DeviceStatus, Location, SignalKind};
use crate::plc::ConnectionPool;

pub struct DeviceMonitor {
    pool: Arc<ConnectionPool>,
    statuses: Mutex<HashMap<String, DeviceStatus>>,
    /// Caps concurrent PLC reads in the idle-device sweep.
    sweep_limit: Arc<Semaphore>,
    config: DeviceMonitorConfig,
    mode: Mode,
    events: EventBus,
}

impl DeviceMonitor {
    pub fn new(
        pool: Arc<ConnectionPool>,
        config: DeviceMonitorConfig,
        mode: Mode,
        events: EventBus,
    ) -> Self {
        let sweep_limit = Arc::new(Semaphore::new(config.max_concurrent_operations.max(1)));
        Self {
            pool,
            statuses: Mutex::new(HashMap::new()),
            sweep_limit,
            config,
            mode,
            events,
        }
    }

    /// Begin monitoring a device: establish its connection, read
    /// readiness, and set Idle or Busy. Any failure leaves the device
    /// Offline and surfaces the error.
    pub async fn start_monitoring(&self, device_id: &str) -> GatewayResult<()> {
        let profile = self
            .pool
            .profile(device_id)
            .ok_or_else(|| {
                GatewayError::coded(
                    crate::error::codes::DEVICE_NOT_REGISTERED,
                    format!("device {device_id} is not registered"),
                )
            })?
            .clone();

        self.statuses
            .lock()
            .expect("status lock poisoned")
            .entry(device_id.to_string())
            .or_insert(DeviceStatus::Offline);

        let result: GatewayResult<bool> = async {
            let connector = self.pool.get_or_create(device_id).await?;
            Ok(connector.read_bool(&profile.signals.device_ready).await?)
        }
        .await;

        match result {
            Ok(ready) => {
                let status = if ready {
                    DeviceStatus::Idle
                } else {
                    DeviceStatus::Busy
                };
                info!(device_id, ?status, "monitoring started");
                self.update_device_status(device_id, status);
                Ok(())
            }
            Err(e) => {
                warn!(device_id, error = %e, "monitoring start failed");
                self.update_device_status(device_id, DeviceStatus::Offline);
                Err(e)
            }
        }
    }

    /// Stop monitoring: release the connector and forget the status.
    pub async fn stop_monitoring(&self, device_id: &str) {
        self.pool.remove(device_id).await;
        self.statuses
            .lock()
            .expect("status lock poisoned")
            .remove(device_id);
        info!(device_id, "monitoring stopped");
    }

    /// Current status; Offline when the device is unknown.
    pub fn get_device_status(&self, device_id: &str) -> DeviceStatus {
        self.statuses
            .lock()
            .expect("status lock poisoned")
            .get(device_id)
            .copied()
            .unwrap_or_default()
    }

    /// Compare-and-set the status, emitting `DeviceStatusChanged` when it
    /// actually changed. Returns the previous status.
    pub fn update_device_status(&self, device_id: &str, status: DeviceStatus) -> DeviceStatus {
        let mut statuses = self.statuses.lock().expect("status lock poisoned");
        let previous = statuses
            .insert(device_id.to_string(), status)
            .unwrap_or_default();
        if previous != status {
            debug!(device_id, ?previous, ?status, "device status changed");
            self.events.emit(GatewayEvent::DeviceStatusChanged {
                device_id: device_id.to_string(),
                status,
                previous,
            });
        }
        previous
    }

    /// Reset a device to Idle. Refused while the device is Busy, while
    /// the PLC alarm bit is set, or while the device reports a non-zero
    /// error code. Only the in-memory status is touched; the PLC error
    /// word is read but never cleared here.
    pub async fn reset_device_status(&self, device_id: &str) -> GatewayResult<bool> {
        if self.get_device_status(device_id) == DeviceStatus::Busy {
            return Ok(false);
        }
        let profile = match self.pool.profile(device_id) {
            Some(p) => p.clone(),
            None => return Ok(false),
        };
        let connector = self.pool.get_or_create(device_id).await?;
        let alarm = connector.read_bool(&profile.signals.alarm).await?;
        let error_code = connector.read_i16(&profile.signals.error_code).await?;
        if alarm || error_code != 0 {
            debug!(device_id, alarm, error_code, "reset refused by device state");
            return Ok(false);
        }
        self.update_device_status(device_id, DeviceStatus::Idle);
        Ok(true)
    }

    /// Snapshot of every monitored device that is currently idle: the
    /// command-acknowledged bit reads false and the actual location reads
    /// successfully. Statuses are updated as a side effect. Reads fan out
    /// under the configured concurrency cap.
    pub async fn get_idle_devices(self: &Arc<Self>) -> Vec<DeviceInfo> {
        let monitored: Vec<String> = {
            let statuses = self.statuses.lock().expect("status lock poisoned");
            statuses.keys().cloned().collect()
        };

        let sweeps = monitored.into_iter().map(|device_id| {
            let monitor = self.clone();
            async move {
                let _permit = monitor
                    .sweep_limit
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("sweep semaphore closed");
                monitor.sweep_one(&device_id).await
            }
        });

        join_all(sweeps).await.into_iter().flatten().collect()
    }

    async fn sweep_one(&self, device_id: &str) -> Option<DeviceInfo> {
        let profile = self.pool.profile(device_id)?.clone();
        let connector = match self.pool.get_or_create(device_id).await {
            Ok(c) => c,
            Err(e) => {
                debug!(device_id, error = %e, "idle sweep: connection unavailable");
                self.update_device_status(device_id, DeviceStatus::Offline);
                return None;
            }
        };

        let acknowledged = match connector
            .read_bool(&profile.signals.command_acknowledged)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                debug!(device_id, error = %e, "idle sweep: acknowledge read failed");
                self.update_device_status(device_id, DeviceStatus::Offline);
                return None;
            }
        };
        if acknowledged {
            self.update_device_status(device_id, DeviceStatus::Busy);
            return None;
        }

        match self.get_current_location(device_id).await {
            Some(location) => {
                self.update_device_status(device_id, DeviceStatus::Idle);
                Some(DeviceInfo {
                    device_id: device_id.to_string(),
                    status: DeviceStatus::Idle,
                    location: Some(location),
                })
            }
            None => {
                self.update_device_status(device_id, DeviceStatus::Offline);
                None
            }
        }
    }

    /// The device's actual rack location. Floor, rail and block are read
    /// in parallel; any failure yields `None` so idle discovery stays
    /// resilient.
    pub async fn get_current_location(&self, device_id: &str) -> Option<Location> {
        let profile = self.pool.profile(device_id)?.clone();
        let connector = self.pool.get(device_id).await?;
        let signals = &profile.signals;

        let (floor, rail, block) = tokio::join!(
            connector.read_i16(&signals.actual_floor),
            connector.read_i16(&signals.actual_rail),
            connector.read_i16(&signals.actual_block),
        );
        match (floor, rail, block) {
            (Ok(floor), Ok(rail), Ok(block)) => Some(Location::new(floor, rail, block)),
            _ => {
                debug!(device_id, "actual location read failed");
                None
            }
        }
    }

    /// Test-mode-only full signal reset: writes zeros to every command,
    /// status, location, barcode, direction, gate and error signal, then
    /// sets the device Idle. Refused in production mode, and refused
    /// unless every mapped address sits inside the configured safety
    /// scope.
    pub async fn reset_system(&self, device_id: &str) -> GatewayResult<()> {
        if !self.mode.is_test() {
            return Err(GatewayError::InvalidOperation(
                "reset_system is only available in test mode".into(),
            ));
        }
        let profile = self
            .pool
            .profile(device_id)
            .ok_or_else(|| {
                GatewayError::coded(
                    crate::error::codes::DEVICE_NOT_REGISTERED,
                    format!("device {device_id} is not registered"),
                )
            })?
            .clone();

        let prefix = &self.config.safety_scope_prefix;
        if let Some(outside) = profile
            .signals
            .all_addresses()
            .into_iter()
            .find(|address| !address.starts_with(prefix.as_str()))
        {
            return Err(GatewayError::InvalidOperation(format!(
                "signal {outside} is outside the safety scope {prefix}"
            )));
        }

        let connector = self.pool.get_or_create(device_id).await?;
        for (address, kind) in profile.signals.reset_plan() {
            match kind {
                SignalKind::Bit => connector.write_bool(address, false).await?,
                SignalKind::Word => connector.write_i16(address, 0).await?,
            }
        }
        info!(device_id, "system reset complete");
        self.update_device_status(device_id, DeviceStatus::Idle);
        Ok(())
    }

}
