//! In-Memory PLC Simulator
//!
//! A loop-back connector backing test mode and the scenario suite. Signals
//! live in a single value map keyed by address; unset addresses read as
//! zeroed PLC memory (false / 0 / empty). Tests script device behaviour by
//! writing signals directly and can force per-address read failures or a
//! refused connection.
//!
//! I/O is serialized through one async mutex per connector, matching the
//! one-in-flight-request rule real connectors follow.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::Mode;
use crate::error::{PlcError, PlcResult};
use crate::model::DeviceProfile;

use super::connector::{ConnectorFactory, PlcConnector};

/// One simulated signal value.
#[derive(Debug, Clone, PartialEq)]
enum SimValue {
    Bool(bool),
    I16(i16),
    I32(i32),
    Chars(String),
}

#[derive(Default, Debug)]
struct SimState {
    values: HashMap<String, SimValue>,
    /// Addresses whose next read fails.
    failing: HashSet<String>,
}

/// Simulated device connector.
#[derive(Debug)]
pub struct SimulatedConnector {
    endpoint: String,
    state: Mutex<SimState>,
    connected: AtomicBool,
    /// When set, `ensure_connected` keeps failing — used to exercise the
    /// pool's retry and 1011 paths.
    refuse_connections: AtomicBool,
    /// Artificial per-operation latency.
    latency: Duration,
}

impl SimulatedConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            state: Mutex::new(SimState::default()),
            connected: AtomicBool::new(false),
            refuse_connections: AtomicBool::new(false),
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    // ── Test scripting ──────────────────────────────────────────────

    /// Script a bit from the device side.
    pub async fn set_bool(&self, address: &str, value: bool) {
        self.state
            .lock()
            .await
            .values
            .insert(address.to_string(), SimValue::Bool(value));
    }

    /// Script a word from the device side.
    pub async fn set_i16(&self, address: &str, value: i16) {
        self.state
            .lock()
            .await
            .values
            .insert(address.to_string(), SimValue::I16(value));
    }

    /// Script a character word from the device side.
    pub async fn set_chars(&self, address: &str, value: &str) {
        self.state
            .lock()
            .await
            .values
            .insert(address.to_string(), SimValue::Chars(value.to_string()));
    }

    /// Make every subsequent read of `address` fail until cleared.
    pub async fn fail_address(&self, address: &str) {
        self.state
            .lock()
            .await
            .failing
            .insert(address.to_string());
    }

    /// Clear a scripted read failure.
    pub async fn restore_address(&self, address: &str) {
        self.state.lock().await.failing.remove(address);
    }

    /// Refuse (or accept again) connection attempts.
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
        if refuse {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    /// Observe a bit the gateway wrote.
    pub async fn get_bool(&self, address: &str) -> bool {
        match self.state.lock().await.values.get(address) {
            Some(SimValue::Bool(v)) => *v,
            _ => false,
        }
    }

    /// Observe a word the gateway wrote.
    pub async fn get_i16(&self, address: &str) -> i16 {
        match self.state.lock().await.values.get(address) {
            Some(SimValue::I16(v)) => *v,
            Some(SimValue::I32(v)) => *v as i16,
            _ => 0,
        }
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn access(&self, address: &str) -> PlcResult<tokio::sync::MutexGuard<'_, SimState>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PlcError::NotConnected);
        }
        let state = self.state.lock().await;
        // Latency is applied under the lock: one in-flight request per
        // device, like a real connector.
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if state.failing.contains(address) {
            return Err(PlcError::ReadFailed {
                address: address.to_string(),
                reason: "simulated read failure".to_string(),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl PlcConnector for SimulatedConnector {
    async fn read_bool(&self, address: &str) -> PlcResult<bool> {
        let state = self.access(address).await?;
        match state.values.get(address) {
            Some(SimValue::Bool(v)) => Ok(*v),
            None => Ok(false),
            Some(other) => Err(PlcError::ReadFailed {
                address: address.to_string(),
                reason: format!("expected bit, found {:?}", other),
            }),
        }
    }

    async fn write_bool(&self, address: &str, value: bool) -> PlcResult<()> {
        let mut state = self.access(address).await?;
        state
            .values
            .insert(address.to_string(), SimValue::Bool(value));
        Ok(())
    }

    async fn read_i16(&self, address: &str) -> PlcResult<i16> {
        let state = self.access(address).await?;
        match state.values.get(address) {
            Some(SimValue::I16(v)) => Ok(*v),
            None => Ok(0),
            Some(other) => Err(PlcError::ReadFailed {
                address: address.to_string(),
                reason: format!("expected word, found {:?}", other),
            }),
        }
    }

    async fn write_i16(&self, address: &str, value: i16) -> PlcResult<()> {
        let mut state = self.access(address).await?;
        state
            .values
            .insert(address.to_string(), SimValue::I16(value));
        Ok(())
    }

    async fn read_i32(&self, address: &str) -> PlcResult<i32> {
        let state = self.access(address).await?;
        match state.values.get(address) {
            Some(SimValue::I32(v)) => Ok(*v),
            Some(SimValue::I16(v)) => Ok(*v as i32),
            None => Ok(0),
            Some(other) => Err(PlcError::ReadFailed {
                address: address.to_string(),
                reason: format!("expected dword, found {:?}", other),
            }),
        }
    }

    async fn write_i32(&self, address: &str, value: i32) -> PlcResult<()> {
        let mut state = self.access(address).await?;
        state
            .values
            .insert(address.to_string(), SimValue::I32(value));
        Ok(())
    }

    async fn read_char_word(&self, address: &str) -> PlcResult<String> {
        let state = self.access(address).await?;
        match state.values.get(address) {
            Some(SimValue::Chars(s)) => Ok(s.clone()),
            // A zeroed word reads as an empty character.
            Some(SimValue::I16(0)) | None => Ok(String::new()),
            Some(other) => Err(PlcError::ReadFailed {
                address: address.to_string(),
                reason: format!("expected character word, found {:?}", other),
            }),
        }
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn ensure_connected(&self) -> PlcResult<()> {
        if self.refuse_connections.load(Ordering::SeqCst) {
            return Err(PlcError::ConnectionFailed {
                endpoint: self.endpoint.clone(),
                attempts: 1,
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out one shared [`SimulatedConnector`] per device, so
/// tests can grab a device's connector before the gateway activates it and
/// script its behaviour throughout.
#[derive(Default)]
pub struct SimulatorFactory {
    connectors: std::sync::Mutex<HashMap<String, Arc<SimulatedConnector>>>,
}

impl SimulatorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared connector for a device id, created on first use.
    pub fn connector(&self, device_id: &str) -> Arc<SimulatedConnector> {
        self.connectors
            .lock()
            .expect("simulator factory lock poisoned")
            .entry(device_id.to_string())
            .or_insert_with(|| Arc::new(SimulatedConnector::new(format!("sim://{device_id}"))))
            .clone()
    }
}

#[async_trait]
impl ConnectorFactory for SimulatorFactory {
    async fn create(
        &self,
        profile: &DeviceProfile,
        _mode: Mode,
    ) -> PlcResult<Arc<dyn PlcConnector>> {
        Ok(self.connector(&profile.id))
    }
}
