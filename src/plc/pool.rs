//! Connection Pool
//!
//! One connector per device, created lazily through the injected
//! [`ConnectorFactory`]. Creation is single-flight: the pool lock is held
//! across the whole establishment sequence, so concurrent requests for the
//! same device observe one connector instance. A failed creation leaves
//! the slot empty so later calls can retry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{Mode, PlcConfig};
use crate::error::{PlcError, PlcResult};
use crate::model::DeviceProfile;

use super::connector::{ConnectorFactory, PlcConnector};

pub struct ConnectionPool {
    connectors: Mutex<HashMap<String, Arc<dyn PlcConnector>>>,
    factory: Arc<dyn ConnectorFactory>,
    profiles: HashMap<String, DeviceProfile>,
    mode: Mode,
    plc: PlcConfig,
}

impl ConnectionPool {
    pub fn new(
        factory: Arc<dyn ConnectorFactory>,
        profiles: impl IntoIterator<Item = DeviceProfile>,
        mode: Mode,
        plc: PlcConfig,
    ) -> Self {
        Self {
            connectors: Mutex::new(HashMap::new()),
            factory,
            profiles: profiles.into_iter().map(|p| (p.id.clone(), p)).collect(),
            mode,
            plc,
        }
    }

    /// The connector for a device, creating and connecting it on first
    /// use. Establishment retries `max_connection_retries` times with the
    /// configured delay before giving up.
    pub async fn get_or_create(&self, device_id: &str) -> PlcResult<Arc<dyn PlcConnector>> {
        let mut connectors = self.connectors.lock().await;
        if let Some(connector) = connectors.get(device_id) {
            return Ok(connector.clone());
        }

        let profile = self
            .profiles
            .get(device_id)
            .ok_or_else(|| PlcError::ConnectionFailed {
                endpoint: format!("unregistered device {device_id}"),
                attempts: 0,
            })?;
        let endpoint = profile.endpoint(self.mode).to_string();

        let mut last_error = PlcError::NotConnected;
        for attempt in 1..=self.plc.max_connection_retries.max(1) {
            match self.establish(profile).await {
                Ok(connector) => {
                    debug!(device_id, %endpoint, attempt, "PLC connection established");
                    connectors.insert(device_id.to_string(), connector.clone());
                    return Ok(connector);
                }
                Err(e) => {
                    warn!(device_id, %endpoint, attempt, error = %e, "PLC connection attempt failed");
                    last_error = e;
                    if attempt < self.plc.max_connection_retries {
                        tokio::time::sleep(self.plc.retry_delay()).await;
                    }
                }
            }
        }

        // Slot stays empty; the next call retries from scratch.
        warn!(device_id, %endpoint, cause = %last_error, "giving up on PLC connection");
        Err(PlcError::ConnectionFailed {
            endpoint,
            attempts: self.plc.max_connection_retries,
        })
    }

    async fn establish(&self, profile: &DeviceProfile) -> PlcResult<Arc<dyn PlcConnector>> {
        let connector = self.factory.create(profile, self.mode).await?;
        connector.ensure_connected().await?;
        Ok(connector)
    }

    /// The connector for a device, if one has been created.
    pub async fn get(&self, device_id: &str) -> Option<Arc<dyn PlcConnector>> {
        self.connectors.lock().await.get(device_id).cloned()
    }

    /// Whether the device currently holds a live connection.
    pub async fn is_connected(&self, device_id: &str) -> bool {
        match self.get(device_id).await {
            Some(connector) => connector.is_connected().await,
            None => false,
        }
    }

    /// Release a device's connector, if created.
    pub async fn remove(&self, device_id: &str) {
        if self.connectors.lock().await.remove(device_id).is_some() {
            debug!(device_id, "PLC connector released");
        }
    }

    /// Release every connector.
    pub async fn dispose(&self) {
        self.connectors.lock().await.clear();
    }

    /// The profile for a device id.
    pub fn profile(&self, device_id: &str) -> Option<&DeviceProfile> {
        self.profiles.get(device_id)
    }

    /// All registered profiles.
    pub fn profiles(&self) -> impl Iterator<Item = &DeviceProfile> {
        self.profiles.values()
    }

    /// Number of registered devices (used to size the barcode channel).
    pub fn device_count(&self) -> usize {
        self.profiles.len()
    }
}
