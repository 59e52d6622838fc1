//! Gateway Configuration
//!
//! Static configuration validated at construction. Every section is
//! serde-derived with defaults so an outer layer can load it from JSON or
//! YAML; the gateway core never touches the filesystem itself.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::error::{GatewayError, GatewayResult};
use crate::model::{CommandType, DeviceProfile, Location};

/// Operating mode. Only the exact string `"production"` selects production;
/// anything else is treated as test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Production,
    #[default]
    #[serde(other)]
    Test,
}

impl Mode {
    pub fn is_test(&self) -> bool {
        matches!(self, Self::Test)
    }
}

/// Root gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub mode: Mode,
    pub devices: Vec<DeviceProfile>,
    #[serde(default)]
    pub device_monitor: DeviceMonitorConfig,
    #[serde(default)]
    pub barcode_handler: BarcodeConfig,
    #[serde(default)]
    pub task_dispatcher: DispatcherConfig,
    #[serde(default)]
    pub task_timeout: TaskTimeoutConfig,
    #[serde(default)]
    pub plc: PlcConfig,
    #[serde(default)]
    pub logger: LoggerConfig,
}

impl GatewayConfig {
    /// Validate the configuration. Called once at gateway construction;
    /// failures surface synchronously to the caller.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.devices.is_empty() {
            return Err(GatewayError::Validation(
                "device list must not be empty".into(),
            ));
        }
        let mut seen = HashSet::new();
        for profile in &self.devices {
            if profile.id.trim().is_empty() {
                return Err(GatewayError::Validation(
                    "device id must not be empty".into(),
                ));
            }
            if !seen.insert(profile.id.as_str()) {
                return Err(GatewayError::Validation(format!(
                    "duplicate device id: {}",
                    profile.id
                )));
            }
        }
        if self.task_dispatcher.max_queue_size == 0 {
            return Err(GatewayError::Validation(
                "task_dispatcher.max_queue_size must be at least 1".into(),
            ));
        }
        if self.task_dispatcher.max_tasks_per_cycle == 0 {
            return Err(GatewayError::Validation(
                "task_dispatcher.max_tasks_per_cycle must be at least 1".into(),
            ));
        }
        if self.device_monitor.max_concurrent_operations == 0 {
            return Err(GatewayError::Validation(
                "device_monitor.max_concurrent_operations must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Look up a device profile by id.
    pub fn device(&self, device_id: &str) -> Option<&DeviceProfile> {
        self.devices.iter().find(|d| d.id == device_id)
    }
}

/// Device monitor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceMonitorConfig {
    /// Concurrency cap for the idle-device sweep.
    pub max_concurrent_operations: usize,
    /// Address prefix every signal must carry before a test-mode system
    /// reset is allowed to write zeros.
    pub safety_scope_prefix: String,
}

impl Default for DeviceMonitorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: 10,
            safety_scope_prefix: "DB66".to_string(),
        }
    }
}

/// Barcode validation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BarcodeConfig {
    /// How long a pending validation waits for the external verdict.
    pub validation_timeout_minutes: u64,
    pub max_barcode_length: usize,
}

impl Default for BarcodeConfig {
    fn default() -> Self {
        Self {
            validation_timeout_minutes: 2,
            max_barcode_length: 10,
        }
    }
}

impl BarcodeConfig {
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_minutes * 60)
    }
}

/// Dispatcher tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Maximum assignments per processing pass.
    pub max_tasks_per_cycle: usize,
    /// Hard bound on queued tasks.
    pub max_queue_size: usize,
    /// Pause automatically whenever the queue drains.
    pub auto_pause_when_empty: bool,
    /// Delay between consecutive assignments, rate-limiting PLC bursts.
    pub assignment_delay_ms: u64,
    /// Reference locations used to rank devices for tasks without a
    /// source (inbound picks up at the infeed gate).
    pub reference_locations: Vec<ReferenceLocation>,
}

/// Per-command-type reference location for device ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceLocation {
    pub command_type: CommandType,
    pub location: Location,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_tasks_per_cycle: 10,
            max_queue_size: 50,
            auto_pause_when_empty: true,
            assignment_delay_ms: 1000,
            reference_locations: vec![ReferenceLocation {
                command_type: CommandType::Inbound,
                location: Location::new(1, 14, 5),
            }],
        }
    }
}

impl DispatcherConfig {
    pub fn assignment_delay(&self) -> Duration {
        Duration::from_millis(self.assignment_delay_ms)
    }

    pub fn reference_location(&self, command_type: CommandType) -> Option<Location> {
        self.reference_locations
            .iter()
            .find(|r| r.command_type == command_type)
            .map(|r| r.location)
    }
}

/// Per-command-type polling timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskTimeoutConfig {
    pub inbound_timeout_minutes: u64,
    pub outbound_timeout_minutes: u64,
    pub transfer_timeout_minutes: u64,
}

impl Default for TaskTimeoutConfig {
    fn default() -> Self {
        Self {
            inbound_timeout_minutes: 15,
            outbound_timeout_minutes: 15,
            transfer_timeout_minutes: 15,
        }
    }
}

impl TaskTimeoutConfig {
    /// The configured timeout for a command type, in minutes.
    pub fn minutes_for(&self, command_type: CommandType) -> u64 {
        match command_type {
            CommandType::Inbound => self.inbound_timeout_minutes,
            CommandType::Outbound => self.outbound_timeout_minutes,
            CommandType::Transfer => self.transfer_timeout_minutes,
        }
    }

    pub fn timeout_for(&self, command_type: CommandType) -> Duration {
        Duration::from_secs(self.minutes_for(command_type) * 60)
    }
}

/// PLC connector tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlcConfig {
    pub read_timeout_seconds: u64,
    pub write_timeout_seconds: u64,
    pub max_connection_retries: u32,
    pub retry_delay_seconds: u64,
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            read_timeout_seconds: 10,
            write_timeout_seconds: 10,
            max_connection_retries: 5,
            retry_delay_seconds: 2,
        }
    }
}

impl PlcConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }
}

/// Logging verbosity. Backend selection stays with the embedding
/// application; [`init_tracing`] installs a plain fmt subscriber when
/// asked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Default filter directive, overridable via `RUST_LOG`.
    pub level: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "shuttle_gateway=info".to_string(),
        }
    }
}

/// Install an env-filtered fmt subscriber using the configured verbosity.
///
/// Returns quietly when a global subscriber is already set, so embedding
/// applications that manage their own logging are unaffected.
pub fn init_tracing(config: &LoggerConfig) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.level.clone().into());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
