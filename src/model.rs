//! Core Data Model
//!
//! Transport tasks, rack locations, device profiles and the enumerations
//! shared across the dispatcher, the command strategies and the façade.
//! Tasks are immutable configuration: all runtime state lives in the
//! dispatcher and the executor, never on the task itself.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

/// The three pallet-move commands a shuttle understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    /// Move a pallet into the racking system (target comes from barcode
    /// validation).
    Inbound,
    /// Move a pallet out of the racking system to a gate.
    Outbound,
    /// Move a pallet between two rack locations.
    Transfer,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
            Self::Transfer => "transfer",
        }
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Approach side for two-sided rack blocks.
///
/// The wire encoding is the single canonical mapping used everywhere:
/// `Bottom` = false, `Top` = true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Bottom,
    Top,
}

impl Direction {
    /// The PLC bit value for this direction.
    pub fn as_plc_bool(&self) -> bool {
        matches!(self, Self::Top)
    }
}

/// Rack coordinates. `depth` is reserved for double-deep racking and is
/// never part of a PLC write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub floor: i16,
    pub rail: i16,
    pub block: i16,
    #[serde(default)]
    pub depth: i16,
}

impl Location {
    pub fn new(floor: i16, rail: i16, block: i16) -> Self {
        Self {
            floor,
            rail,
            block,
            depth: 0,
        }
    }

    /// Manhattan distance over floor/rail/block, used for device ranking.
    pub fn manhattan_distance(&self, other: &Location) -> i32 {
        (self.floor as i32 - other.floor as i32).abs()
            + (self.rail as i32 - other.rail as i32).abs()
            + (self.block as i32 - other.block as i32).abs()
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{},{})", self.floor, self.rail, self.block)
    }
}

/// A transport command submitted by the warehouse software.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportTask {
    /// Caller-assigned id, unique within the queue.
    pub task_id: String,
    pub command_type: CommandType,
    /// Optional device pin. A pinned task is dispatched to this device
    /// only, and is raised to [`TaskPriority::High`].
    #[serde(default)]
    pub device_id: Option<String>,
    /// Required for Outbound and Transfer.
    #[serde(default)]
    pub source_location: Option<Location>,
    /// Required for Transfer. For Inbound the target comes from barcode
    /// validation, never from the task.
    #[serde(default)]
    pub target_location: Option<Location>,
    /// I/O port number where the pallet enters or exits.
    #[serde(default)]
    pub gate_number: u16,
    #[serde(default)]
    pub in_dir_block: Direction,
    #[serde(default)]
    pub out_dir_block: Direction,
}

impl TransportTask {
    /// Enforce the per-type submission rules.
    ///
    /// Inbound must carry no location fields; Outbound needs a source;
    /// Transfer needs both ends. Violations surface synchronously to the
    /// caller and never produce an event.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.task_id.trim().is_empty() {
            return Err(GatewayError::Validation("task_id must not be empty".into()));
        }
        if let Some(device_id) = &self.device_id {
            if device_id.trim().is_empty() {
                return Err(GatewayError::Validation(format!(
                    "task {}: pinned device_id must not be empty",
                    self.task_id
                )));
            }
        }
        match self.command_type {
            CommandType::Inbound => {
                if self.source_location.is_some() || self.target_location.is_some() {
                    return Err(GatewayError::Validation(format!(
                        "task {}: inbound tasks must not carry location fields",
                        self.task_id
                    )));
                }
            }
            CommandType::Outbound => {
                if self.source_location.is_none() {
                    return Err(GatewayError::Validation(format!(
                        "task {}: outbound tasks require a source location",
                        self.task_id
                    )));
                }
            }
            CommandType::Transfer => {
                if self.source_location.is_none() || self.target_location.is_none() {
                    return Err(GatewayError::Validation(format!(
                        "task {}: transfer tasks require source and target locations",
                        self.task_id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Dispatch priority. Device-pinned tasks are raised to `High`; everything
/// else enters at `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskPriority {
    Low = 1,
    Normal = 5,
    High = 8,
    Critical = 10,
}

impl TaskPriority {
    /// The priority a freshly submitted task enters the queue with.
    pub fn for_task(task: &TransportTask) -> Self {
        if task.device_id.is_some() {
            Self::High
        } else {
            Self::Normal
        }
    }
}

/// Observed device condition. Devices start `Offline` until monitoring
/// establishes contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    #[default]
    Offline,
    Idle,
    Busy,
    Error,
    Charging,
}

/// Dispatcher lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Running,
    Paused,
    Disposed,
}

/// Snapshot element returned by the idle-device sweep.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub status: DeviceStatus,
    /// Actual location at snapshot time; `None` when the read failed.
    pub location: Option<Location>,
}

/// Symbolic addresses of every PLC signal a shuttle exposes.
///
/// Addresses are protocol-opaque strings (e.g. `"DB66.DBX0.0"`); the
/// connector resolves them. The gateway mandates only their semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMap {
    // Command bits written by the gateway.
    pub inbound_command: String,
    pub outbound_command: String,
    pub transfer_command: String,
    pub start_process_command: String,
    /// Device-initiated cancel, read by the polling loop.
    pub cancel_command: String,

    // Completion and status bits raised by the device.
    pub inbound_complete: String,
    pub outbound_complete: String,
    pub transfer_complete: String,
    pub command_acknowledged: String,
    pub command_rejected: String,
    pub alarm: String,
    pub device_ready: String,
    pub connected_to_software: String,

    /// Device-reported error code word (1..102 on failure).
    pub error_code: String,

    // Location words.
    pub source_floor: String,
    pub source_rail: String,
    pub source_block: String,
    pub target_floor: String,
    pub target_rail: String,
    pub target_block: String,
    pub actual_floor: String,
    pub actual_rail: String,
    pub actual_block: String,

    // Direction bits and gate word.
    pub in_dir_block: String,
    pub out_dir_block: String,
    pub gate_number: String,

    // Barcode exchange: ten character words plus the verdict pair.
    pub barcode_chars: [String; 10],
    pub barcode_valid: String,
    pub barcode_invalid: String,
}

/// Value kind of a signal, used by the test-mode system reset to write the
/// correct zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Bit,
    Word,
}

impl SignalMap {
    /// The completion bit for a command type.
    pub fn complete_signal(&self, command: CommandType) -> &str {
        match command {
            CommandType::Inbound => &self.inbound_complete,
            CommandType::Outbound => &self.outbound_complete,
            CommandType::Transfer => &self.transfer_complete,
        }
    }

    /// Every mapped address, for the safety-scope check before a system
    /// reset.
    pub fn all_addresses(&self) -> Vec<&str> {
        let mut addresses = vec![
            self.inbound_command.as_str(),
            self.outbound_command.as_str(),
            self.transfer_command.as_str(),
            self.start_process_command.as_str(),
            self.cancel_command.as_str(),
            self.inbound_complete.as_str(),
            self.outbound_complete.as_str(),
            self.transfer_complete.as_str(),
            self.command_acknowledged.as_str(),
            self.command_rejected.as_str(),
            self.alarm.as_str(),
            self.device_ready.as_str(),
            self.connected_to_software.as_str(),
            self.error_code.as_str(),
            self.source_floor.as_str(),
            self.source_rail.as_str(),
            self.source_block.as_str(),
            self.target_floor.as_str(),
            self.target_rail.as_str(),
            self.target_block.as_str(),
            self.actual_floor.as_str(),
            self.actual_rail.as_str(),
            self.actual_block.as_str(),
            self.in_dir_block.as_str(),
            self.out_dir_block.as_str(),
            self.gate_number.as_str(),
            self.barcode_valid.as_str(),
            self.barcode_invalid.as_str(),
        ];
        addresses.extend(self.barcode_chars.iter().map(|s| s.as_str()));
        addresses
    }

    /// The signals a test-mode system reset writes zeros to, with the
    /// value kind each write uses. Readiness and connection bits are
    /// deliberately left alone.
    pub fn reset_plan(&self) -> Vec<(&str, SignalKind)> {
        let mut plan = vec![
            (self.inbound_command.as_str(), SignalKind::Bit),
            (self.outbound_command.as_str(), SignalKind::Bit),
            (self.transfer_command.as_str(), SignalKind::Bit),
            (self.start_process_command.as_str(), SignalKind::Bit),
            (self.cancel_command.as_str(), SignalKind::Bit),
            (self.inbound_complete.as_str(), SignalKind::Bit),
            (self.outbound_complete.as_str(), SignalKind::Bit),
            (self.transfer_complete.as_str(), SignalKind::Bit),
            (self.command_acknowledged.as_str(), SignalKind::Bit),
            (self.command_rejected.as_str(), SignalKind::Bit),
            (self.alarm.as_str(), SignalKind::Bit),
            (self.error_code.as_str(), SignalKind::Word),
            (self.source_floor.as_str(), SignalKind::Word),
            (self.source_rail.as_str(), SignalKind::Word),
            (self.source_block.as_str(), SignalKind::Word),
            (self.target_floor.as_str(), SignalKind::Word),
            (self.target_rail.as_str(), SignalKind::Word),
            (self.target_block.as_str(), SignalKind::Word),
            (self.in_dir_block.as_str(), SignalKind::Bit),
            (self.out_dir_block.as_str(), SignalKind::Bit),
            (self.gate_number.as_str(), SignalKind::Word),
            (self.barcode_valid.as_str(), SignalKind::Bit),
            (self.barcode_invalid.as_str(), SignalKind::Bit),
        ];
        plan.extend(
            self.barcode_chars
                .iter()
                .map(|s| (s.as_str(), SignalKind::Word)),
        );
        plan
    }
}

/// Static description of one shuttle device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub id: String,
    /// Endpoint used in production mode (e.g. `"10.0.0.7:102"`).
    pub production_endpoint: String,
    /// Endpoint used in test mode.
    pub test_endpoint: String,
    pub cpu: String,
    pub rack: u16,
    pub slot: u16,
    pub signals: SignalMap,
}

impl DeviceProfile {
    /// The endpoint for the given mode.
    pub fn endpoint(&self, mode: crate::config::Mode) -> &str {
        match mode {
            crate::config::Mode::Production => &self.production_endpoint,
            crate::config::Mode::Test => &self.test_endpoint,
        }
    }
}
