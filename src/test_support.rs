//! Shared fixtures for unit tests.

use crate::config::{
    BarcodeConfig, DeviceMonitorConfig, DispatcherConfig, GatewayConfig, LoggerConfig, Mode,
    PlcConfig, TaskTimeoutConfig,
};
use crate::model::{CommandType, DeviceProfile, Direction, SignalMap, TransportTask};

/// A signal map laid out in one data block, `prefix` typically `"DB66"`.
pub fn sample_signals(prefix: &str) -> SignalMap {
    let bit = |offset: u32| format!("{prefix}.DBX{offset}.0");
    let word = |offset: u32| format!("{prefix}.DBW{offset}");
    SignalMap {
        inbound_command: bit(0),
        outbound_command: bit(1),
        transfer_command: bit(2),
        start_process_command: bit(3),
        cancel_command: bit(4),
        inbound_complete: bit(5),
        outbound_complete: bit(6),
        transfer_complete: bit(7),
        command_acknowledged: bit(8),
        command_rejected: bit(9),
        alarm: bit(10),
        device_ready: bit(11),
        connected_to_software: bit(12),
        error_code: word(14),
        source_floor: word(16),
        source_rail: word(18),
        source_block: word(20),
        target_floor: word(22),
        target_rail: word(24),
        target_block: word(26),
        actual_floor: word(28),
        actual_rail: word(30),
        actual_block: word(32),
        in_dir_block: bit(34),
        out_dir_block: bit(35),
        gate_number: word(36),
        barcode_chars: std::array::from_fn(|i| word(40 + 2 * i as u32)),
        barcode_valid: bit(60),
        barcode_invalid: bit(61),
    }
}

pub fn sample_profile(id: &str) -> DeviceProfile {
    DeviceProfile {
        id: id.to_string(),
        production_endpoint: "10.0.0.7:102".to_string(),
        test_endpoint: "127.0.0.1:10102".to_string(),
        cpu: "S7-1500".to_string(),
        rack: 0,
        slot: 1,
        signals: sample_signals("DB66"),
    }
}

pub fn sample_config(device_ids: &[&str]) -> GatewayConfig {
    GatewayConfig {
        mode: Mode::Test,
        devices: device_ids.iter().map(|id| sample_profile(id)).collect(),
        device_monitor: DeviceMonitorConfig::default(),
        barcode_handler: BarcodeConfig::default(),
        task_dispatcher: DispatcherConfig::default(),
        task_timeout: TaskTimeoutConfig::default(),
        plc: PlcConfig::default(),
        logger: LoggerConfig::default(),
    }
}

pub fn sample_task(task_id: &str, command_type: CommandType) -> TransportTask {
    TransportTask {
        task_id: task_id.to_string(),
        command_type,
        device_id: None,
        source_location: None,
        target_location: None,
        gate_number: 1,
        in_dir_block: Direction::Bottom,
        out_dir_block: Direction::Bottom,
    }
}
