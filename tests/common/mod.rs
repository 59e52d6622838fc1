//! Shared fixtures for the end-to-end scenario suite.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use shuttle_gateway::{
    DeviceProfile, Gateway, GatewayConfig, GatewayEvent, Location, PlcConnector, SignalMap,
    SimulatedConnector, SimulatorFactory,
};

/// A signal map laid out in one data block.
pub fn signals() -> SignalMap {
    let bit = |offset: u32| format!("DB66.DBX{offset}.0");
    let word = |offset: u32| format!("DB66.DBW{offset}");
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

pub fn profile(id: &str) -> DeviceProfile {
    DeviceProfile {
        id: id.to_string(),
        production_endpoint: "10.0.0.7:102".to_string(),
        test_endpoint: "127.0.0.1:10102".to_string(),
        cpu: "S7-1500".to_string(),
        rack: 0,
        slot: 1,
        signals: signals(),
    }
}

/// A test-mode configuration for the given fleet.
pub fn config(ids: &[&str]) -> GatewayConfig {
    let json = serde_json::json!({
        "mode": "test",
        "devices": [],
    });
    let mut config: GatewayConfig = serde_json::from_value(json).unwrap();
    config.devices = ids.iter().map(|id| profile(id)).collect();
    config
}

pub struct TestGateway {
    pub factory: Arc<SimulatorFactory>,
    pub gateway: Arc<Gateway>,
    pub events: broadcast::Receiver<GatewayEvent>,
}

impl TestGateway {
    pub async fn start(config: GatewayConfig) -> Self {
        let factory = Arc::new(SimulatorFactory::new());
        let gateway = Gateway::new(config, factory.clone()).unwrap();
        let events = gateway.subscribe();
        Self {
            factory,
            gateway,
            events,
        }
    }

    pub fn sim(&self, device_id: &str) -> Arc<SimulatedConnector> {
        self.factory.connector(device_id)
    }

    /// Bring a device online: connected, ready, under software control,
    /// parked at `location`, and actively monitored.
    pub async fn activate(&self, device_id: &str, location: Location) {
        let s = signals();
        let sim = self.sim(device_id);
        sim.ensure_connected().await.unwrap();
        sim.set_bool(&s.device_ready, true).await;
        sim.set_bool(&s.connected_to_software, true).await;
        sim.set_i16(&s.actual_floor, location.floor).await;
        sim.set_i16(&s.actual_rail, location.rail).await;
        sim.set_i16(&s.actual_block, location.block).await;
        self.gateway.activate_device(device_id).await.unwrap();
    }

    /// The next task-level event, skipping device status noise.
    pub async fn next_task_event(&mut self) -> GatewayEvent {
        loop {
            let event = self.events.recv().await.unwrap();
            if !matches!(event, GatewayEvent::DeviceStatusChanged { .. }) {
                return event;
            }
        }
    }

    /// Wait (in virtual time) until a scripted bit goes high.
    pub async fn wait_for_bit(&self, device_id: &str, address: &str) {
        let sim = self.sim(device_id);
        while !sim.get_bool(address).await {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
