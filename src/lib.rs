//! Shuttle Gateway - Warehouse Automation Task Orchestration
//!
//! Mediates between higher-level warehouse software and a fleet of
//! PLC-driven shuttle devices: accepts transport commands (inbound,
//! outbound and transfer pallet moves), assigns them to eligible devices,
//! drives each device through its PLC signal protocol, and reports
//! outcomes through events.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Warehouse software: commands, validation verdicts, subscribers │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Gateway façade                             │
//! └─────────────────────────────────────────────────────────────────┘
//!          │                    │                       │
//!          ▼                    ▼                       ▼
//! ┌────────────────┐   ┌────────────────┐   ┌─────────────────────┐
//! │ TaskDispatcher │──▶│ CommandExecutor │──▶│  BarcodeValidator   │
//! │ queue+assign   │   │ strategies+poll │   │  request/verdict    │
//! └────────────────┘   └────────────────┘   └─────────────────────┘
//!          │                    │                       │
//!          ▼                    ▼                       ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │        DeviceMonitor · ConnectionPool · PlcConnector            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use shuttle_gateway::{Gateway, GatewayConfig, SimulatorFactory};
//!
//! let config: GatewayConfig = serde_json::from_str(&config_json)?;
//! let gateway = Gateway::new(config, Arc::new(SimulatorFactory::new()))?;
//!
//! gateway.activate_device("SHUTTLE_01").await?;
//! let mut events = gateway.subscribe();
//! gateway.send_command(task).await?;
//! ```

pub mod barcode;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod gateway;
pub mod model;
pub mod monitor;
pub mod plc;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export main types
pub use barcode::{BarcodeRequest, BarcodeValidator};
pub use command::CommandExecutor;
pub use config::{init_tracing, GatewayConfig, Mode};
pub use dispatch::{TaskAssignment, TaskDispatcher};
pub use error::{ErrorDetail, GatewayError, GatewayResult, PlcError, PlcResult};
pub use events::{EventBus, GatewayEvent};
pub use gateway::{dispose_global, global, init_global, Gateway};
pub use model::{
    CommandType, DeviceInfo, DeviceProfile, DeviceStatus, Direction, DispatcherState, Location,
    SignalMap, TaskPriority, TransportTask,
};
pub use monitor::DeviceMonitor;
pub use plc::{ConnectionPool, ConnectorFactory, PlcConnector, SimulatedConnector, SimulatorFactory};
