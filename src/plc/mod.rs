//! PLC connectivity: the connector abstraction, the per-device connection
//! pool, and the in-memory simulator used in test mode.

pub mod connector;
pub mod pool;
pub mod simulator;

pub use connector::{ConnectorFactory, PlcConnector};
pub use pool::ConnectionPool;
pub use simulator::{SimulatedConnector, SimulatorFactory};
