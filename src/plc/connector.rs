//! PLC Connector Abstraction
//!
//! The gateway talks to shuttles exclusively through [`PlcConnector`]: a
//! protocol-opaque, object-safe async trait over named signal addresses.
//! Wire encodings (S7, Modbus, plain TCP text) live in connector
//! implementations supplied by the embedding application; the in-crate
//! [`SimulatedConnector`](super::simulator::SimulatedConnector) backs test
//! mode and the scenario suite.
//!
//! A connector serializes its own I/O: at most one in-flight request per
//! device at any time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::Mode;
use crate::error::{PlcError, PlcResult};
use crate::model::DeviceProfile;

/// Typed access to named PLC addresses.
///
/// The source's generic `read<T>` surface is expressed as typed methods so
/// the trait stays object-safe; the supported value kinds are bool, 16/32
/// bit integers and character words (one character per word).
#[async_trait]
pub trait PlcConnector: Send + Sync + std::fmt::Debug {
    async fn read_bool(&self, address: &str) -> PlcResult<bool>;
    async fn write_bool(&self, address: &str, value: bool) -> PlcResult<()>;

    async fn read_i16(&self, address: &str) -> PlcResult<i16>;
    async fn write_i16(&self, address: &str, value: i16) -> PlcResult<()>;

    async fn read_i32(&self, address: &str) -> PlcResult<i32>;
    async fn write_i32(&self, address: &str, value: i32) -> PlcResult<()>;

    /// Read a character word. Returns an empty string for a cleared word;
    /// implementations may return multi-character content for packed
    /// words, which barcode assembly treats as a terminator.
    async fn read_char_word(&self, address: &str) -> PlcResult<String>;

    async fn is_connected(&self) -> bool;

    /// Establish the connection if it is not already up.
    async fn ensure_connected(&self) -> PlcResult<()>;
}

/// Bound an individual read with the configured timeout.
pub async fn read_with_timeout<T, F>(limit: Duration, address: &str, op: F) -> PlcResult<T>
where
    F: std::future::Future<Output = PlcResult<T>> + Send,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => Err(PlcError::Timeout {
            operation: "read",
            address: address.to_string(),
            timeout_secs: limit.as_secs(),
        }),
    }
}

/// Bound an individual write with the configured timeout.
pub async fn write_with_timeout<F>(limit: Duration, address: &str, op: F) -> PlcResult<()>
where
    F: std::future::Future<Output = PlcResult<()>> + Send,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => Err(PlcError::Timeout {
            operation: "write",
            address: address.to_string(),
            timeout_secs: limit.as_secs(),
        }),
    }
}

/// Produces connectors for the pool. Implementations pick the transport;
/// the pool owns retry and lifecycle.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    async fn create(
        &self,
        profile: &DeviceProfile,
        mode: Mode,
    ) -> PlcResult<Arc<dyn PlcConnector>>;
}
