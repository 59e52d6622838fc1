//! Gateway Error Types
//!
//! Every failure surfaced to callers or carried on a `TaskFailed` event
//! funnels into [`ErrorDetail`], which keeps the numeric codes visible on
//! the wire-facing log stream. Codes 1001..1011 are gateway conditions;
//! codes 1..102 pass a device-reported error code through verbatim.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Gateway error codes (wire-visible).
pub mod codes {
    /// No pending validation entry for the task.
    pub const NOT_FOUND_TASK: i32 = 1001;
    /// A validation entry exists but belongs to a different device.
    pub const MISMATCHED_DEVICE: i32 = 1002;
    /// The device id is not present in the configured fleet.
    pub const DEVICE_NOT_REGISTERED: i32 = 1003;
    /// A PLC read inside a polling loop failed.
    pub const POLLING_EXCEPTION: i32 = 1004;
    /// A command did not complete within its configured timeout.
    pub const TIMEOUT: i32 = 1006;
    /// Catch-all for unclassified failures.
    pub const UNKNOWN: i32 = 1007;
    /// Trigger or poll setup failed outside the known categories.
    pub const EXECUTION_EXCEPTION: i32 = 1008;
    /// Barcode validation failed or timed out.
    pub const VALIDATION_EXCEPTION: i32 = 1009;
    /// Enqueue would exceed the configured queue bound.
    pub const TASK_QUEUE_FULL: i32 = 1010;
    /// The PLC connection could not be established or was lost.
    pub const PLC_CONNECTION_FAILED: i32 = 1011;

    /// Inclusive range of device-reported running-failure codes.
    pub const RUNNING_FAILURE_MIN: i32 = 1;
    pub const RUNNING_FAILURE_MAX: i32 = 102;
}

/// Human-readable text for a device-reported error code.
///
/// The table covers the codes the shuttle firmware is known to raise;
/// anything else falls through to a generic message with the code embedded.
pub fn running_failure_message(code: i32) -> String {
    match code {
        1 => "Emergency stop engaged".to_string(),
        2 => "Pallet sensor blocked".to_string(),
        3 => "Lift not in position".to_string(),
        4 => "Rail obstruction detected".to_string(),
        5 => "Battery level critical".to_string(),
        6 => "Source location empty".to_string(),
        7 => "Target location does not match".to_string(),
        8 => "Target location occupied".to_string(),
        9 => "Barcode reader fault".to_string(),
        10 => "Drive inverter fault".to_string(),
        other => format!("Device reported error code {}", other),
    }
}

/// Structured failure payload carried on `TaskFailed` events and inside
/// coded [`GatewayError`] variants.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    /// Numeric error code (see [`codes`]).
    pub code: i32,
    /// Human-readable description.
    pub message: String,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
    /// Underlying cause, if the failure wraps another error.
    pub cause: Option<String>,
}

impl ErrorDetail {
    /// Create a detail with the current timestamp and no cause.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            timestamp: Utc::now(),
            cause: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_cause(mut self, cause: impl std::fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Build a detail for a device-reported running failure, passing the
    /// device code through verbatim.
    pub fn running_failure(code: i32) -> Self {
        Self::new(code, running_failure_message(code))
    }

    /// Stable log formatting: `"[code] message"` plus the cause on a
    /// second line when present.
    pub fn full_message(&self) -> String {
        match &self.cause {
            Some(cause) => format!("[{}] {}\nException: {}", self.code, self.message, cause),
            None => format!("[{}] {}", self.code, self.message),
        }
    }

    /// Whether this failure must halt dispatching until an operator
    /// explicitly resumes the queue.
    pub fn requires_manual_resume(&self) -> bool {
        self.code == codes::PLC_CONNECTION_FAILED
            || (codes::RUNNING_FAILURE_MIN..=codes::RUNNING_FAILURE_MAX).contains(&self.code)
    }
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_message())
    }
}

/// Errors raised by PLC connectors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlcError {
    #[error("connection to {endpoint} failed after {attempts} attempts")]
    ConnectionFailed { endpoint: String, attempts: u32 },
    #[error("{operation} on {address} timed out after {timeout_secs}s")]
    Timeout {
        operation: &'static str,
        address: String,
        timeout_secs: u64,
    },
    #[error("read of {address} failed: {reason}")]
    ReadFailed { address: String, reason: String },
    #[error("write of {address} failed: {reason}")]
    WriteFailed { address: String, reason: String },
    #[error("connector is not connected")]
    NotConnected,
}

impl PlcError {
    /// Map onto the wire-visible detail carried by failure events.
    pub fn to_detail(&self) -> ErrorDetail {
        match self {
            Self::ConnectionFailed { .. } | Self::NotConnected => {
                ErrorDetail::new(codes::PLC_CONNECTION_FAILED, "PLC connection failed")
                    .with_cause(self)
            }
            Self::Timeout { .. } => {
                ErrorDetail::new(codes::TIMEOUT, "PLC operation timed out").with_cause(self)
            }
            _ => ErrorDetail::new(codes::POLLING_EXCEPTION, "PLC signal access failed")
                .with_cause(self),
        }
    }
}

/// Top-level gateway error.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Synchronous façade validation failure (bad ids, missing locations).
    /// Surfaces to the caller directly; no event is emitted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The requested operation is not legal in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A coded failure with full wire-visible detail.
    #[error("{}", .0.full_message())]
    Detail(ErrorDetail),

    /// Underlying PLC failure.
    #[error(transparent)]
    Plc(#[from] PlcError),

    /// The gateway (or dispatcher) has been disposed.
    #[error("gateway has been disposed")]
    Disposed,
}

impl GatewayError {
    /// The wire-visible detail for this error, synthesizing one for the
    /// variants that do not carry it natively.
    pub fn detail(&self) -> ErrorDetail {
        match self {
            Self::Detail(d) => d.clone(),
            Self::Plc(e) => e.to_detail(),
            Self::Validation(msg) => ErrorDetail::new(codes::VALIDATION_EXCEPTION, msg.clone()),
            Self::InvalidOperation(msg) => ErrorDetail::new(codes::UNKNOWN, msg.clone()),
            Self::Disposed => ErrorDetail::new(codes::UNKNOWN, "gateway has been disposed"),
        }
    }

    /// Shorthand for a coded detail error.
    pub fn coded(code: i32, message: impl Into<String>) -> Self {
        Self::Detail(ErrorDetail::new(code, message))
    }
}

/// Crate-wide result alias.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Result alias for connector implementations.
pub type PlcResult<T> = Result<T, PlcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_message_without_cause() {
        let detail = ErrorDetail::new(codes::TIMEOUT, "no completion signal");
        assert_eq!(detail.full_message(), "[1006] no completion signal");
    }

    #[test]
    fn full_message_with_cause() {
        let detail = ErrorDetail::new(codes::POLLING_EXCEPTION, "read failed")
            .with_cause("socket closed by peer");
        assert_eq!(
            detail.full_message(),
            "[1004] read failed\nException: socket closed by peer"
        );
    }

    #[test]
    fn running_failure_passes_code_through() {
        let detail = ErrorDetail::running_failure(7);
        assert_eq!(detail.code, 7);
        assert_eq!(detail.message, "Target location does not match");
    }

    #[test]
    fn unknown_running_failure_keeps_code_in_message() {
        let detail = ErrorDetail::running_failure(42);
        assert_eq!(detail.code, 42);
        assert!(detail.message.contains("42"));
    }

    #[test]
    fn manual_resume_policy_covers_running_and_connection_failures() {
        assert!(ErrorDetail::running_failure(7).requires_manual_resume());
        assert!(ErrorDetail::new(codes::PLC_CONNECTION_FAILED, "down").requires_manual_resume());
        assert!(!ErrorDetail::new(codes::TIMEOUT, "slow").requires_manual_resume());
        assert!(!ErrorDetail::new(codes::TASK_QUEUE_FULL, "full").requires_manual_resume());
    }

    #[test]
    fn plc_error_maps_to_connection_code() {
        let err = PlcError::ConnectionFailed {
            endpoint: "10.0.0.7:102".to_string(),
            attempts: 5,
        };
        assert_eq!(err.to_detail().code, codes::PLC_CONNECTION_FAILED);
    }
}
