//! Command Strategy Contract
//!
//! Each command type supplies a trigger (the initial PLC writes) and an
//! optional per-tick hook; the polling loop itself is shared. The loop
//! runs at one tick per second on the monotonic clock until completion,
//! alarm, device cancel, external cancellation, or timeout.
//!
//! Per tick the loop reads `cancel_command`, `alarm`, `command_rejected`
//! and the type-specific completion bit, then applies the outcome rules:
//!
//! | Observation                      | Action                                   |
//! |----------------------------------|------------------------------------------|
//! | cancel bit set                   | terminal Cancelled, device → Error       |
//! | rejected/alarm without complete  | TaskFailed(device code), alarm loop      |
//! | complete with alarm              | same as above                            |
//! | complete without alarm           | settle, terminal Succeeded, device Idle  |
//! | timeout elapsed                  | terminal Failed(1006)                    |
//! | external cancellation            | return silently                          |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{codes, ErrorDetail, PlcResult};
use crate::model::{CommandType, SignalMap, TransportTask};
use crate::plc::PlcConnector;

use super::outcome::OutcomeHandle;

/// Polling cadence.
pub const POLL_TICK: Duration = Duration::from_secs(1);

/// Empirical settling time between a completion bit and the device being
/// ready for the next command.
pub const SETTLEMENT_DELAY: Duration = Duration::from_secs(6);

/// How long the alarm-resolution loop keeps watching for a late
/// completion or cancel before giving up.
pub const ALARM_RESOLUTION_LIMIT: Duration = Duration::from_secs(30 * 60);

/// Everything a strategy needs to drive one task on one device.
pub struct PollContext {
    pub task: TransportTask,
    pub device_id: String,
    pub connector: Arc<dyn PlcConnector>,
    pub signals: SignalMap,
    pub timeout: Duration,
    pub timeout_minutes: u64,
    pub token: CancellationToken,
    pub outcome: Arc<OutcomeHandle>,
}

#[async_trait]
pub trait CommandStrategy: Send + Sync {
    fn command_type(&self) -> CommandType;

    /// Perform the initial PLC writes for this command.
    async fn trigger(&self, ctx: &PollContext) -> PlcResult<()>;

    /// Per-tick hook, run before the completion signals are read.
    async fn on_tick(&self, _ctx: &PollContext) -> PlcResult<()> {
        Ok(())
    }
}

/// Drive the shared polling loop to a single outcome.
///
/// Read failures propagate to the caller (the executor maps them onto a
/// terminal Failed); every other exit emits through the outcome handle or
/// returns silently on external cancellation.
pub async fn run_poll(strategy: Arc<dyn CommandStrategy>, ctx: PollContext) -> PlcResult<()> {
    let started = tokio::time::Instant::now();
    let complete_signal = ctx
        .signals
        .complete_signal(strategy.command_type())
        .to_string();

    loop {
        if ctx.token.is_cancelled() {
            return Ok(());
        }
        if started.elapsed() >= ctx.timeout {
            ctx.outcome.failed(ErrorDetail::new(
                codes::TIMEOUT,
                format!(
                    "Timeout: no completion signal within {} minutes",
                    ctx.timeout_minutes
                ),
            ));
            return Ok(());
        }

        strategy.on_tick(&ctx).await?;

        if ctx.connector.read_bool(&ctx.signals.cancel_command).await? {
            ctx.outcome.cancelled();
            return Ok(());
        }
        let alarm = ctx.connector.read_bool(&ctx.signals.alarm).await?;
        let rejected = ctx
            .connector
            .read_bool(&ctx.signals.command_rejected)
            .await?;
        let complete = ctx.connector.read_bool(&complete_signal).await?;

        if (rejected || alarm) && !complete || (complete && alarm) {
            let code = ctx.connector.read_i16(&ctx.signals.error_code).await?;
            ctx.outcome
                .failed_pending_resolution(ErrorDetail::running_failure(code as i32));
            resolve_alarm(&ctx, &complete_signal).await?;
            return Ok(());
        }

        if complete {
            if !settle(&ctx).await {
                return Ok(());
            }
            ctx.outcome.succeeded();
            return Ok(());
        }

        if !tick_wait(&ctx).await {
            return Ok(());
        }
    }
}

/// After an alarm, keep watching the completion and cancel bits so a
/// manually recovered command can still finish. An unresolved alarm
/// leaves the task assigned for operator recovery.
async fn resolve_alarm(ctx: &PollContext, complete_signal: &str) -> PlcResult<()> {
    let started = tokio::time::Instant::now();
    debug!(task_id = %ctx.task.task_id, "entering alarm resolution");

    while started.elapsed() < ALARM_RESOLUTION_LIMIT {
        if ctx.token.is_cancelled() {
            return Ok(());
        }
        if ctx.connector.read_bool(&ctx.signals.cancel_command).await? {
            ctx.outcome.cancelled();
            return Ok(());
        }
        if ctx.connector.read_bool(complete_signal).await? {
            if !settle(ctx).await {
                return Ok(());
            }
            ctx.outcome.succeeded();
            return Ok(());
        }
        if !tick_wait(ctx).await {
            return Ok(());
        }
    }

    warn!(task_id = %ctx.task.task_id, "alarm unresolved; leaving task for operator recovery");
    Ok(())
}

/// Settlement delay after a completion bit. Returns false when cancelled
/// mid-wait.
async fn settle(ctx: &PollContext) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(SETTLEMENT_DELAY) => true,
        _ = ctx.token.cancelled() => false,
    }
}

/// One polling tick. Returns false when cancelled mid-wait.
async fn tick_wait(ctx: &PollContext) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(POLL_TICK) => true,
        _ = ctx.token.cancelled() => false,
    }
}
