//! Inbound Command Strategy
//!
//! Moves a pallet from a gate into the racking system. The target comes
//! from barcode validation, not from the task: once per task, the polling
//! loop watches the barcode words and hands a real barcode to the
//! validator, which waits for the external verdict and writes the routing
//! back to the PLC while polling continues toward completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::barcode::BarcodeValidator;
use crate::error::PlcResult;
use crate::model::CommandType;

use super::strategy::{CommandStrategy, PollContext};

/// The barcode words read as this before the scanner has seen a pallet.
const DEFAULT_BARCODE: &str = "0000000000";

pub struct InboundStrategy {
    validator: Arc<BarcodeValidator>,
    /// One barcode submission per task.
    barcode_sent: AtomicBool,
}

impl InboundStrategy {
    pub fn new(validator: Arc<BarcodeValidator>) -> Self {
        Self {
            validator,
            barcode_sent: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl CommandStrategy for InboundStrategy {
    fn command_type(&self) -> CommandType {
        CommandType::Inbound
    }

    async fn trigger(&self, ctx: &PollContext) -> PlcResult<()> {
        let signals = &ctx.signals;
        tokio::try_join!(
            ctx.connector.write_bool(&signals.inbound_command, true),
            ctx.connector.write_bool(&signals.start_process_command, true),
        )?;
        ctx.connector
            .write_i16(&signals.gate_number, ctx.task.gate_number as i16)
            .await?;
        ctx.connector
            .write_bool(&signals.in_dir_block, ctx.task.in_dir_block.as_plc_bool())
            .await?;
        Ok(())
    }

    async fn on_tick(&self, ctx: &PollContext) -> PlcResult<()> {
        if self.barcode_sent.load(Ordering::Acquire) {
            return Ok(());
        }

        let barcode = self
            .validator
            .read_barcode(&ctx.connector, &ctx.signals)
            .await;
        if barcode.is_empty() || barcode == DEFAULT_BARCODE {
            return Ok(());
        }
        if self.barcode_sent.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        debug!(task_id = %ctx.task.task_id, barcode, "barcode observed; validating");
        let validator = self.validator.clone();
        let outcome = ctx.outcome.clone();
        let device_id = ctx.device_id.clone();
        let task_id = ctx.task.task_id.clone();
        // Validation runs beside the poll: the verdict write reaches the
        // PLC independently, and a validation failure fails the task
        // through the outcome guard (which also stops this poll).
        tokio::spawn(async move {
            if let Err(e) = validator.send_barcode(&device_id, &task_id, &barcode).await {
                outcome.failed(e.detail());
            }
        });
        Ok(())
    }
}
