//! Transfer Command Strategy
//!
//! Moves a pallet between two rack locations. The trigger raises the
//! transfer and start-process bits together, then writes both ends, the
//! gate, and both direction bits.

use async_trait::async_trait;

use crate::error::{PlcError, PlcResult};
use crate::model::CommandType;

use super::strategy::{CommandStrategy, PollContext};

pub struct TransferStrategy;

#[async_trait]
impl CommandStrategy for TransferStrategy {
    fn command_type(&self) -> CommandType {
        CommandType::Transfer
    }

    async fn trigger(&self, ctx: &PollContext) -> PlcResult<()> {
        let signals = &ctx.signals;
        let source = ctx
            .task
            .source_location
            .ok_or_else(|| PlcError::WriteFailed {
                address: signals.source_floor.clone(),
                reason: "transfer task without a source location".to_string(),
            })?;
        let target = ctx
            .task
            .target_location
            .ok_or_else(|| PlcError::WriteFailed {
                address: signals.target_floor.clone(),
                reason: "transfer task without a target location".to_string(),
            })?;

        tokio::try_join!(
            ctx.connector.write_bool(&signals.transfer_command, true),
            ctx.connector.write_bool(&signals.start_process_command, true),
        )?;
        ctx.connector
            .write_i16(&signals.source_floor, source.floor)
            .await?;
        ctx.connector
            .write_i16(&signals.source_rail, source.rail)
            .await?;
        ctx.connector
            .write_i16(&signals.source_block, source.block)
            .await?;
        ctx.connector
            .write_i16(&signals.target_floor, target.floor)
            .await?;
        ctx.connector
            .write_i16(&signals.target_rail, target.rail)
            .await?;
        ctx.connector
            .write_i16(&signals.target_block, target.block)
            .await?;
        ctx.connector
            .write_i16(&signals.gate_number, ctx.task.gate_number as i16)
            .await?;
        ctx.connector
            .write_bool(&signals.in_dir_block, ctx.task.in_dir_block.as_plc_bool())
            .await?;
        ctx.connector
            .write_bool(
                &signals.out_dir_block,
                ctx.task.out_dir_block.as_plc_bool(),
            )
            .await?;
        Ok(())
    }
}
