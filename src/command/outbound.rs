//! Outbound Command Strategy
//!
//! Moves a pallet from a rack location out to a gate. The trigger raises
//! the outbound and start-process bits together, then writes the source
//! coordinates, the gate, and the outfeed direction.

use async_trait::async_trait;

use crate::error::{PlcError, PlcResult};
use crate::model::CommandType;

use super::strategy::{CommandStrategy, PollContext};

pub struct OutboundStrategy;

#[async_trait]
impl CommandStrategy for OutboundStrategy {
    fn command_type(&self) -> CommandType {
        CommandType::Outbound
    }

    async fn trigger(&self, ctx: &PollContext) -> PlcResult<()> {
        let signals = &ctx.signals;
        let source = ctx
            .task
            .source_location
            .ok_or_else(|| PlcError::WriteFailed {
                address: signals.source_floor.clone(),
                reason: "outbound task without a source location".to_string(),
            })?;

        tokio::try_join!(
            ctx.connector.write_bool(&signals.outbound_command, true),
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
            .write_i16(&signals.gate_number, ctx.task.gate_number as i16)
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
