//! Command execution: per-type PLC trigger/polling strategies, the
//! exactly-once outcome guard, and the executor that owns active polls.

pub mod executor;
pub mod inbound;
pub mod outbound;
pub mod outcome;
pub mod strategy;
pub mod transfer;

pub use executor::{ActivePolls, CommandExecutor};
pub use outcome::OutcomeHandle;
pub use strategy::{CommandStrategy, PollContext};
