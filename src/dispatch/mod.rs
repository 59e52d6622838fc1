//! Task dispatching: the bounded priority queue, the device-assignment
//! strategy, and the dispatcher that drives both.

pub mod assignment;
pub mod dispatcher;
pub mod queue;

pub use assignment::HybridAssignment;
pub use dispatcher::{TaskAssignment, TaskDispatcher};
pub use queue::{PriorityTaskQueue, QueueEntry};
