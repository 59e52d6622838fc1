//! Priority Task Queue
//!
//! Bounded-use max-heap with strict FIFO inside each priority level and
//! O(1) keyed lookup. A single mutex (owned by the dispatcher) covers the
//! whole structure; the queue itself is a plain data structure.
//!
//! Removal by key purges both the index and the heap; as a second line of
//! defence, `try_dequeue` transparently skips heap entries that are no
//! longer in the index.

use std::collections::{BinaryHeap, HashMap};

use crate::model::{TaskPriority, TransportTask};

/// One queued task with its dispatch ordering key.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub task: TransportTask,
    pub priority: TaskPriority,
    /// Monotonic submission number; lower dispatches first within a
    /// priority level.
    pub sequence: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    /// Max-heap key: higher priority first, then lower sequence first.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Default)]
pub struct PriorityTaskQueue {
    heap: BinaryHeap<QueueEntry>,
    /// task_id -> sequence of the live entry.
    index: HashMap<String, u64>,
    next_sequence: u64,
}

impl PriorityTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.index.contains_key(task_id)
    }

    /// Enqueue a task. Fails when the id is already queued.
    pub fn enqueue(&mut self, task: TransportTask, priority: TaskPriority) -> Result<(), String> {
        if self.index.contains_key(&task.task_id) {
            return Err(format!("task {} is already queued", task.task_id));
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.index.insert(task.task_id.clone(), sequence);
        self.heap.push(QueueEntry {
            task,
            priority,
            sequence,
        });
        Ok(())
    }

    /// The entry that would dequeue next, without removing it. Stale heap
    /// entries are discarded on the way.
    pub fn try_peek(&mut self) -> Option<&QueueEntry> {
        self.discard_stale_head();
        self.heap.peek()
    }

    /// Remove and return the highest-priority, lowest-sequence entry.
    pub fn try_dequeue(&mut self) -> Option<QueueEntry> {
        self.discard_stale_head();
        let entry = self.heap.pop()?;
        self.index.remove(&entry.task.task_id);
        Some(entry)
    }

    /// Remove a task by id from both index and heap. The heap walk is
    /// O(n), acceptable at the configured bound (≤ 50 entries).
    pub fn try_remove(&mut self, task_id: &str) -> Option<QueueEntry> {
        let sequence = self.index.remove(task_id)?;
        let mut removed = None;
        let entries = std::mem::take(&mut self.heap).into_vec();
        self.heap = entries
            .into_iter()
            .filter_map(|entry| {
                if entry.sequence == sequence && entry.task.task_id == task_id {
                    removed = Some(entry);
                    None
                } else {
                    Some(entry)
                }
            })
            .collect();
        removed
    }

    /// Snapshot of all queued tasks in dispatch order.
    pub fn snapshot(&self) -> Vec<TransportTask> {
        let mut entries: Vec<&QueueEntry> = self
            .heap
            .iter()
            .filter(|entry| self.index.get(&entry.task.task_id) == Some(&entry.sequence))
            .collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|entry| entry.task.clone()).collect()
    }

    fn discard_stale_head(&mut self) {
        while let Some(head) = self.heap.peek() {
            match self.index.get(&head.task.task_id) {
                Some(sequence) if *sequence == head.sequence => return,
                _ => {
                    self.heap.pop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CommandType;
    use crate::test_support::sample_task;

    fn queue_with(entries: &[(&str, TaskPriority)]) -> PriorityTaskQueue {
        let mut queue = PriorityTaskQueue::new();
        for (id, priority) in entries {
            queue
                .enqueue(sample_task(id, CommandType::Inbound), *priority)
                .unwrap();
        }
        queue
    }

    #[test]
    fn fifo_within_a_priority_level() {
        let mut queue = queue_with(&[
            ("N1", TaskPriority::Normal),
            ("N2", TaskPriority::Normal),
            ("N3", TaskPriority::Normal),
        ]);
        assert_eq!(queue.try_dequeue().unwrap().task.task_id, "N1");
        assert_eq!(queue.try_dequeue().unwrap().task.task_id, "N2");
        assert_eq!(queue.try_dequeue().unwrap().task.task_id, "N3");
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn higher_priority_jumps_the_line() {
        let mut queue = queue_with(&[
            ("N1", TaskPriority::Normal),
            ("H1", TaskPriority::High),
            ("N2", TaskPriority::Normal),
            ("C1", TaskPriority::Critical),
        ]);
        let order: Vec<String> = std::iter::from_fn(|| queue.try_dequeue())
            .map(|e| e.task.task_id)
            .collect();
        assert_eq!(order, ["C1", "H1", "N1", "N2"]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut queue = queue_with(&[("T1", TaskPriority::Normal)]);
        assert!(queue
            .enqueue(sample_task("T1", CommandType::Inbound), TaskPriority::High)
            .is_err());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn remove_by_key_purges_index_and_heap() {
        let mut queue = queue_with(&[
            ("T1", TaskPriority::Normal),
            ("T2", TaskPriority::Normal),
            ("T3", TaskPriority::Normal),
        ]);
        let removed = queue.try_remove("T2").unwrap();
        assert_eq!(removed.task.task_id, "T2");
        assert_eq!(queue.len(), 2);
        assert!(!queue.contains("T2"));
        assert_eq!(queue.try_dequeue().unwrap().task.task_id, "T1");
        assert_eq!(queue.try_dequeue().unwrap().task.task_id, "T3");
    }

    #[test]
    fn remove_of_missing_id_is_a_noop() {
        let mut queue = queue_with(&[("T1", TaskPriority::Normal)]);
        assert!(queue.try_remove("T9").is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn peek_does_not_remove() {
        let mut queue = queue_with(&[("T1", TaskPriority::Normal)]);
        assert_eq!(queue.try_peek().unwrap().task.task_id, "T1");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_dequeue().unwrap().task.task_id, "T1");
    }

    #[test]
    fn snapshot_lists_dispatch_order() {
        let queue = queue_with(&[
            ("N1", TaskPriority::Normal),
            ("H1", TaskPriority::High),
            ("N2", TaskPriority::Normal),
        ]);
        let ids: Vec<String> = queue.snapshot().into_iter().map(|t| t.task_id).collect();
        assert_eq!(ids, ["H1", "N1", "N2"]);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn reenqueue_after_removal_is_allowed() {
        let mut queue = queue_with(&[("T1", TaskPriority::Normal)]);
        queue.try_remove("T1").unwrap();
        assert!(queue
            .enqueue(sample_task("T1", CommandType::Inbound), TaskPriority::Normal)
            .is_ok());
    }
}
