//! Device Assignment
//!
//! Picks an eligible idle device for a task. Pinned tasks go to their
//! device or nowhere. Unpinned tasks rank idle devices by Manhattan
//! distance from a reference location, then pick with a shared
//! round-robin counter — trading strict closest-first for fleet-wide
//! fairness under sustained load.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::config::DispatcherConfig;
use crate::model::{CommandType, DeviceInfo, DeviceProfile, Location, TransportTask};

/// Upper bound for the shared round-robin counter; wrapping keeps it from
/// growing without bound.
const ROUND_ROBIN_WRAP: usize = 1_000_000;

pub struct HybridAssignment {
    round_robin: AtomicUsize,
}

impl HybridAssignment {
    pub fn new() -> Self {
        Self {
            round_robin: AtomicUsize::new(0),
        }
    }

    /// Choose a device for `task`, or `None` when no eligible device
    /// exists right now (the task stays at the head of the queue).
    pub fn select_device(
        &self,
        task: &TransportTask,
        idle_devices: &[DeviceInfo],
        profiles: &HashMap<String, DeviceProfile>,
        assigning: &HashMap<String, String>,
        config: &DispatcherConfig,
    ) -> Option<DeviceProfile> {
        // Pinned tasks never fall back to another device.
        if let Some(pinned) = &task.device_id {
            let is_idle = idle_devices.iter().any(|d| &d.device_id == pinned);
            if is_idle && !assigning.contains_key(pinned) {
                return profiles.get(pinned).cloned();
            }
            debug!(task_id = %task.task_id, device_id = %pinned, "pinned device unavailable");
            return None;
        }

        let reference = self.reference_location(task, config)?;

        let mut candidates: Vec<&DeviceInfo> = idle_devices
            .iter()
            .filter(|d| !assigning.contains_key(&d.device_id))
            .filter(|d| profiles.contains_key(&d.device_id))
            .filter(|d| d.location.is_some())
            .collect();
        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by_key(|d| {
            d.location
                .map(|loc| loc.manhattan_distance(&reference))
                .unwrap_or(i32::MAX)
        });

        let turn = self.round_robin.fetch_add(1, Ordering::Relaxed);
        if turn + 1 >= ROUND_ROBIN_WRAP {
            self.round_robin.store(0, Ordering::Relaxed);
        }
        let chosen = candidates[turn % candidates.len()];
        profiles.get(&chosen.device_id).cloned()
    }

    fn reference_location(
        &self,
        task: &TransportTask,
        config: &DispatcherConfig,
    ) -> Option<Location> {
        match task.command_type {
            CommandType::Outbound | CommandType::Transfer => task.source_location,
            CommandType::Inbound => config.reference_location(CommandType::Inbound),
        }
    }
}

impl Default for HybridAssignment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceStatus;
    use crate::test_support::{sample_profile, sample_task};

    fn idle(device_id: &str, location: Location) -> DeviceInfo {
        DeviceInfo {
            device_id: device_id.to_string(),
            status: DeviceStatus::Idle,
            location: Some(location),
        }
    }

    fn profiles(ids: &[&str]) -> HashMap<String, DeviceProfile> {
        ids.iter()
            .map(|id| (id.to_string(), sample_profile(id)))
            .collect()
    }

    #[test]
    fn pinned_task_only_takes_its_device() {
        let strategy = HybridAssignment::new();
        let config = DispatcherConfig::default();
        let mut task = sample_task("T1", CommandType::Inbound);
        task.device_id = Some("SHUTTLE_02".to_string());

        let fleet = profiles(&["SHUTTLE_01", "SHUTTLE_02"]);
        let idle_list = vec![idle("SHUTTLE_01", Location::new(1, 1, 1))];

        // Pinned device is not idle: no fallback to SHUTTLE_01.
        assert!(strategy
            .select_device(&task, &idle_list, &fleet, &HashMap::new(), &config)
            .is_none());

        let idle_list = vec![
            idle("SHUTTLE_01", Location::new(1, 1, 1)),
            idle("SHUTTLE_02", Location::new(9, 9, 9)),
        ];
        let chosen = strategy
            .select_device(&task, &idle_list, &fleet, &HashMap::new(), &config)
            .unwrap();
        assert_eq!(chosen.id, "SHUTTLE_02");
    }

    #[test]
    fn pinned_device_already_assigning_is_unavailable() {
        let strategy = HybridAssignment::new();
        let config = DispatcherConfig::default();
        let mut task = sample_task("T1", CommandType::Inbound);
        task.device_id = Some("SHUTTLE_01".to_string());

        let fleet = profiles(&["SHUTTLE_01"]);
        let idle_list = vec![idle("SHUTTLE_01", Location::new(1, 1, 1))];
        let mut assigning = HashMap::new();
        assigning.insert("SHUTTLE_01".to_string(), "T0".to_string());

        assert!(strategy
            .select_device(&task, &idle_list, &fleet, &assigning, &config)
            .is_none());
    }

    #[test]
    fn outbound_ranks_by_distance_from_source() {
        let strategy = HybridAssignment::new();
        let config = DispatcherConfig::default();
        let mut task = sample_task("T1", CommandType::Outbound);
        task.source_location = Some(Location::new(1, 2, 3));

        let fleet = profiles(&["NEAR", "FAR"]);
        let idle_list = vec![
            idle("FAR", Location::new(5, 9, 9)),
            idle("NEAR", Location::new(1, 2, 4)),
        ];

        // First pick is the closest device (round-robin turn 0).
        let chosen = strategy
            .select_device(&task, &idle_list, &fleet, &HashMap::new(), &config)
            .unwrap();
        assert_eq!(chosen.id, "NEAR");
    }

    #[test]
    fn round_robin_rotates_across_calls() {
        let strategy = HybridAssignment::new();
        let config = DispatcherConfig::default();
        let task = sample_task("T1", CommandType::Inbound);

        let fleet = profiles(&["A", "B"]);
        let idle_list = vec![
            idle("A", Location::new(1, 14, 5)),
            idle("B", Location::new(1, 14, 5)),
        ];

        let first = strategy
            .select_device(&task, &idle_list, &fleet, &HashMap::new(), &config)
            .unwrap();
        let second = strategy
            .select_device(&task, &idle_list, &fleet, &HashMap::new(), &config)
            .unwrap();
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn devices_already_assigning_are_filtered() {
        let strategy = HybridAssignment::new();
        let config = DispatcherConfig::default();
        let task = sample_task("T1", CommandType::Inbound);

        let fleet = profiles(&["A", "B"]);
        let idle_list = vec![
            idle("A", Location::new(1, 14, 5)),
            idle("B", Location::new(1, 14, 5)),
        ];
        let mut assigning = HashMap::new();
        assigning.insert("A".to_string(), "T0".to_string());

        for _ in 0..3 {
            let chosen = strategy
                .select_device(&task, &idle_list, &fleet, &assigning, &config)
                .unwrap();
            assert_eq!(chosen.id, "B");
        }
    }

    #[test]
    fn no_candidates_yields_none() {
        let strategy = HybridAssignment::new();
        let config = DispatcherConfig::default();
        let task = sample_task("T1", CommandType::Inbound);
        assert!(strategy
            .select_device(&task, &[], &profiles(&["A"]), &HashMap::new(), &config)
            .is_none());
    }
}
