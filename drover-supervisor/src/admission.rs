//! Memory-aware admission control

use drover_core::config::AdmissionConfig;
use drover_core::process::{HostMemory, MemorySnapshot};
use std::sync::Arc;

/// Decides how many workers the host can sustain right now.
///
/// `admissible = min(max_workers, (available - reserve) / per_worker)`,
/// saturating at zero. The value follows available memory, so it can shrink
/// while workers are already running; existing workers are never evicted.
#[derive(Clone)]
pub struct AdmissionController {
    config: AdmissionConfig,
    memory: Arc<dyn HostMemory>,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig, memory: Arc<dyn HostMemory>) -> Self {
        Self { config, memory }
    }

    /// Number of workers allowed in flight at this moment
    pub async fn admissible_workers(&self) -> usize {
        let snapshot = self.memory.snapshot().await;
        self.admissible_for(&snapshot)
    }

    /// Current host memory figures
    pub async fn memory_snapshot(&self) -> MemorySnapshot {
        self.memory.snapshot().await
    }

    /// Admission decision for a given memory snapshot
    pub fn admissible_for(&self, snapshot: &MemorySnapshot) -> usize {
        let usable_mb = snapshot
            .available_mb()
            .saturating_sub(self.config.memory_reserve_mb);
        let by_memory = usable_mb / self.config.per_worker_memory_mb.max(1);
        let by_memory = usize::try_from(by_memory).unwrap_or(usize::MAX);
        by_memory.min(self.config.max_workers)
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::process::FixedHostMemory;

    fn controller(max_workers: usize, available_mb: u64) -> (AdmissionController, FixedHostMemory) {
        let memory = FixedHostMemory::from_mb(16_384, available_mb);
        let config = AdmissionConfig {
            max_workers,
            per_worker_memory_mb: 1024,
            memory_reserve_mb: 512,
            max_spawn_batch: 32,
        };
        (
            AdmissionController::new(config, Arc::new(memory.clone())),
            memory,
        )
    }

    #[tokio::test]
    async fn test_capped_by_max_workers() {
        let (controller, _) = controller(2, 16_000);
        assert_eq!(controller.admissible_workers().await, 2);
    }

    #[tokio::test]
    async fn test_capped_by_memory() {
        // (3584 - 512) / 1024 = 3
        let (controller, _) = controller(8, 3584);
        assert_eq!(controller.admissible_workers().await, 3);
    }

    #[tokio::test]
    async fn test_shrinks_with_available_memory() {
        let (controller, memory) = controller(8, 8192);
        assert_eq!(controller.admissible_workers().await, 7);

        memory.set_available_mb(1500);
        assert_eq!(controller.admissible_workers().await, 0);
    }

    #[tokio::test]
    async fn test_reserve_larger_than_available() {
        let (controller, _) = controller(4, 100);
        assert_eq!(controller.admissible_workers().await, 0);

        let snapshot = controller.memory_snapshot().await;
        assert_eq!(snapshot.available_mb(), 100);
        assert_eq!(snapshot.total_mb(), 16_384);
    }
}
