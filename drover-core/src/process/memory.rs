//! Host memory figures used by admission control

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use sysinfo::System;

/// Point-in-time host memory figures, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Total physical memory
    pub total_bytes: u64,
    /// Memory available for new allocations without swapping
    pub available_bytes: u64,
}

impl MemorySnapshot {
    /// Total memory in MiB
    pub fn total_mb(&self) -> u64 {
        self.total_bytes / 1024 / 1024
    }

    /// Available memory in MiB
    pub fn available_mb(&self) -> u64 {
        self.available_bytes / 1024 / 1024
    }
}

/// Trait for reading host memory
#[async_trait]
pub trait HostMemory: Send + Sync {
    /// Current total and available memory
    async fn snapshot(&self) -> MemorySnapshot;
}

/// Host memory read through `sysinfo`
pub struct SysinfoHostMemory;

#[async_trait]
impl HostMemory for SysinfoHostMemory {
    async fn snapshot(&self) -> MemorySnapshot {
        let read = || {
            let mut system = System::new();
            system.refresh_memory();
            MemorySnapshot {
                total_bytes: system.total_memory(),
                available_bytes: system.available_memory(),
            }
        };

        match tokio::task::spawn_blocking(read).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Memory probe task failed, reading inline: {}", e);
                read()
            }
        }
    }
}

/// Fixed memory figures (tests, or hosts where probing is undesirable).
///
/// Cloned handles share the same figures, so a test can change the
/// available memory while a supervisor holds the probe.
#[derive(Debug, Clone)]
pub struct FixedHostMemory {
    total_bytes: Arc<AtomicU64>,
    available_bytes: Arc<AtomicU64>,
}

impl FixedHostMemory {
    /// Create a probe reporting the given figures in MiB
    pub fn from_mb(total_mb: u64, available_mb: u64) -> Self {
        Self {
            total_bytes: Arc::new(AtomicU64::new(total_mb * 1024 * 1024)),
            available_bytes: Arc::new(AtomicU64::new(available_mb * 1024 * 1024)),
        }
    }

    /// Change the reported available memory
    pub fn set_available_mb(&self, available_mb: u64) {
        self.available_bytes
            .store(available_mb * 1024 * 1024, Ordering::SeqCst);
    }
}

#[async_trait]
impl HostMemory for FixedHostMemory {
    async fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            total_bytes: self.total_bytes.load(Ordering::SeqCst),
            available_bytes: self.available_bytes.load(Ordering::SeqCst),
        }
    }
}
