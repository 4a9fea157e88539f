//! Byte counters reported by transports

use std::sync::atomic::{AtomicU64, Ordering};

/// Counts bytes moved through a transport in each direction.
///
/// The two counters are independent: a snapshot taken while operations are in
/// flight may reflect one direction's update and not yet the other's.
#[derive(Debug, Default)]
pub struct NetworkStatistics {
    bytes_received: AtomicU64,
    bytes_transmitted: AtomicU64,
}

/// Point-in-time copy of [`NetworkStatistics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub bytes_received: u64,
    pub bytes_transmitted: u64,
}

impl NetworkStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn on_transmitted(&self, bytes: usize) {
        self.bytes_transmitted.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn bytes_transmitted(&self) -> u64 {
        self.bytes_transmitted.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            bytes_received: self.bytes_received(),
            bytes_transmitted: self.bytes_transmitted(),
        }
    }
}
