// PipelineHealth - lock-free counters updated by the hop loop
//
// Plain relaxed atomics: the producer is the only writer, readers only need
// eventually consistent numbers for telemetry and the debug endpoint.

use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Weight of the newest hop in the timing average
const TIMING_EMA_ALPHA: f32 = 0.05;

/// Counters shared between the producer and observers
#[derive(Debug, Default)]
pub struct PipelineHealth {
    hops: AtomicU64,
    skipped_hops: AtomicU64,
    capture_attempts: AtomicU64,
    capture_overruns: AtomicU64,
    gap_hops: AtomicU64,
    numeric_faults: AtomicU64,
    last_capture_code: AtomicI32,
    last_numeric_code: AtomicI32,
    published: AtomicU64,
    last_hop_us: AtomicU64,
    max_hop_us: AtomicU64,
    /// f32 bits
    avg_hop_us: AtomicU32,
    budget_overruns: AtomicU64,
    /// f32 bits
    queue_occupancy: AtomicU32,
    error_count: AtomicU32,
}

/// Point-in-time copy of [`PipelineHealth`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HealthSnapshot {
    /// Hops that produced a frame
    pub hops: u64,
    /// Hops skipped because the source reported a fault
    pub skipped_hops: u64,
    pub capture_attempts: u64,
    /// Chunks the capture side dropped on a full queue
    pub capture_overruns: u64,
    /// Hops missing from the chunk sequence, filled with zero novelty
    pub gap_hops: u64,
    /// Hops on which the tempo tracker reported a numeric fault
    pub numeric_faults: u64,
    /// Code of the most recent recoverable capture fault, 0 if none
    pub last_capture_code: i32,
    /// Code of the most recent numeric fault, 0 if none
    pub last_numeric_code: i32,
    pub published: u64,
    pub last_hop_us: u64,
    pub max_hop_us: u64,
    pub avg_hop_us: f32,
    /// Hops whose computation exceeded the hop budget
    pub budget_overruns: u64,
    pub queue_occupancy_percent: f32,
    /// Numeric faults substituted so far
    pub error_count: u32,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.capture_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self, dropped_chunks: u64, code: i32) {
        self.skipped_hops.fetch_add(1, Ordering::Relaxed);
        self.last_capture_code.store(code, Ordering::Relaxed);
        if dropped_chunks > 0 {
            self.capture_overruns
                .fetch_add(dropped_chunks, Ordering::Relaxed);
        }
    }

    pub fn record_gap(&self, hops: u64) {
        self.gap_hops.fetch_add(hops, Ordering::Relaxed);
    }

    pub fn record_numeric_fault(&self, code: i32) {
        self.numeric_faults.fetch_add(1, Ordering::Relaxed);
        self.last_numeric_code.store(code, Ordering::Relaxed);
    }

    /// Record one completed hop; returns true when it ran over budget
    pub fn record_hop(&self, elapsed: Duration, budget: Duration, error_count: u32) -> bool {
        let micros = elapsed.as_micros() as u64;
        let hops = self.hops.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_hop_us.store(micros, Ordering::Relaxed);
        self.max_hop_us.fetch_max(micros, Ordering::Relaxed);

        let previous = f32::from_bits(self.avg_hop_us.load(Ordering::Relaxed));
        let average = if hops == 1 {
            micros as f32
        } else {
            previous + (micros as f32 - previous) * TIMING_EMA_ALPHA
        };
        self.avg_hop_us.store(average.to_bits(), Ordering::Relaxed);
        self.error_count.store(error_count, Ordering::Relaxed);

        let over = elapsed > budget;
        if over {
            self.budget_overruns.fetch_add(1, Ordering::Relaxed);
        }
        over
    }

    pub fn record_publish(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_occupancy(&self, percent: f32) {
        self.queue_occupancy
            .store(percent.clamp(0.0, 100.0).to_bits(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            hops: self.hops.load(Ordering::Relaxed),
            skipped_hops: self.skipped_hops.load(Ordering::Relaxed),
            capture_attempts: self.capture_attempts.load(Ordering::Relaxed),
            capture_overruns: self.capture_overruns.load(Ordering::Relaxed),
            gap_hops: self.gap_hops.load(Ordering::Relaxed),
            numeric_faults: self.numeric_faults.load(Ordering::Relaxed),
            last_capture_code: self.last_capture_code.load(Ordering::Relaxed),
            last_numeric_code: self.last_numeric_code.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            last_hop_us: self.last_hop_us.load(Ordering::Relaxed),
            max_hop_us: self.max_hop_us.load(Ordering::Relaxed),
            avg_hop_us: f32::from_bits(self.avg_hop_us.load(Ordering::Relaxed)),
            budget_overruns: self.budget_overruns.load(Ordering::Relaxed),
            queue_occupancy_percent: f32::from_bits(self.queue_occupancy.load(Ordering::Relaxed)),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }
}
