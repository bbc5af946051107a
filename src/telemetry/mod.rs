//! Diagnostics telemetry collector and helpers.
//!
//! The collector multiplexes hop timing, dropped chunks, quality, tempo and
//! fault events into a bounded history plus async broadcast stream. The hop
//! loop never publishes here; a [`TelemetryReporter`] on the consumer side
//! reads its atomic health counters and publishes on its behalf.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use tokio::sync::broadcast;

use crate::analysis::{SignalQualitySnapshot, TempoEstimate};
use crate::calibration::CalibrationResult;
use crate::error::ErrorCode;
use crate::pipeline::HealthSnapshot;

pub mod events;
pub mod reporter;

pub use events::{DiagnosticError, MetricEvent};
pub use reporter::TelemetryReporter;

/// Global telemetry hub shared across the crate.
static HUB: Lazy<TelemetryHub> = Lazy::new(TelemetryHub::default);

/// Access the global telemetry hub.
pub fn hub() -> &'static TelemetryHub {
    &HUB
}

/// Snapshot of collector state for HTTP/CLI reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<MetricEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
}

/// Broadcast-based collector retaining a bounded history of metrics.
pub struct TelemetryCollector {
    tx: broadcast::Sender<MetricEvent>,
    history: Mutex<VecDeque<MetricEvent>>,
    history_capacity: usize,
    total_events: AtomicU64,
    dropped_history: AtomicU64,
}

impl TelemetryCollector {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity: history_capacity.max(1),
            total_events: AtomicU64::new(0),
            dropped_history: AtomicU64::new(0),
        }
    }

    pub fn publish(&self, event: MetricEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        {
            let mut history = lock(&self.history);
            if history.len() == self.history_capacity {
                history.pop_front();
                self.dropped_history.fetch_add(1, Ordering::Relaxed);
            }
            history.push_back(event.clone());
        }

        // No subscribers is the normal case outside debug sessions
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let history = lock(&self.history);
        TelemetrySnapshot {
            recent: history.iter().cloned().collect(),
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_history.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

/// Top-level hub wrapping collector state plus debounced gauges.
pub struct TelemetryHub {
    collector: TelemetryCollector,
    gauges: Mutex<HashMap<&'static str, f32>>,
    latest_health: Mutex<Option<HealthSnapshot>>,
}

impl TelemetryHub {
    pub fn new(channel_capacity: usize, history_capacity: usize) -> Self {
        Self {
            collector: TelemetryCollector::new(channel_capacity, history_capacity),
            gauges: Mutex::new(HashMap::new()),
            latest_health: Mutex::new(None),
        }
    }

    pub fn collector(&self) -> &TelemetryCollector {
        &self.collector
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.collector.snapshot()
    }

    /// Most recent health flush, if any
    pub fn latest_health(&self) -> Option<HealthSnapshot> {
        *lock(&self.latest_health)
    }

    pub fn record_health(&self, health: &HealthSnapshot) {
        *lock(&self.latest_health) = Some(*health);

        self.collector.publish(MetricEvent::HopTiming {
            hops: health.hops,
            last_us: health.last_hop_us,
            avg_us: health.avg_hop_us,
            max_us: health.max_hop_us,
            budget_overruns: health.budget_overruns,
        });

        // Only report drops when the totals move
        let dropped = (health.skipped_hops + health.capture_overruns) as f32;
        if self.gauge_changed("dropped_chunks", dropped, 0.5) {
            self.collector.publish(MetricEvent::DroppedChunk {
                skipped_hops: health.skipped_hops,
                capture_overruns: health.capture_overruns,
                occupancy_percent: health.queue_occupancy_percent.clamp(0.0, 100.0),
            });
        }
    }

    pub fn record_quality(&self, quality: &SignalQualitySnapshot) {
        self.collector.publish(MetricEvent::Quality {
            rms: quality.rms,
            snr_db: quality.snr_db,
            dc_offset: quality.dc_offset,
            noise_floor: quality.noise_floor,
            flags: quality.flags.bits(),
        });
    }

    /// Emit a tempo event when BPM moves by a whole beat or lock toggles
    pub fn record_tempo(&self, tempo: &TempoEstimate) {
        let bpm_moved = self.gauge_changed("tempo_bpm", tempo.bpm, 1.0);
        let lock_moved =
            self.gauge_changed("tempo_locked", if tempo.locked { 1.0 } else { 0.0 }, 0.5);
        if bpm_moved || lock_moved {
            self.collector.publish(MetricEvent::Tempo {
                bpm: tempo.bpm,
                confidence: tempo.confidence,
                locked: tempo.locked,
            });
        }
    }

    pub fn record_error(
        &self,
        kind: DiagnosticError,
        err: &impl ErrorCode,
        context: impl Into<String>,
    ) {
        self.record_error_code(kind, err.code(), context);
    }

    /// Error event from a bare code, as kept by the pipeline counters
    pub fn record_error_code(&self, kind: DiagnosticError, code: i32, context: impl Into<String>) {
        self.collector.publish(MetricEvent::Error {
            kind,
            code,
            context: context.into(),
        });
    }

    pub fn record_calibration(&self, result: &CalibrationResult) {
        self.collector.publish(MetricEvent::Calibration {
            dc_offset: result.dc_offset,
            noise_floor: result.noise_floor,
            fallback: result.fallback,
        });
    }

    fn gauge_changed(&self, name: &'static str, value: f32, threshold: f32) -> bool {
        let mut gauges = lock(&self.gauges);
        let changed = gauges
            .get(name)
            .map(|last| (last - value).abs() >= threshold)
            .unwrap_or(true);
        if changed {
            gauges.insert(name, value);
        }
        changed
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

/// Telemetry must keep working after a panicking reader poisoned a lock
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;

    fn timing(hops: u64) -> MetricEvent {
        MetricEvent::HopTiming {
            hops,
            last_us: 100,
            avg_us: 100.0,
            max_us: 200,
            budget_overruns: 0,
        }
    }

    #[test]
    fn collector_preserves_order_within_history() {
        let collector = TelemetryCollector::new(8, 3);
        collector.publish(timing(1));
        collector.publish(timing(2));
        collector.publish(MetricEvent::Tempo {
            bpm: 120.0,
            confidence: 0.2,
            locked: true,
        });

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 3);
        assert!(matches!(
            snapshot.recent[0],
            MetricEvent::HopTiming { hops: 1, .. }
        ));
        assert!(matches!(snapshot.recent[2], MetricEvent::Tempo { .. }));
    }

    #[test]
    fn collector_drops_history_when_full() {
        let collector = TelemetryCollector::new(8, 2);
        collector.publish(timing(1));
        collector.publish(timing(2));
        collector.publish(timing(3));

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(snapshot.dropped_events, 1);
        assert!(matches!(
            snapshot.recent[0],
            MetricEvent::HopTiming { hops: 2, .. }
        ));
    }

    #[test]
    fn tempo_events_are_debounced() {
        let hub = TelemetryHub::new(8, 16);
        let mut tempo = TempoEstimate {
            bpm: 120.0,
            confidence: 0.1,
            locked: true,
            ..TempoEstimate::default()
        };
        hub.record_tempo(&tempo);
        tempo.bpm = 120.4;
        hub.record_tempo(&tempo);
        tempo.bpm = 122.0;
        hub.record_tempo(&tempo);
        tempo.locked = false;
        hub.record_tempo(&tempo);

        let count = hub
            .snapshot()
            .recent
            .iter()
            .filter(|event| matches!(event, MetricEvent::Tempo { .. }))
            .count();
        assert_eq!(count, 3);
    }

    #[test]
    fn health_reports_drops_only_when_they_change() {
        let hub = TelemetryHub::new(8, 16);
        let mut health = HealthSnapshot::default();
        hub.record_health(&health);
        hub.record_health(&health);
        health.skipped_hops = 2;
        hub.record_health(&health);

        let snapshot = hub.snapshot();
        let drops = snapshot
            .recent
            .iter()
            .filter(|event| matches!(event, MetricEvent::DroppedChunk { .. }))
            .count();
        assert_eq!(drops, 2);
        assert_eq!(hub.latest_health().map(|h| h.skipped_hops), Some(2));
    }

    #[test]
    fn error_events_carry_codes() {
        let hub = TelemetryHub::new(8, 8);
        hub.record_error(
            DiagnosticError::CaptureFault,
            &CaptureError::Timeout { waited_ms: 48 },
            "hop 12",
        );
        let snapshot = hub.snapshot();
        let json = serde_json::to_value(&snapshot.recent[0]).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["payload"]["kind"], "capture_fault");
        assert_eq!(json["payload"]["code"], 1002);
    }
}
