//! Off-producer telemetry reporting.
//!
//! The hop loop only bumps the atomics in [`PipelineHealth`]. A reporter runs
//! wherever frames are consumed (a render loop, the CLI, a ticker thread),
//! reads those counters together with the newest published frame, and turns
//! them into hub events and rate-limited logs. Every lock and allocation of
//! the telemetry path happens here.

use std::sync::Arc;

use super::{hub, DiagnosticError, TelemetryHub};
use crate::analysis::FeatureFrame;
use crate::pipeline::{HealthSnapshot, PipelineHealth};

/// Turns pipeline counters into telemetry events
pub struct TelemetryReporter<'h> {
    hub: &'h TelemetryHub,
    health: Arc<PipelineHealth>,
    last: HealthSnapshot,
}

impl TelemetryReporter<'static> {
    /// Report into the global hub
    pub fn new(health: Arc<PipelineHealth>) -> Self {
        Self::with_hub(health, hub())
    }
}

impl<'h> TelemetryReporter<'h> {
    pub fn with_hub(health: Arc<PipelineHealth>, hub: &'h TelemetryHub) -> Self {
        Self {
            hub,
            health,
            last: HealthSnapshot::default(),
        }
    }

    /// Publish health, quality and tempo, plus fault events for counters
    /// that moved since the previous report
    ///
    /// Returns the health snapshot the report was built from.
    pub fn report(&mut self, frame: &FeatureFrame) -> HealthSnapshot {
        let health = self.health.snapshot();
        self.hub.record_health(&health);
        self.hub.record_quality(&frame.quality);
        self.hub.record_tempo(&frame.tempo);

        let skipped = health.skipped_hops.saturating_sub(self.last.skipped_hops);
        if skipped > 0 {
            log::warn!(
                "[Telemetry] {} hops skipped on capture faults (last code {}, {} chunks dropped so far)",
                skipped,
                health.last_capture_code,
                health.capture_overruns
            );
            self.hub.record_error_code(
                DiagnosticError::CaptureFault,
                health.last_capture_code,
                format!(
                    "{skipped} hops skipped by hop {}, {} chunks dropped so far",
                    health.hops + health.skipped_hops,
                    health.capture_overruns
                ),
            );
        }

        let numeric = health.numeric_faults.saturating_sub(self.last.numeric_faults);
        if numeric > 0 {
            log::warn!(
                "[Telemetry] {} hops hit numeric faults (last code {})",
                numeric,
                health.last_numeric_code
            );
            self.hub.record_error_code(
                DiagnosticError::NumericFault,
                health.last_numeric_code,
                format!("{numeric} faulted hops by hop {}", health.hops),
            );
        }

        let gaps = health.gap_hops.saturating_sub(self.last.gap_hops);
        if gaps > 0 {
            log::debug!("[Telemetry] {} lost hops filled since last report", gaps);
        }

        self.last = health;
        health
    }

    /// Counters as of the previous report
    pub fn last_health(&self) -> &HealthSnapshot {
        &self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MetricEvent;
    use std::time::Duration;

    fn errors(hub: &TelemetryHub) -> Vec<(DiagnosticError, i32)> {
        hub.snapshot()
            .recent
            .into_iter()
            .filter_map(|event| match event {
                MetricEvent::Error { kind, code, .. } => Some((kind, code)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn reports_health_quality_and_tempo() {
        let hub = TelemetryHub::new(8, 16);
        let health = Arc::new(PipelineHealth::new());
        health.record_hop(Duration::from_micros(400), Duration::from_micros(7_520), 0);
        let mut reporter = TelemetryReporter::with_hub(Arc::clone(&health), &hub);

        let snapshot = reporter.report(&FeatureFrame::default());
        assert_eq!(snapshot.hops, 1);
        assert_eq!(hub.latest_health().map(|h| h.hops), Some(1));
        let recent = hub.snapshot().recent;
        assert!(recent
            .iter()
            .any(|event| matches!(event, MetricEvent::HopTiming { hops: 1, .. })));
        assert!(recent
            .iter()
            .any(|event| matches!(event, MetricEvent::Quality { .. })));
        assert!(errors(&hub).is_empty());
    }

    #[test]
    fn fault_counters_become_one_event_per_report() {
        let hub = TelemetryHub::new(8, 32);
        let health = Arc::new(PipelineHealth::new());
        let mut reporter = TelemetryReporter::with_hub(Arc::clone(&health), &hub);

        for _ in 0..5 {
            health.record_skip(1, 1001);
        }
        health.record_numeric_fault(2002);
        reporter.report(&FeatureFrame::default());
        assert_eq!(
            errors(&hub),
            vec![
                (DiagnosticError::CaptureFault, 1001),
                (DiagnosticError::NumericFault, 2002)
            ]
        );

        // Nothing new, nothing reported
        reporter.report(&FeatureFrame::default());
        assert_eq!(errors(&hub).len(), 2);

        health.record_skip(0, 1002);
        reporter.report(&FeatureFrame::default());
        assert_eq!(errors(&hub).last(), Some(&(DiagnosticError::CaptureFault, 1002)));
        assert_eq!(reporter.last_health().skipped_hops, 6);
    }
}
