use std::collections::BTreeMap;
use std::fmt::Write;

use crate::pipeline::HealthSnapshot;
use crate::telemetry::{DiagnosticError, MetricEvent, TelemetrySnapshot};

pub fn render_prometheus_metrics(
    snapshot: &TelemetrySnapshot,
    health: Option<&HealthSnapshot>,
    uptime_ms: u64,
) -> String {
    PrometheusWriter::new(snapshot, health, uptime_ms).render()
}

struct PrometheusWriter<'a> {
    snapshot: &'a TelemetrySnapshot,
    health: Option<&'a HealthSnapshot>,
    uptime_ms: u64,
    output: String,
    error_counts: BTreeMap<&'static str, u64>,
    latest_tempo: Option<(f32, f32, bool)>,
    latest_quality: Option<(f32, f32, u8)>,
    calibration_fallback: Option<bool>,
}

impl<'a> PrometheusWriter<'a> {
    fn new(
        snapshot: &'a TelemetrySnapshot,
        health: Option<&'a HealthSnapshot>,
        uptime_ms: u64,
    ) -> Self {
        let mut error_counts = BTreeMap::new();
        let mut latest_tempo = None;
        let mut latest_quality = None;
        let mut calibration_fallback = None;

        for event in &snapshot.recent {
            match event {
                MetricEvent::Error { kind, .. } => {
                    *error_counts.entry(error_label(*kind)).or_insert(0) += 1;
                }
                MetricEvent::Tempo {
                    bpm,
                    confidence,
                    locked,
                } => latest_tempo = Some((*bpm, *confidence, *locked)),
                MetricEvent::Quality {
                    rms, snr_db, flags, ..
                } => latest_quality = Some((*rms, *snr_db, *flags)),
                MetricEvent::Calibration { fallback, .. } => {
                    calibration_fallback = Some(*fallback)
                }
                MetricEvent::HopTiming { .. } | MetricEvent::DroppedChunk { .. } => {}
            }
        }

        Self {
            snapshot,
            health,
            uptime_ms,
            output: String::new(),
            error_counts,
            latest_tempo,
            latest_quality,
            calibration_fallback,
        }
    }

    fn render(mut self) -> String {
        self.metric(
            "lightwave_events_total",
            "counter",
            "Total telemetry events emitted",
            self.snapshot.total_events,
        );
        self.metric(
            "lightwave_events_dropped_total",
            "counter",
            "Telemetry events evicted from history",
            self.snapshot.dropped_events,
        );
        self.metric(
            "lightwave_uptime_ms",
            "counter",
            "HTTP server uptime",
            self.uptime_ms,
        );
        self.write_health();
        self.write_tempo();
        self.write_quality();
        self.write_errors();
        if let Some(fallback) = self.calibration_fallback {
            self.metric(
                "lightwave_calibration_fallback",
                "gauge",
                "Startup calibration used defaults (1) or a measurement (0)",
                bool_to_int(fallback),
            );
        }
        self.output
    }

    fn write_health(&mut self) {
        let Some(health) = self.health.copied() else {
            return;
        };
        self.metric("lightwave_hops_total", "counter", "Hops that produced a frame", health.hops);
        self.metric(
            "lightwave_skipped_hops_total",
            "counter",
            "Hops skipped on capture faults",
            health.skipped_hops,
        );
        self.metric(
            "lightwave_capture_overruns_total",
            "counter",
            "Chunks dropped on a full capture queue",
            health.capture_overruns,
        );
        self.metric(
            "lightwave_gap_hops_total",
            "counter",
            "Hops missing from the chunk sequence",
            health.gap_hops,
        );
        self.metric(
            "lightwave_published_total",
            "counter",
            "Frames published",
            health.published,
        );
        self.metric(
            "lightwave_hop_avg_us",
            "gauge",
            "Average hop computation time",
            format!("{:.1}", health.avg_hop_us),
        );
        self.metric(
            "lightwave_hop_max_us",
            "gauge",
            "Slowest hop computation time",
            health.max_hop_us,
        );
        self.metric(
            "lightwave_hop_budget_overruns_total",
            "counter",
            "Hops that exceeded the computation budget",
            health.budget_overruns,
        );
        self.metric(
            "lightwave_numeric_faults_total",
            "counter",
            "Non-finite values replaced by last-good values",
            health.error_count,
        );
    }

    fn write_tempo(&mut self) {
        if let Some((bpm, confidence, locked)) = self.latest_tempo {
            self.metric("lightwave_tempo_bpm", "gauge", "Tracked tempo", format!("{bpm:.2}"));
            self.metric(
                "lightwave_tempo_confidence",
                "gauge",
                "Winning oscillator share of bank power",
                format!("{confidence:.4}"),
            );
            self.metric(
                "lightwave_tempo_locked",
                "gauge",
                "Tempo lock flag",
                bool_to_int(locked),
            );
        }
    }

    fn write_quality(&mut self) {
        if let Some((rms, snr_db, flags)) = self.latest_quality {
            self.metric("lightwave_input_rms", "gauge", "Input RMS (full scale 1.0)", format!("{rms:.5}"));
            self.metric("lightwave_snr_db", "gauge", "Estimated SNR", format!("{snr_db:.2}"));
            self.metric("lightwave_quality_flags", "gauge", "Quality flag bits", flags);
        }
    }

    fn write_errors(&mut self) {
        if self.error_counts.is_empty() {
            return;
        }
        let _ = writeln!(
            self.output,
            "# HELP lightwave_recent_errors Errors in the telemetry history window"
        );
        let _ = writeln!(self.output, "# TYPE lightwave_recent_errors gauge");
        for (kind, count) in &self.error_counts {
            let _ = writeln!(
                self.output,
                "lightwave_recent_errors{{kind=\"{}\"}} {}",
                kind, count
            );
        }
    }

    fn metric(
        &mut self,
        name: &str,
        kind: &str,
        help: &str,
        value: impl std::fmt::Display,
    ) {
        let _ = writeln!(self.output, "# HELP {name} {help}");
        let _ = writeln!(self.output, "# TYPE {name} {kind}");
        let _ = writeln!(self.output, "{name} {value}");
    }
}

fn bool_to_int(value: bool) -> u8 {
    u8::from(value)
}

fn error_label(kind: DiagnosticError) -> &'static str {
    match kind {
        DiagnosticError::CaptureFault => "capture_fault",
        DiagnosticError::NumericFault => "numeric_fault",
        DiagnosticError::CalibrationFault => "calibration_fault",
        DiagnosticError::ConfigFallback => "config_fallback",
    }
}
