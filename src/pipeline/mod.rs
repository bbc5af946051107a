// Pipeline - the producer-side hop loop
//
// Owns one SampleSource and every analysis stage. Each hop:
//   SampleSource → staging ring → SignalQualityMonitor::condition
//   → FrequencyAnalyzer → SignalQualityMonitor::assess → OnsetDetector
//   → TempoTracker → ContractAggregator → FeatureFrame
//
// `step()` builds a frame, `publish()` hands it to the consumer side. All
// state is allocated in `new()`; a hop does no heap allocation, never touches
// the telemetry hub and never waits on the consumer. Its only I/O is the
// quality monitor's rate-limited log line. Faults only bump the atomic
// counters in `PipelineHealth`; a `TelemetryReporter` on the consumer side
// turns them into hub events and logs.
//
// Chunks missing from the sequence (lost by the capture side) are replaced by
// zero novelty so the tempo tracker keeps a uniform time base.

pub mod health;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::analysis::quality::FULL_SCALE;
use crate::analysis::{
    ContractAggregator, FeatureFrame, FrequencyAnalyzer, HopFeatures, OnsetDetector,
    SignalQualityMonitor, TempoTracker,
};
use crate::audio::{RingBuffer, SampleSource};
use crate::calibration::{CalibrationPhase, CalibrationResult, Calibrator};
use crate::config::{PipelineConfig, CAPTURE_RING_LENGTH, CHUNK_SIZE, NOVELTY_HISTORY_LENGTH};
use crate::debug::PipelineStage;
use crate::error::{
    log_calibration_error, log_capture_error, CalibrationError, CaptureError, ErrorCode,
};
use crate::publish::{self, Publisher, Subscriber};
use crate::telemetry::{self, DiagnosticError, TelemetryReporter};
use crate::trace_pipeline;

pub use health::{HealthSnapshot, PipelineHealth};

/// Single-owner audio feature pipeline
pub struct Pipeline<S: SampleSource> {
    config: PipelineConfig,
    source: S,
    staging: RingBuffer<i16, CAPTURE_RING_LENGTH>,
    conditioned: [f32; CHUNK_SIZE],
    quality: SignalQualityMonitor,
    analyzer: FrequencyAnalyzer,
    onset: OnsetDetector,
    tempo: TempoTracker,
    aggregator: ContractAggregator,
    publisher: Publisher,
    subscriber: Option<Subscriber>,
    health: Arc<PipelineHealth>,
    frame: FeatureFrame,
    hop_index: u64,
    hop_budget: Duration,
    calibration: Option<CalibrationResult>,
    last_sequence: Option<u64>,
}

impl<S: SampleSource> Pipeline<S> {
    /// Build every stage up front
    ///
    /// # Arguments
    /// * `config` - Pipeline tunables; sanitized before use
    /// * `source` - The only input
    pub fn new(config: PipelineConfig, source: S) -> Self {
        let config = config.sanitized();
        log::info!(
            "[Pipeline] Created: source={} bpm={}-{} calibration={}",
            source.describe(),
            config.tempo.bpm_min,
            config.tempo.bpm_max,
            config.calibration.enabled
        );
        let (publisher, subscriber) = publish::channel();
        Self {
            staging: RingBuffer::new(),
            conditioned: [0.0; CHUNK_SIZE],
            quality: SignalQualityMonitor::new(&config.quality, config.telemetry.log_every_hops),
            analyzer: FrequencyAnalyzer::new(&config.analyzer),
            onset: OnsetDetector::new(&config.onset),
            tempo: TempoTracker::new(&config.tempo),
            aggregator: ContractAggregator::new(&config.contract),
            publisher,
            subscriber: Some(subscriber),
            health: Arc::new(PipelineHealth::new()),
            frame: FeatureFrame::default(),
            hop_index: 0,
            hop_budget: config.hop_budget(),
            calibration: None,
            last_sequence: None,
            source,
            config,
        }
    }

    /// Measure DC offset and noise floor from the source, then seed the quality monitor
    ///
    /// Never fails: any calibration fault is logged and replaced by
    /// [`CalibrationResult::fallback`]. Disabled calibration seeds the fallback too.
    pub fn calibrate(&mut self) -> CalibrationResult {
        let result = if self.config.calibration.enabled {
            match self.measure_calibration() {
                Ok(result) => result,
                Err(err) => {
                    log_calibration_error(&err, "Pipeline::calibrate");
                    telemetry::hub().record_error(
                        DiagnosticError::CalibrationFault,
                        &err,
                        "startup calibration",
                    );
                    let fallback = CalibrationResult::fallback(&self.config.calibration);
                    log::warn!(
                        "[Calibration] Falling back to dc=0 noise_floor={}",
                        fallback.noise_floor
                    );
                    fallback
                }
            }
        } else {
            CalibrationResult::fallback(&self.config.calibration)
        };

        self.quality.seed(result.dc_offset, result.noise_floor);
        telemetry::hub().record_calibration(&result);
        self.calibration = Some(result);
        result
    }

    fn measure_calibration(&mut self) -> Result<CalibrationResult, CalibrationError> {
        let mut calibrator = Calibrator::new(&self.config.calibration);
        calibrator.start(Instant::now());

        while calibrator.phase() == CalibrationPhase::Measuring {
            match self.source.next_chunk() {
                Ok(chunk) => {
                    let phase = calibrator.feed(&chunk, Instant::now());
                    trace_pipeline!(
                        PipelineStage::Calibration,
                        "seq={} progress={:.2} phase={:?}",
                        chunk.sequence,
                        calibrator.progress(),
                        phase
                    );
                }
                Err(err) if err.is_recoverable() => {
                    calibrator.check_timeout(Instant::now());
                }
                Err(err) => {
                    log::warn!(
                        "[Calibration] Source ended during calibration: {}",
                        err.message()
                    );
                    return calibrator.abort();
                }
            }
        }

        calibrator.outcome().unwrap_or_else(|| calibrator.abort())
    }

    /// Run one hop
    ///
    /// # Returns
    /// * `Ok(&FeatureFrame)` - This hop's frame (not yet published)
    /// * `Err(CaptureError)` - The source faulted; the hop was skipped and
    ///   counted. Non-recoverable variants mean the source is gone.
    pub fn step(&mut self) -> Result<&FeatureFrame, CaptureError> {
        let hop_index = self.hop_index;
        self.hop_index += 1;
        self.health.record_attempt();

        let chunk = match self.source.next_chunk() {
            Ok(chunk) => chunk,
            Err(err) => {
                self.on_capture_error(hop_index, &err);
                return Err(err);
            }
        };
        let started = Instant::now();
        let missing = self.missing_hops(chunk.sequence);
        trace_pipeline!(
            PipelineStage::Capture,
            "hop={} seq={} missing={}",
            hop_index,
            chunk.sequence,
            missing
        );

        self.staging.push(&chunk.samples);
        self.quality.condition(&chunk, &mut self.conditioned);
        let rms = self.staging_rms();
        trace_pipeline!(
            PipelineStage::Condition,
            "rms={:.5} staging_rms={:.5}",
            self.quality.snapshot().rms,
            rms
        );

        let spectrum = self.analyzer.process(&self.conditioned);
        let mut quality = self.quality.assess(spectrum);
        let mut upstream_faults = u32::from(spectrum.non_finite_bins > 0);
        trace_pipeline!(
            PipelineStage::Spectrum,
            "non_finite={} snr_db={:.1}",
            spectrum.non_finite_bins,
            quality.snr_db
        );

        if missing > 0 {
            self.onset.fill_gap(missing);
            self.health.record_gap(missing as u64);
        }
        let onset = self.onset.process(spectrum);
        trace_pipeline!(
            PipelineStage::Onset,
            "novelty={:.4} snare={} hihat={}",
            onset.novelty,
            onset.flags.snare,
            onset.flags.hihat
        );

        let elapsed_hops = 1 + missing;
        let tempo = match self.tempo.update_elapsed(self.onset.history_mut(), elapsed_hops) {
            Ok(tempo) => tempo,
            Err(fault) => {
                upstream_faults += 1;
                self.quality.mark_numeric_fault();
                quality = *self.quality.snapshot();
                self.health.record_numeric_fault(fault.code());
                trace_pipeline!(PipelineStage::Tempo, "hop={} fault={}", hop_index, fault.code());
                self.tempo.estimate()
            }
        };
        trace_pipeline!(
            PipelineStage::Tempo,
            "bpm={:.1} conf={:.3} phase={:.2} tick={}",
            tempo.bpm,
            tempo.confidence,
            tempo.beat_phase01,
            tempo.beat_tick
        );

        self.frame = self.aggregator.aggregate(&HopFeatures {
            sequence: chunk.sequence,
            hop_index,
            spectrum,
            onset,
            tempo,
            quality,
            rms,
            upstream_faults,
        });
        trace_pipeline!(
            PipelineStage::Aggregate,
            "errors={} silent={} scale={:.2}",
            self.frame.error_count,
            self.frame.is_silent,
            self.frame.silent_scale
        );

        self.health.record_occupancy(self.source.backlog_percent());
        self.health
            .record_hop(started.elapsed(), self.hop_budget, self.frame.error_count);
        Ok(&self.frame)
    }

    /// Hand the latest frame to the consumer side
    ///
    /// O(1) and wait-free. Returns the publish sequence number.
    pub fn publish(&mut self) -> u64 {
        let sequence = self.publisher.publish(&self.frame);
        self.health.record_publish();
        trace_pipeline!(PipelineStage::Publish, "publish_seq={}", sequence);
        sequence
    }

    /// Read the most recently published frame through the pipeline's own reader
    ///
    /// Returns `None` once the reader was handed off with [`take_subscriber`](Self::take_subscriber).
    pub fn read_latest(&mut self) -> Option<(FeatureFrame, u64)> {
        self.subscriber.as_mut().map(Subscriber::read_latest)
    }

    /// Move the consumer handle to another thread
    pub fn take_subscriber(&mut self) -> Option<Subscriber> {
        self.subscriber.take()
    }

    /// Step and publish until `stop` is set or the source goes away
    ///
    /// # Returns
    /// * `Ok(hops)` - Stopped on request
    /// * `Err(CaptureError)` - `SourceExhausted`, `Disconnected` or
    ///   `StreamOpenFailed`; a supervisor decides whether to rebuild
    pub fn run(&mut self, stop: &AtomicBool) -> Result<u64, CaptureError> {
        let span = tracing::info_span!("pipeline", source = %self.source.describe());
        let _guard = span.enter();
        tracing::info!(budget_us = self.hop_budget.as_micros() as u64, "hop loop started");

        while !stop.load(Ordering::Relaxed) {
            match self.step() {
                Ok(_) => {
                    self.publish();
                }
                Err(err) if err.is_recoverable() => continue,
                Err(err) => {
                    tracing::info!(hops = self.hop_index, code = err.code(), "hop loop ended");
                    return Err(err);
                }
            }
        }

        tracing::info!(hops = self.hop_index, "hop loop stopped");
        Ok(self.hop_index)
    }

    /// Count a capture fault; recoverable ones are reported off the hop loop
    fn on_capture_error(&self, hop_index: u64, err: &CaptureError) {
        let dropped = match err {
            CaptureError::Overrun { dropped_chunks } => *dropped_chunks,
            _ => 0,
        };
        self.health.record_skip(dropped, err.code());
        trace_pipeline!(PipelineStage::CaptureSkip, "hop={} code={}", hop_index, err.code());

        if !err.is_recoverable() {
            log_capture_error(err, "Pipeline::step");
        }
    }

    /// Hops of audio lost between the previous chunk and `sequence`
    ///
    /// Sequence numbers are the only evidence of lost audio: the capture
    /// queue drops its newest chunks, so the gap shows up in stream order once
    /// the queued chunks drain. A sequence that goes backwards (source
    /// restart) counts as contiguous.
    fn missing_hops(&mut self, sequence: u64) -> u32 {
        let gap = self
            .last_sequence
            .and_then(|last| last.checked_add(1))
            .and_then(|expected| sequence.checked_sub(expected))
            .unwrap_or(0);
        self.last_sequence = Some(sequence);
        gap.min(NOVELTY_HISTORY_LENGTH as u64) as u32
    }

    /// RMS of the staging ring, DC removed, full scale = 1.0
    fn staging_rms(&self) -> f32 {
        let len = self.staging.len();
        if len == 0 {
            return 0.0;
        }
        let dc = self.quality.dc_offset();
        let (head, tail) = self.staging.latest(len);
        let sum: f32 = head
            .iter()
            .chain(tail)
            .map(|&s| {
                let x = s as f32 / FULL_SCALE - dc;
                x * x
            })
            .sum();
        (sum / len as f32).sqrt()
    }

    /// Reporter bound to this pipeline's counters and the global hub
    pub fn reporter(&self) -> TelemetryReporter<'static> {
        TelemetryReporter::new(self.health_handle())
    }

    /// Frame built by the most recent successful step
    pub fn last_frame(&self) -> &FeatureFrame {
        &self.frame
    }

    pub fn health(&self) -> HealthSnapshot {
        self.health.snapshot()
    }

    /// Shared counters for observers on other threads
    pub fn health_handle(&self) -> Arc<PipelineHealth> {
        Arc::clone(&self.health)
    }

    pub fn calibration(&self) -> Option<CalibrationResult> {
        self.calibration
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn tempo(&self) -> &TempoTracker {
        &self.tempo
    }

    pub fn analyzer(&self) -> &FrequencyAnalyzer {
        &self.analyzer
    }

    /// Hops attempted so far, including skipped ones
    pub fn hop_index(&self) -> u64 {
        self.hop_index
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}
