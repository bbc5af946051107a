use lightwave_audio::analysis::{NoveltyHistory, TempoTracker};
use lightwave_audio::audio::{SampleChunk, SyntheticSource};
use lightwave_audio::config::{hop_rate_hz, PipelineConfig, TempoConfig};
use lightwave_audio::{CaptureError, Pipeline, SampleSource};

const DECAY: f32 = 0.999;

/// Decaying pulse on every beat, 50 ms time constant
fn pulse_novelty(hop: usize, bpm: f32) -> f32 {
    let t = hop as f32 / hop_rate_hz();
    let period = 60.0 / bpm;
    (-(t % period) / 0.05).exp()
}

fn track(bpm: f32, hops: usize) -> TempoTracker {
    let mut tracker = TempoTracker::new(&TempoConfig::default());
    let mut history = NoveltyHistory::new();
    for hop in 0..hops {
        history.push(pulse_novelty(hop, bpm), DECAY);
        tracker
            .update(&mut history)
            .expect("finite novelty never faults");
    }
    tracker
}

#[test]
fn tracks_common_dance_tempos() {
    for bpm in [120.0f32, 150.0] {
        let estimate = track(bpm, 750).estimate();
        assert!(
            (estimate.bpm - bpm).abs() <= 1.5,
            "target {bpm} got {}",
            estimate.bpm
        );
        assert!(estimate.confidence > 0.0);
        assert!(estimate.silence_level < 1.0);
    }
}

#[test]
fn locks_within_three_seconds_at_120() {
    let estimate = track(120.0, 375).estimate();
    assert!((estimate.bpm - 120.0).abs() <= 1.0, "bpm {}", estimate.bpm);
    assert!(estimate.locked, "confidence {}", estimate.confidence);
}

#[test]
fn winner_bpm_is_quantised_to_the_bank() {
    let tracker = track(128.0, 750);
    let estimate = tracker.estimate();
    assert_eq!(estimate.bpm, estimate.bpm.round());
    assert_eq!(tracker.winner().target_bpm, estimate.bpm);
}

/// Loses every fifth chunk after capture and reports it as an overrun
struct LossySource {
    inner: SyntheticSource,
    calls: u64,
}

impl SampleSource for LossySource {
    fn next_chunk(&mut self) -> Result<SampleChunk, CaptureError> {
        self.calls += 1;
        let chunk = self.inner.next_chunk()?;
        if self.calls % 5 == 0 {
            return Err(CaptureError::Overrun { dropped_chunks: 1 });
        }
        Ok(chunk)
    }

    fn describe(&self) -> String {
        "lossy".to_string()
    }
}

fn run_clicks<S: SampleSource>(source: S) -> (f32, u64) {
    let mut config = PipelineConfig::default();
    config.calibration.enabled = false;
    let mut pipeline = Pipeline::new(config, source);
    loop {
        match pipeline.step() {
            Ok(_) => {
                pipeline.publish();
            }
            Err(CaptureError::SourceExhausted) => break,
            Err(err) => assert!(err.is_recoverable(), "unexpected {err}"),
        }
    }
    (pipeline.last_frame().tempo.bpm, pipeline.health().gap_hops)
}

#[test]
fn dropped_chunks_do_not_bend_the_tempo() {
    let (clean_bpm, clean_gaps) = run_clicks(SyntheticSource::click_train(120.0, 0.8, 20.0));
    assert_eq!(clean_gaps, 0);
    assert!((clean_bpm - 120.0).abs() <= 1.5, "clean run got {clean_bpm}");

    let lossy = LossySource {
        inner: SyntheticSource::click_train(120.0, 0.8, 20.0),
        calls: 0,
    };
    let (bpm, gaps) = run_clicks(lossy);
    // The final lost chunk has no successor to reveal the gap
    assert_eq!(gaps, 499);
    assert!((bpm - 120.0).abs() <= 1.5, "1-in-5 loss got {bpm}");
}
