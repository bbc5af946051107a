use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lightwave_audio::audio::{SyntheticPattern, SyntheticSource, WavSource};
use lightwave_audio::calibration::CalibrationResult;
use lightwave_audio::debug::pipeline_tracer;
use lightwave_audio::{
    ErrorCode, FeatureFrame, HealthSnapshot, Pipeline, PipelineConfig, SampleSource,
    TempoEstimate,
};
use serde::Serialize;

/// Exit code when `bench` exceeds the hop budget
const EXIT_OVER_BUDGET: u8 = 3;
/// Exit code when `synth --expect-bpm` misses
const EXIT_TEMPO_MISMATCH: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "lightwave_cli",
    about = "Run the LightWave audio feature pipeline against files, generators or a microphone"
)]
struct Cli {
    /// JSON pipeline configuration (defaults used when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit one frame line every N hops (0 = summary only)
    #[arg(long, global = true, default_value_t = 25)]
    every: u64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a mono 16 kHz WAV file
    Replay {
        #[arg(long)]
        wav: PathBuf,
        /// Spend the first seconds of the file on noise-floor calibration
        #[arg(long)]
        calibrate: bool,
    },
    /// Run a synthetic signal
    Synth {
        #[arg(long, value_enum, default_value_t = PatternArg::Clicks)]
        pattern: PatternArg,
        #[arg(long, default_value_t = 120.0)]
        bpm: f32,
        #[arg(long, default_value_t = 440.0)]
        frequency: f32,
        #[arg(long, default_value_t = 0.8)]
        amplitude: f32,
        #[arg(long, default_value_t = 10.0)]
        seconds: f32,
        /// Fail with exit code 2 unless the final tempo is within tolerance
        #[arg(long)]
        expect_bpm: Option<f32>,
        #[arg(long, default_value_t = 2.0)]
        tolerance: f32,
    },
    /// Capture from the default input device
    Live {
        #[arg(long, default_value_t = 30.0)]
        seconds: f32,
    },
    /// Measure hop computation time on white noise; fails if any hop runs over budget
    Bench {
        #[arg(long, default_value_t = 5_000)]
        hops: u64,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PatternArg {
    Clicks,
    Sine,
    Noise,
    Silence,
}

/// One JSON line of CLI output
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputLine<'a> {
    Frame {
        hop_index: u64,
        sequence: u64,
        novelty: f32,
        bands_fast: &'a [f32],
        tempo: &'a TempoEstimate,
        snare: bool,
        hihat: bool,
        quality_flags: Vec<&'static str>,
        is_silent: bool,
    },
    Summary {
        source: String,
        stop_reason: String,
        tempo: &'a TempoEstimate,
        error_count: u32,
        health: &'a HealthSnapshot,
        #[serde(skip_serializing_if = "Option::is_none")]
        calibration: Option<&'a CalibrationResult>,
    },
}

fn main() -> ExitCode {
    // stdout carries JSON lines only
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    pipeline_tracer::init();

    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli
        .config
        .as_ref()
        .map(PipelineConfig::load_from_file)
        .unwrap_or_default();

    match cli.command {
        Commands::Replay { wav, calibrate } => {
            let source = WavSource::open(&wav)
                .with_context(|| format!("loading replay file {}", wav.display()))?;
            let mut config = config;
            config.calibration.enabled = calibrate;
            run_offline(config, source, calibrate, cli.every)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Synth {
            pattern,
            bpm,
            frequency,
            amplitude,
            seconds,
            expect_bpm,
            tolerance,
        } => {
            let pattern = match pattern {
                PatternArg::Clicks => SyntheticPattern::ClickTrain { bpm },
                PatternArg::Sine => SyntheticPattern::Sine {
                    frequency_hz: frequency,
                },
                PatternArg::Noise => SyntheticPattern::WhiteNoise,
                PatternArg::Silence => SyntheticPattern::Silence,
            };
            let chunks = lightwave_audio::audio::synthetic::chunks_for_seconds(seconds);
            let source = SyntheticSource::new(pattern, amplitude, Some(chunks));
            let tempo = run_offline(config, source, false, cli.every)?;

            match expect_bpm {
                Some(expected) if (tempo.bpm - expected).abs() > tolerance => {
                    eprintln!(
                        "Tempo mismatch: expected {expected:.1} ± {tolerance:.1}, got {:.1}",
                        tempo.bpm
                    );
                    Ok(ExitCode::from(EXIT_TEMPO_MISMATCH))
                }
                _ => Ok(ExitCode::SUCCESS),
            }
        }
        Commands::Live { seconds } => run_live(config, seconds, cli.every),
        Commands::Bench { hops } => run_bench(config, hops),
    }
}

/// Step a finite source to the end, printing frames; returns the final tempo
fn run_offline<S: SampleSource>(
    config: PipelineConfig,
    source: S,
    calibrate: bool,
    every: u64,
) -> Result<TempoEstimate> {
    let label = source.describe();
    let report_every = config.telemetry.report_every_hops.max(1);
    let mut pipeline = Pipeline::new(config, source);
    if calibrate {
        pipeline.calibrate();
    }
    let mut reporter = pipeline.reporter();

    let stop_reason = loop {
        match pipeline.step() {
            Ok(frame) => {
                if every > 0 && frame.hop_index % every == 0 {
                    emit_frame(frame)?;
                }
                // Offline the driver is the only consumer, so it reports between hops
                if (frame.hop_index + 1) % report_every == 0 {
                    reporter.report(frame);
                }
                pipeline.publish();
            }
            Err(err) if err.is_recoverable() => continue,
            Err(err) => break err.message(),
        }
    };

    let frame = *pipeline.last_frame();
    reporter.report(&frame);
    emit_summary(
        label,
        stop_reason,
        &frame,
        &pipeline.health(),
        pipeline.calibration().as_ref(),
    )?;
    Ok(frame.tempo)
}

#[cfg(not(target_os = "android"))]
fn run_live(config: PipelineConfig, seconds: f32, every: u64) -> Result<ExitCode> {
    use lightwave_audio::audio::CpalCapture;
    use std::thread;
    use std::time::{Duration, Instant};

    let (capture, source) = CpalCapture::start(&config.capture).context("starting microphone capture")?;
    let label = format!("{} @ {} Hz", capture.device_name(), capture.device_rate());

    let report_every = config.telemetry.report_every_hops.max(1);
    let mut pipeline = Pipeline::new(config, source);
    pipeline.calibrate();
    let calibration = pipeline.calibration();
    let mut reporter = pipeline.reporter();
    let mut subscriber = pipeline
        .take_subscriber()
        .context("pipeline subscriber already taken")?;
    let http_frames = pipeline.take_subscriber();
    lightwave_audio::http::spawn_if_enabled(http_frames);

    let stop = Arc::new(AtomicBool::new(false));
    install_ctrl_c(Arc::clone(&stop));

    let producer_stop = Arc::clone(&stop);
    let producer = thread::Builder::new()
        .name("lightwave-hop-loop".into())
        .spawn(move || {
            let result = pipeline.run(&producer_stop);
            (result, pipeline.health())
        })
        .context("spawning hop loop thread")?;

    // Consumer side: poll the publisher the way a render loop would
    let deadline = Instant::now() + Duration::from_secs_f32(seconds.max(0.0));
    let poll = Duration::from_millis(40);
    let mut last_frame = FeatureFrame::default();
    let mut last_emitted = 0u64;
    let mut last_reported = 0u64;
    while Instant::now() < deadline && !stop.load(Ordering::Relaxed) && !producer.is_finished() {
        let (frame, _sequence) = subscriber.read_latest();
        if every > 0 && frame.hop_index >= last_emitted + every {
            emit_frame(&frame)?;
            last_emitted = frame.hop_index;
        }
        if frame.hop_index >= last_reported + report_every {
            reporter.report(&frame);
            last_reported = frame.hop_index;
        }
        last_frame = frame;
        thread::sleep(poll);
    }
    stop.store(true, Ordering::Relaxed);

    let (result, health) = producer
        .join()
        .map_err(|_| anyhow::anyhow!("hop loop thread panicked"))?;
    reporter.report(&last_frame);
    if let Err(err) = capture.stop() {
        log::warn!("[Live] Failed to pause input stream: {}", err);
    }
    let stop_reason = match result {
        Ok(_) => "stopped".to_string(),
        Err(err) => err.message(),
    };
    emit_summary(label, stop_reason, &last_frame, &health, calibration.as_ref())?;
    Ok(ExitCode::SUCCESS)
}

#[cfg(target_os = "android")]
fn run_live(_config: PipelineConfig, _seconds: f32, _every: u64) -> Result<ExitCode> {
    anyhow::bail!("live capture is not available on this target")
}

/// Set `stop` on Ctrl-C using a small dedicated runtime
#[cfg(not(target_os = "android"))]
fn install_ctrl_c(stop: Arc<AtomicBool>) {
    let spawned = std::thread::Builder::new()
        .name("lightwave-signal".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    log::warn!("[Live] Ctrl-C handler unavailable: {}", err);
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::info!("[Live] Ctrl-C received, stopping");
                    stop.store(true, Ordering::Relaxed);
                }
            });
        });
    if let Err(err) = spawned {
        log::warn!("[Live] Failed to spawn signal thread: {}", err);
    }
}

fn run_bench(config: PipelineConfig, hops: u64) -> Result<ExitCode> {
    let budget = config.hop_budget();
    let source = SyntheticSource::new(SyntheticPattern::WhiteNoise, 0.5, Some(hops));
    let label = source.describe();
    let mut pipeline = Pipeline::new(config, source);

    let stop = AtomicBool::new(false);
    let stop_reason = match pipeline.run(&stop) {
        Ok(_) => "stopped".to_string(),
        Err(err) => err.message(),
    };
    let frame = *pipeline.last_frame();
    let health = pipeline.reporter().report(&frame);
    emit_summary(label, stop_reason, &frame, &health, None)?;

    // Every hop must fit, so the worst one decides
    if health.max_hop_us > budget.as_micros() as u64 {
        eprintln!(
            "Slowest hop {} us exceeds budget {} us (average {:.1} us)",
            health.max_hop_us,
            budget.as_micros(),
            health.avg_hop_us
        );
        return Ok(ExitCode::from(EXIT_OVER_BUDGET));
    }
    Ok(ExitCode::SUCCESS)
}

fn emit_frame(frame: &FeatureFrame) -> Result<()> {
    let line = OutputLine::Frame {
        hop_index: frame.hop_index,
        sequence: frame.sequence,
        novelty: frame.novelty,
        bands_fast: &frame.bands_fast,
        tempo: &frame.tempo,
        snare: frame.onsets.snare,
        hihat: frame.onsets.hihat,
        quality_flags: frame.quality.flags.names().collect(),
        is_silent: frame.is_silent,
    };
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}

fn emit_summary(
    source: String,
    stop_reason: String,
    frame: &FeatureFrame,
    health: &HealthSnapshot,
    calibration: Option<&CalibrationResult>,
) -> Result<()> {
    let line = OutputLine::Summary {
        source,
        stop_reason,
        tempo: &frame.tempo,
        error_count: frame.error_count,
        health,
        calibration,
    };
    println!("{}", serde_json::to_string(&line)?);
    Ok(())
}
