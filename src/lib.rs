// LightWave Audio - real-time audio feature pipeline
// 16 kHz capture → 64-bin Goertzel spectrum → onsets → tempo → FeatureFrame,
// published lock-free to a consumer on another core.

// Module declarations
pub mod analysis;
pub mod audio;
pub mod calibration;
pub mod config;
pub mod debug;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod publish;
pub mod telemetry;

// Re-exports for convenience
pub use analysis::{FeatureFrame, TempoEstimate};
pub use audio::{SampleChunk, SampleSource};
pub use calibration::CalibrationResult;
pub use config::PipelineConfig;
pub use error::{CalibrationError, CaptureError, ErrorCode, NumericFault};
pub use pipeline::{HealthSnapshot, Pipeline};
pub use publish::{channel, Freshness, Publisher, Subscriber};
pub use telemetry::TelemetryReporter;
