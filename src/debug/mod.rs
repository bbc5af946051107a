// Debug module - opt-in diagnostics for the hop loop

pub mod pipeline_tracer;

pub use pipeline_tracer::PipelineStage;
