// SampleSource - the pipeline's only input
//
// A source hands out fixed-size chunks of signed 16-bit samples at the capture
// rate. Failure to deliver is reported, never papered over: the hop loop skips
// the hop and counts it. Sources never synthesise samples to cover a fault.

use crate::config::CHUNK_SIZE;
use crate::error::CaptureError;

/// One capture cycle worth of samples
///
/// Plain `Copy` data so it can cross the capture queue without allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleChunk {
    /// Monotonic capture counter assigned by the source
    pub sequence: u64,
    pub samples: [i16; CHUNK_SIZE],
}

impl SampleChunk {
    pub fn new(sequence: u64, samples: [i16; CHUNK_SIZE]) -> Self {
        Self { sequence, samples }
    }

    pub fn silent(sequence: u64) -> Self {
        Self::new(sequence, [0; CHUNK_SIZE])
    }

    /// Build a chunk from a slice, zero-padding a short tail
    pub fn from_slice(sequence: u64, data: &[i16]) -> Self {
        let mut samples = [0i16; CHUNK_SIZE];
        let len = data.len().min(CHUNK_SIZE);
        samples[..len].copy_from_slice(&data[..len]);
        Self::new(sequence, samples)
    }
}

/// Producer of sample chunks
///
/// `next_chunk` blocks for at most the source's wait budget.
pub trait SampleSource: Send {
    /// Fetch the next chunk
    ///
    /// # Returns
    /// * `Ok(SampleChunk)` - Next chunk in capture order
    /// * `Err(CaptureError)` - Overrun, timeout or driver fault for this hop,
    ///   or a terminal condition (see [`CaptureError::is_recoverable`])
    fn next_chunk(&mut self) -> Result<SampleChunk, CaptureError>;

    /// Short label for logs and telemetry
    fn describe(&self) -> String;

    /// Share of any internal buffer in use, 0-100
    fn backlog_percent(&self) -> f32 {
        0.0
    }
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn next_chunk(&mut self) -> Result<SampleChunk, CaptureError> {
        (**self).next_chunk()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn backlog_percent(&self) -> f32 {
        (**self).backlog_percent()
    }
}
