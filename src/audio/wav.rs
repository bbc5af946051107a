// WavSource - replay a recorded mono capture through the pipeline
//
// The whole file is decoded at open time so replay never touches the disk on
// the hop path. End of file is reported as `SourceExhausted`; the final partial
// chunk is zero-padded.

use anyhow::{anyhow, Context, Result};
use std::path::Path;

use super::source::{SampleChunk, SampleSource};
use super::synthetic::to_i16;
use crate::config::{CHUNK_SIZE, SAMPLE_RATE_HZ};
use crate::error::CaptureError;

/// File-backed sample source
pub struct WavSource {
    label: String,
    samples: Vec<i16>,
    cursor: usize,
    sequence: u64,
}

impl WavSource {
    /// Decode a mono 16 kHz WAV file
    ///
    /// Accepts 16/24/32-bit integer and 32-bit float PCM.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader =
            hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
        let spec = reader.spec();
        if spec.channels != 1 {
            return Err(anyhow!(
                "{} must be mono (found {} channels)",
                path.display(),
                spec.channels
            ));
        }
        if spec.sample_rate != SAMPLE_RATE_HZ {
            return Err(anyhow!(
                "{} must be sampled at {} Hz (found {} Hz)",
                path.display(),
                SAMPLE_RATE_HZ,
                spec.sample_rate
            ));
        }

        let samples = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Int, 16) => reader
                .samples::<i16>()
                .collect::<std::result::Result<Vec<i16>, _>>()
                .with_context(|| format!("decoding {}", path.display()))?,
            (hound::SampleFormat::Int, bits @ (24 | 32)) => {
                let max = ((1i64 << (bits - 1)) - 1) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|value| to_i16(value as f32 / max)))
                    .collect::<std::result::Result<Vec<i16>, _>>()
                    .with_context(|| format!("decoding {}", path.display()))?
            }
            (hound::SampleFormat::Float, _) => reader
                .samples::<f32>()
                .map(|sample| sample.map(to_i16))
                .collect::<std::result::Result<Vec<i16>, _>>()
                .with_context(|| format!("decoding {}", path.display()))?,
            (_, other) => {
                return Err(anyhow!(
                    "Unsupported bits per sample {} in {}",
                    other,
                    path.display()
                ))
            }
        };

        log::info!(
            "[WavSource] Loaded {} samples ({:.2}s) from {}",
            samples.len(),
            samples.len() as f32 / SAMPLE_RATE_HZ as f32,
            path.display()
        );

        Ok(Self {
            label: path.display().to_string(),
            samples,
            cursor: 0,
            sequence: 0,
        })
    }

    /// Samples not yet replayed
    pub fn remaining(&self) -> usize {
        self.samples.len() - self.cursor
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
        self.sequence = 0;
    }
}

impl SampleSource for WavSource {
    fn next_chunk(&mut self) -> Result<SampleChunk, CaptureError> {
        if self.cursor >= self.samples.len() {
            return Err(CaptureError::SourceExhausted);
        }
        let end = (self.cursor + CHUNK_SIZE).min(self.samples.len());
        let chunk = SampleChunk::from_slice(self.sequence, &self.samples[self.cursor..end]);
        self.cursor = end;
        self.sequence += 1;
        Ok(chunk)
    }

    fn describe(&self) -> String {
        format!("wav({})", self.label)
    }
}

/// Write mono 16-bit samples at the capture rate
pub fn write_wav<P: AsRef<Path>>(path: P, samples: &[i16]) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE_HZ,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path.as_ref(), spec)
        .with_context(|| format!("creating {}", path.as_ref().display()))?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}
