// CpalCapture - desktop microphone capture
//
// Opens the default input device, downmixes to mono, decimates an integer
// multiple of 16 kHz down to 16 kHz, quantises to i16 and feeds the capture
// queue. The callback never allocates: frames are folded into a fixed scratch
// chunk that is handed to `CaptureProducer::write` when full.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::time::Duration;

use super::capture_queue::{CaptureProducer, CaptureQueue, ChannelSource};
use super::synthetic::to_i16;
use crate::config::{CaptureConfig, CHUNK_SIZE, SAMPLE_RATE_HZ};
use crate::error::CaptureError;

/// Device rates we can decimate from, in preference order
const PREFERRED_RATES: [u32; 4] = [48_000, 16_000, 32_000, 96_000];

/// Mono downmix + box-car decimator feeding a capture producer
pub struct Downmixer {
    channels: usize,
    factor: usize,
    accumulator: f32,
    accumulated: usize,
    scratch: [i16; CHUNK_SIZE],
    scratch_len: usize,
}

impl Downmixer {
    /// # Arguments
    /// * `channels` - Interleaved channel count of the device stream
    /// * `device_rate` - Device sample rate; must be a multiple of 16 kHz
    pub fn new(channels: usize, device_rate: u32) -> Result<Self, CaptureError> {
        if device_rate == 0 || device_rate % SAMPLE_RATE_HZ != 0 {
            return Err(CaptureError::StreamOpenFailed {
                reason: format!(
                    "Device rate {} Hz is not a multiple of {} Hz",
                    device_rate, SAMPLE_RATE_HZ
                ),
            });
        }
        Ok(Self {
            channels: channels.max(1),
            factor: (device_rate / SAMPLE_RATE_HZ) as usize,
            accumulator: 0.0,
            accumulated: 0,
            scratch: [0; CHUNK_SIZE],
            scratch_len: 0,
        })
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Fold an interleaved device buffer into the producer
    pub fn push_interleaved<T: Copy>(
        &mut self,
        data: &[T],
        to_f32: fn(T) -> f32,
        producer: &mut CaptureProducer,
    ) {
        let scale = 1.0 / self.channels as f32;
        for frame in data.chunks(self.channels) {
            let mono: f32 = frame.iter().map(|&s| to_f32(s)).sum::<f32>() * scale;
            self.accumulator += mono;
            self.accumulated += 1;
            if self.accumulated == self.factor {
                self.scratch[self.scratch_len] = to_i16(self.accumulator / self.factor as f32);
                self.scratch_len += 1;
                self.accumulator = 0.0;
                self.accumulated = 0;
                if self.scratch_len == CHUNK_SIZE {
                    producer.write(&self.scratch);
                    self.scratch_len = 0;
                }
            }
        }
    }
}

fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32_768.0
}

fn f32_identity(sample: f32) -> f32 {
    sample
}

/// Live input stream; capture stops when this is dropped
pub struct CpalCapture {
    stream: cpal::Stream,
    device_name: String,
    device_rate: u32,
}

impl CpalCapture {
    /// Open the default input and start streaming into a fresh capture queue
    ///
    /// # Returns
    /// The running capture and the `SampleSource` the pipeline should read
    pub fn start(config: &CaptureConfig) -> Result<(Self, ChannelSource), CaptureError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| CaptureError::StreamOpenFailed {
                reason: "No default input device found".to_string(),
            })?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let supported = select_input_config(&device)?;
        let sample_format = supported.sample_format();
        let stream_config: cpal::StreamConfig = supported.into();
        let device_rate = stream_config.sample_rate.0;

        let (mut producer, source) = CaptureQueue::new(
            config.queue_capacity,
            Duration::from_millis(config.wait_timeout_ms),
        );
        let mut downmixer = Downmixer::new(stream_config.channels as usize, device_rate)?;

        let err_fn = |err| log::error!("[CpalCapture] Input stream error: {}", err);

        let stream = match sample_format {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    downmixer.push_interleaved(data, f32_identity, &mut producer);
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    downmixer.push_interleaved(data, i16_to_f32, &mut producer);
                },
                err_fn,
                None,
            ),
            other => {
                return Err(CaptureError::StreamOpenFailed {
                    reason: format!("Unsupported input sample format {:?}", other),
                })
            }
        }
        .map_err(|e| CaptureError::StreamOpenFailed {
            reason: format!("{:?}", e),
        })?;

        stream.play().map_err(|e| CaptureError::StreamOpenFailed {
            reason: format!("Failed to start input stream: {:?}", e),
        })?;

        log::info!(
            "[CpalCapture] Capturing from '{}' at {} Hz, {} channel(s), decimating by {}",
            device_name,
            device_rate,
            stream_config.channels,
            device_rate / SAMPLE_RATE_HZ
        );

        Ok((
            Self {
                stream,
                device_name,
                device_rate,
            },
            source,
        ))
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    /// Pause the device stream
    pub fn stop(&self) -> Result<(), CaptureError> {
        self.stream.pause().map_err(|e| CaptureError::DriverFault {
            details: format!("{:?}", e),
        })
    }
}

/// Default config if its rate decimates cleanly, else the first supported
/// range covering one of the preferred rates
fn select_input_config(
    device: &cpal::Device,
) -> Result<cpal::SupportedStreamConfig, CaptureError> {
    let default = device
        .default_input_config()
        .map_err(|e| CaptureError::StreamOpenFailed {
            reason: format!("Failed to get default input config: {:?}", e),
        })?;
    if default.sample_rate().0 % SAMPLE_RATE_HZ == 0 {
        return Ok(default);
    }

    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_input_configs()
        .map_err(|e| CaptureError::StreamOpenFailed {
            reason: format!("Failed to query input configs: {:?}", e),
        })?
        .collect();

    for rate in PREFERRED_RATES {
        let found = ranges.iter().find(|range| {
            range.min_sample_rate().0 <= rate
                && range.max_sample_rate().0 >= rate
                && matches!(
                    range.sample_format(),
                    cpal::SampleFormat::F32 | cpal::SampleFormat::I16
                )
        });
        if let Some(range) = found {
            return Ok(range.clone().with_sample_rate(cpal::SampleRate(rate)));
        }
    }

    Err(CaptureError::StreamOpenFailed {
        reason: format!(
            "Default input runs at {} Hz and no multiple of {} Hz is supported",
            default.sample_rate().0,
            SAMPLE_RATE_HZ
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleSource;

    #[test]
    fn test_rejects_non_multiple_rate() {
        assert!(matches!(
            Downmixer::new(2, 44_100),
            Err(CaptureError::StreamOpenFailed { .. })
        ));
        assert!(Downmixer::new(1, 0).is_err());
    }

    #[test]
    fn test_stereo_48k_decimates_to_chunks() {
        let (mut producer, mut source) = CaptureQueue::new(4, Duration::from_millis(5));
        let mut downmixer = Downmixer::new(2, 48_000).unwrap();
        assert_eq!(downmixer.factor(), 3);

        // One chunk = 128 output samples = 384 stereo frames. Left and right
        // average to 0.25.
        let mut data = Vec::new();
        for _ in 0..(CHUNK_SIZE * 3) {
            data.push(0.5f32);
            data.push(0.0f32);
        }
        downmixer.push_interleaved(&data[..100], f32_identity, &mut producer);
        downmixer.push_interleaved(&data[100..], f32_identity, &mut producer);

        let chunk = source.next_chunk().unwrap();
        let expected = to_i16(0.25);
        assert!(chunk.samples.iter().all(|&s| s == expected));
    }

    #[test]
    fn test_i16_input_is_normalised() {
        let (mut producer, mut source) = CaptureQueue::new(4, Duration::from_millis(5));
        let mut downmixer = Downmixer::new(1, 16_000).unwrap();
        let data = vec![16_384i16; CHUNK_SIZE];
        downmixer.push_interleaved(&data, i16_to_f32, &mut producer);
        let chunk = source.next_chunk().unwrap();
        assert!((chunk.samples[0] as i32 - 16_384).abs() <= 1);
    }
}
