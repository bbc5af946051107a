// CaptureQueue - lock-free hand-off from the capture callback to the hop loop
//
// A single SPSC ring (rtrb) carries fixed-size `SampleChunk`s. Chunks are
// `Copy`, so the queue itself is the pre-allocated pool: nothing is allocated
// after construction on either side.
//
// Flow:
// 1. Capture callback writes arbitrary-length sample runs into the producer
// 2. Producer assembles them into CHUNK_SIZE chunks and pushes
// 3. If the ring is full the chunk is dropped and an overrun is counted
// 4. Hop loop pops one chunk per hop through `ChannelSource::next_chunk`
// 5. Overruns are surfaced once each as `CaptureError::Overrun`

use rtrb::{Consumer, Producer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::source::{SampleChunk, SampleSource};
use crate::config::CHUNK_SIZE;
use crate::error::CaptureError;

/// Poll interval while waiting for the next chunk
const POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Constructor for the capture hand-off pair
pub struct CaptureQueue;

impl CaptureQueue {
    /// Create a producer/consumer pair with room for `capacity` chunks
    ///
    /// # Arguments
    /// * `capacity` - Chunks buffered before overruns start (typical: 8-64)
    /// * `wait_timeout` - Longest `next_chunk` waits before reporting a timeout
    ///
    /// # Panics
    /// Panics if capacity is 0
    #[allow(clippy::new_ret_no_self)]
    pub fn new(capacity: usize, wait_timeout: Duration) -> (CaptureProducer, ChannelSource) {
        assert!(capacity > 0, "capacity must be greater than 0");

        let (producer, consumer) = rtrb::RingBuffer::new(capacity);
        let overruns = Arc::new(AtomicU64::new(0));

        (
            CaptureProducer {
                producer,
                overruns: Arc::clone(&overruns),
                pending: [0; CHUNK_SIZE],
                pending_len: 0,
                next_sequence: 0,
            },
            ChannelSource {
                consumer,
                overruns,
                reported_overruns: 0,
                wait_timeout,
            },
        )
    }
}

/// Capture-side half; lives in the driver callback
pub struct CaptureProducer {
    producer: Producer<SampleChunk>,
    overruns: Arc<AtomicU64>,
    pending: [i16; CHUNK_SIZE],
    pending_len: usize,
    next_sequence: u64,
}

impl CaptureProducer {
    /// Append samples, pushing every completed chunk
    ///
    /// Real-time safe: no allocation, no locks, bounded work per sample.
    pub fn write(&mut self, samples: &[i16]) {
        let mut remaining = samples;
        while !remaining.is_empty() {
            let take = (CHUNK_SIZE - self.pending_len).min(remaining.len());
            self.pending[self.pending_len..self.pending_len + take]
                .copy_from_slice(&remaining[..take]);
            self.pending_len += take;
            remaining = &remaining[take..];

            if self.pending_len == CHUNK_SIZE {
                let chunk = SampleChunk::new(self.next_sequence, self.pending);
                self.push_chunk(chunk);
                self.pending_len = 0;
            }
        }
    }

    /// Push a complete chunk, counting an overrun if the queue is full
    ///
    /// # Returns
    /// `true` if the chunk was queued
    pub fn push_chunk(&mut self, chunk: SampleChunk) -> bool {
        self.next_sequence = chunk.sequence.wrapping_add(1);
        match self.producer.push(chunk) {
            Ok(()) => true,
            Err(_) => {
                self.overruns.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Total chunks dropped because the hop loop fell behind
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

/// Hop-loop half; a `SampleSource` backed by the capture queue
pub struct ChannelSource {
    consumer: Consumer<SampleChunk>,
    overruns: Arc<AtomicU64>,
    reported_overruns: u64,
    wait_timeout: Duration,
}

impl ChannelSource {
    /// Chunks currently waiting
    pub fn queued(&self) -> usize {
        self.consumer.slots()
    }

    /// Percentage of the queue in use
    pub fn occupancy_percent(&self) -> f32 {
        let capacity = self.consumer.buffer().capacity().max(1);
        self.consumer.slots() as f32 * 100.0 / capacity as f32
    }
}

impl SampleSource for ChannelSource {
    fn next_chunk(&mut self) -> Result<SampleChunk, CaptureError> {
        let total_overruns = self.overruns.load(Ordering::Relaxed);
        if total_overruns > self.reported_overruns {
            let dropped_chunks = total_overruns - self.reported_overruns;
            self.reported_overruns = total_overruns;
            return Err(CaptureError::Overrun { dropped_chunks });
        }

        let started = Instant::now();
        loop {
            if let Ok(chunk) = self.consumer.pop() {
                return Ok(chunk);
            }
            if self.consumer.is_abandoned() {
                // Producer may have pushed between the pop and the check
                return self.consumer.pop().map_err(|_| CaptureError::Disconnected);
            }
            let waited = started.elapsed();
            if waited >= self.wait_timeout {
                return Err(CaptureError::Timeout {
                    waited_ms: waited.as_millis() as u64,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn describe(&self) -> String {
        format!("capture-queue({} slots)", self.consumer.buffer().capacity())
    }

    fn backlog_percent(&self) -> f32 {
        self.occupancy_percent()
    }
}
