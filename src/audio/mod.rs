// Audio module - sample sources, capture hand-off and rolling history

pub mod capture_queue;
pub mod ring_buffer;
pub mod source;
pub mod synthetic;
pub mod wav;
pub mod window;

cfg_if::cfg_if! {
    if #[cfg(not(target_os = "android"))] {
        pub mod cpal_capture;
        pub use cpal_capture::CpalCapture;
    }
}

pub use capture_queue::{CaptureProducer, CaptureQueue, ChannelSource};
pub use ring_buffer::RingBuffer;
pub use source::{SampleChunk, SampleSource};
pub use synthetic::{SyntheticPattern, SyntheticSource};
pub use wav::WavSource;
pub use window::WindowBank;
