use std::thread;

use lightwave_audio::publish::Freshness;
use lightwave_audio::{channel, FeatureFrame};

const PUBLISHES: u64 = 20_000;

/// Every float in the frame carries the same stamp, so a torn read shows up
/// as a mismatch
fn stamped(stamp: u64) -> FeatureFrame {
    let value = stamp as f32;
    let mut frame = FeatureFrame::default();
    frame.hop_index = stamp;
    frame.sequence = stamp;
    frame.bins_fast.0 = [value; 64];
    frame.bins_heavy.0 = [value; 64];
    frame.bands_fast = [value; 8];
    frame.chroma = [value; 12];
    frame.novelty = value;
    frame
}

fn assert_consistent(frame: &FeatureFrame) {
    let value = frame.hop_index as f32;
    assert_eq!(frame.sequence, frame.hop_index);
    assert!(frame.bins_fast.0.iter().all(|&v| v == value), "torn bins_fast");
    assert!(frame.bins_heavy.0.iter().all(|&v| v == value), "torn bins_heavy");
    assert!(frame.bands_fast.iter().all(|&v| v == value), "torn bands");
    assert!(frame.chroma.iter().all(|&v| v == value), "torn chroma");
    assert_eq!(frame.novelty, value);
}

#[test]
fn frames_cross_threads_whole() {
    let (mut publisher, mut subscriber) = channel::<FeatureFrame>();

    let reader = thread::spawn(move || {
        let mut last = 0u64;
        let mut fresh_reads = 0u64;
        while last < PUBLISHES {
            let (frame, sequence, freshness) = subscriber.read_with_freshness();
            assert!(sequence >= last, "sequence went backwards");
            if freshness == Freshness::Fresh {
                fresh_reads += 1;
                assert_consistent(&frame);
                // Publish sequence starts at 1 for stamp 0
                assert_eq!(sequence, frame.hop_index + 1);
            }
            last = sequence;
        }
        fresh_reads
    });

    for stamp in 0..PUBLISHES {
        let sequence = publisher.publish(&stamped(stamp));
        assert_eq!(sequence, stamp + 1);
    }

    let fresh_reads = reader.join().expect("reader thread");
    assert!(fresh_reads >= 1);
    assert!(fresh_reads <= PUBLISHES);
}

#[test]
fn slow_reader_only_sees_the_newest_frame() {
    let (mut publisher, mut subscriber) = channel::<FeatureFrame>();
    for stamp in 0..500 {
        publisher.publish(&stamped(stamp));
    }

    let handle = thread::spawn(move || {
        let first = subscriber.read_with_freshness();
        let second = subscriber.read_with_freshness();
        (first, second)
    });
    let ((frame, sequence, freshness), (_, again, stale)) = handle.join().expect("reader thread");

    assert_eq!(sequence, 500);
    assert_eq!(frame.hop_index, 499);
    assert_consistent(&frame);
    assert_eq!(freshness, Freshness::Fresh);
    assert_eq!(again, 500);
    assert_eq!(stale, Freshness::Stale);
}
