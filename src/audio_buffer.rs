/// Audio buffer module for storing incoming stream samples
///
/// Implements a ring buffer feeding the detection engine's window slicer.
/// Sized to hold 10 seconds of mono 16kHz float PCM by default.

use cache_padded::CachePadded;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Audio sample format (32-bit float PCM, -1.0 to 1.0)
pub type AudioSample = f32;

/// Default capacity: 10 seconds at 16kHz sample rate
pub const BUFFER_DURATION_SECS: usize = 10;
pub const SAMPLE_RATE: usize = 16000;
pub const BUFFER_SIZE: usize = BUFFER_DURATION_SECS * SAMPLE_RATE; // 160,000 samples

#[derive(Error, Debug)]
pub enum AudioBufferError {
    #[error("Buffer underflow: attempted to read {0} samples, but only {1} available")]
    Underflow(usize, usize),
}

type RingBuffer = HeapRb<AudioSample>;
type RingProducer = <RingBuffer as Split>::Prod;
type RingConsumer = <RingBuffer as Split>::Cons;

/// Ring buffer for audio samples
/// Uses separate producer and consumer halves behind mutexes
pub struct AudioBuffer {
    producer: CachePadded<Mutex<RingProducer>>,
    consumer: CachePadded<Mutex<RingConsumer>>,
    sample_rate: usize,
}

impl AudioBuffer {
    /// Create a new audio buffer with default 10-second capacity
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_SIZE)
    }

    /// Create a buffer with custom capacity
    pub fn with_capacity(capacity: usize) -> Self {
        debug!("Creating audio buffer with capacity: {} samples", capacity);

        let rb = HeapRb::<AudioSample>::new(capacity);
        let (producer, consumer) = rb.split();

        Self {
            producer: CachePadded::new(Mutex::new(producer)),
            consumer: CachePadded::new(Mutex::new(consumer)),
            sample_rate: SAMPLE_RATE,
        }
    }

    /// Write audio samples to the buffer (non-blocking)
    ///
    /// Returns the number of samples appended.
    /// If the buffer is full, oldest samples are dropped to make room.
    pub fn write(&mut self, samples: &[AudioSample]) -> usize {
        let mut producer = self.producer.lock().unwrap();

        let available_space = producer.vacant_len();
        let to_write = samples.len();

        if to_write > available_space {
            let to_drop = to_write - available_space;
            let mut consumer = self.consumer.lock().unwrap();
            consumer.skip(to_drop);
            drop(consumer);

            warn!(
                "Buffer full, dropping {} oldest samples to make room",
                to_drop
            );
        }

        let written = producer.push_slice(samples);
        trace!("Wrote {} samples to buffer", written);

        written
    }

    /// Read the first `count` samples without removing them (peek)
    ///
    /// Returns fewer samples if the buffer holds less than `count`.
    pub fn peek(&self, count: usize) -> Vec<AudioSample> {
        let consumer = self.consumer.lock().unwrap();
        let available = consumer.occupied_len();
        let to_read = count.min(available);

        let mut result = Vec::with_capacity(to_read);

        for item in consumer.iter().take(to_read) {
            result.push(*item);
        }

        result
    }

    /// Remove `count` samples from the front of the buffer
    pub fn consume(&mut self, count: usize) -> Result<(), AudioBufferError> {
        let mut consumer = self.consumer.lock().unwrap();
        let available = consumer.occupied_len();

        if count > available {
            return Err(AudioBufferError::Underflow(count, available));
        }

        consumer.skip(count);
        Ok(())
    }

    /// Get the number of samples currently in the buffer
    pub fn len(&self) -> usize {
        let consumer = self.consumer.lock().unwrap();
        consumer.occupied_len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get buffer capacity
    pub fn capacity(&self) -> usize {
        let consumer = self.consumer.lock().unwrap();
        consumer.capacity().get()
    }

    /// Clear all data from the buffer
    pub fn clear(&mut self) {
        let mut consumer = self.consumer.lock().unwrap();
        let occupied = consumer.occupied_len();
        consumer.skip(occupied);
        debug!("Cleared audio buffer");
    }

    /// Get the sample rate
    pub fn sample_rate(&self) -> usize {
        self.sample_rate
    }

    /// Get duration of audio currently in buffer (in seconds)
    pub fn duration_secs(&self) -> f32 {
        self.len() as f32 / self.sample_rate as f32
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new()
    }
}
