//! Lock-free frame assembly for audio callbacks

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;

/// Reassembles fixed-size interleaved frames from arbitrarily sized callback buffers
///
/// Uses the `ringbuf` crate for wait-free SPSC storage. Hosts are free to ignore
/// the requested block size (PipeWire and WASAPI both do), so the callback pushes
/// whatever it receives and complete frames are drained one at a time.
///
/// All storage is allocated up front; [`FrameAssembler::push`] never allocates.
pub struct FrameAssembler {
    producer: ringbuf::HeapProd<f32>,
    consumer: ringbuf::HeapCons<f32>,
    frame: Vec<f32>,
    capacity: usize,
}

impl FrameAssembler {
    /// Create a new assembler
    ///
    /// # Arguments
    ///
    /// * `frame_len` - Interleaved samples per frame (blocksize × channels)
    /// * `capacity_frames` - Ring capacity in frames (at least 2 is enforced)
    ///
    /// # Example
    ///
    /// ```
    /// use spectrum_audio::FrameAssembler;
    ///
    /// let mut assembler = FrameAssembler::new(4, 2);
    /// let mut frames = 0;
    /// assembler.push(&[0.0; 10], |frame| {
    ///     assert_eq!(frame.len(), 4);
    ///     frames += 1;
    /// });
    /// assert_eq!(frames, 2);
    /// assert_eq!(assembler.available(), 2);
    /// ```
    pub fn new(frame_len: usize, capacity_frames: usize) -> Self {
        let frame_len = frame_len.max(1);
        let capacity = frame_len * capacity_frames.max(2);
        let rb = HeapRb::<f32>::new(capacity);
        let (producer, consumer) = rb.split();

        Self {
            producer,
            consumer,
            frame: vec![0.0; frame_len],
            capacity,
        }
    }

    /// Push callback samples and invoke `on_frame` for every completed frame
    ///
    /// Returns the number of frames emitted. Samples that do not complete a
    /// frame stay buffered for the next call.
    pub fn push<F>(&mut self, mut samples: &[f32], mut on_frame: F) -> usize
    where
        F: FnMut(&[f32]),
    {
        let mut emitted = 0;

        loop {
            let written = self.producer.push_slice(samples);
            samples = &samples[written..];

            while self.consumer.occupied_len() >= self.frame.len() {
                let read = self.consumer.pop_slice(&mut self.frame);
                debug_assert_eq!(read, self.frame.len());
                on_frame(&self.frame);
                emitted += 1;
            }

            if samples.is_empty() {
                return emitted;
            }
        }
    }

    /// Interleaved samples per frame
    pub fn frame_len(&self) -> usize {
        self.frame.len()
    }

    /// Samples buffered towards the next frame
    pub fn available(&self) -> usize {
        self.consumer.occupied_len()
    }

    /// Total ring capacity in samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    /// Discard any partial frame
    pub fn clear(&mut self) {
        self.consumer.clear();
    }
}
