//! Simulated input device
//!
//! Emits one `blocksize × channels` interleaved frame per frame period on a
//! dedicated thread, mimicking the timing of a hardware callback. Used for
//! headless runs and end-to-end tests.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use tracing::{debug, warn};

use crate::capture::{DeviceEvent, DeviceEventCallback};
use crate::error::Result;
use crate::AudioConfig;

/// Signal produced by the simulated device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalPattern {
    /// All-zero samples
    Silence,
    /// Identical sine on every channel
    Sine { frequency_hz: f32, amplitude: f32 },
    /// Silence for `after_frames` frames, then the device disappears
    Disconnect { after_frames: u64 },
}

/// Running simulated device thread
pub struct SimulatedDevice {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimulatedDevice {
    /// Spawn the device thread
    ///
    /// `on_samples` receives each interleaved frame exactly like a cpal data
    /// callback would; `events` receives [`DeviceEvent::DeviceLost`] for
    /// [`SignalPattern::Disconnect`].
    pub fn spawn<F>(
        config: &AudioConfig,
        pattern: SignalPattern,
        mut on_samples: F,
        events: Option<DeviceEventCallback>,
    ) -> Result<Self>
    where
        F: FnMut(&[f32]) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);

        let channels = config.channels as usize;
        let sample_rate = config.sample_rate as f32;
        let period = config.frame_period();
        let mut frame = vec![0.0f32; config.frame_len()];

        let handle = std::thread::Builder::new()
            .name("simulated-audio".to_string())
            .spawn(move || {
                let mut next_deadline = Instant::now();
                let mut frames_emitted: u64 = 0;
                let mut sample_clock: u64 = 0;

                while thread_running.load(Ordering::Acquire) {
                    match pattern {
                        SignalPattern::Silence => frame.fill(0.0),
                        SignalPattern::Sine {
                            frequency_hz,
                            amplitude,
                        } => {
                            for block in frame.chunks_exact_mut(channels) {
                                let t = sample_clock as f32 / sample_rate;
                                block.fill((2.0 * PI * frequency_hz * t).sin() * amplitude);
                                sample_clock += 1;
                            }
                        }
                        SignalPattern::Disconnect { after_frames } => {
                            if frames_emitted >= after_frames {
                                warn!("Simulated device disconnected after {} frames", frames_emitted);
                                if let Some(ref events) = events {
                                    events(DeviceEvent::DeviceLost(
                                        "simulated device disconnected".to_string(),
                                    ));
                                }
                                break;
                            }
                            frame.fill(0.0);
                        }
                    }

                    on_samples(&frame);
                    frames_emitted += 1;

                    next_deadline += period;
                    let now = Instant::now();
                    if next_deadline > now {
                        std::thread::sleep(next_deadline - now);
                    } else {
                        // Fell behind; resynchronise instead of bursting
                        next_deadline = now;
                    }
                }

                debug!("Simulated device thread exiting after {} frames", frames_emitted);
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Stop the device thread and wait for it to exit
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Simulated device thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        self.stop();
    }
}
