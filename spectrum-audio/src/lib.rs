//! Spectrum Audio Capture
//!
//! Real-time audio capture that reduces every captured block to a compact
//! magnitude spectrum ("fingerprint") on the device's own callback thread.
//!
//! ## Features
//!
//! - Native PipeWire/ALSA/CoreAudio/WASAPI input via cpal
//! - Simulated device with identical timing for tests and headless runs
//! - Lock-free frame assembly (ringbuf) when the host ignores the requested block size
//! - Allocation-free per-frame path: real FFT (realfft) into preplanned buffers
//!
//! ## Architecture
//!
//! ```text
//! Audio Device (cpal) / SimulatedDevice
//!   │
//!   ├─> FrameAssembler (lock-free ringbuf) -> fixed blocksize × channels frames
//!   │     │
//!   │     └─> FrameProcessor: SpectralReducer (realfft) -> reused K-bin buffer
//!   │           │
//!   │           └─> spectrum callback(&[f32]) (non-blocking handoff, set by the caller)
//!   │
//!   └─> device event callback (stream errors, device loss)
//! ```

pub mod buffer;
pub mod capture;
pub mod error;
pub mod frame;
pub mod simulated;
pub mod spectrum;

pub use buffer::FrameAssembler;
pub use capture::{
    AudioCapture, CaptureStats, DeviceEvent, DeviceEventCallback, DeviceInfo, FrameProcessor,
    SpectrumCallback,
};
pub use error::{AudioError, Result};
pub use frame::{AudioFrame, SpectrumVector};
pub use simulated::{SignalPattern, SimulatedDevice};
pub use spectrum::SpectralReducer;

/// Capture sample rate (fixed at stream-open time)
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Input channel count
pub const DEFAULT_CHANNELS: u16 = 2;

/// Samples per channel per callback
pub const DEFAULT_BLOCKSIZE: usize = 1024;

/// Zero-padded transform length
pub const DEFAULT_FFT_SIZE: usize = 2048;

/// Number of magnitude bins kept from the transform
pub const DEFAULT_SPECTRUM_BINS: usize = 128;

/// Input device used by the reference setup
pub const DEFAULT_DEVICE_NAME: &str = "Stream Mix (Wave Link)";

/// Audio configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Sample rate requested from the device (default: 48000 Hz)
    pub sample_rate: u32,
    /// Number of interleaved input channels (default: 2)
    pub channels: u16,
    /// Samples per channel in one frame (default: 1024)
    pub blocksize: usize,
    /// Transform length; frames are zero-padded or truncated to this (default: 2048)
    pub fft_size: usize,
    /// Magnitudes kept per spectrum (default: 128)
    pub bins: usize,
    /// Input device name (None = host default input)
    pub device_name: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            blocksize: DEFAULT_BLOCKSIZE,
            fft_size: DEFAULT_FFT_SIZE,
            bins: DEFAULT_SPECTRUM_BINS,
            device_name: None,
        }
    }
}

impl AudioConfig {
    /// Check the shape constraints shared by the reducer and the capture driver
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(AudioError::invalid_config("Sample rate cannot be zero"));
        }
        if self.channels == 0 {
            return Err(AudioError::invalid_config("Channel count cannot be zero"));
        }
        if self.blocksize == 0 {
            return Err(AudioError::invalid_config("Blocksize cannot be zero"));
        }
        if self.fft_size < self.blocksize {
            return Err(AudioError::invalid_config(format!(
                "FFT size {} is smaller than blocksize {}",
                self.fft_size, self.blocksize
            )));
        }
        if self.bins == 0 || self.bins > self.fft_size / 2 + 1 {
            return Err(AudioError::invalid_config(format!(
                "Bin count {} must be within 1..={}",
                self.bins,
                self.fft_size / 2 + 1
            )));
        }
        Ok(())
    }

    /// Duration of one frame
    pub fn frame_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.blocksize as f64 / self.sample_rate as f64)
    }

    /// Interleaved sample count of one frame
    pub fn frame_len(&self) -> usize {
        self.blocksize * self.channels as usize
    }
}
