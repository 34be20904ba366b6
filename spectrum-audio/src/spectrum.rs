//! Spectral reduction with realfft
//!
//! Reduces one multi-channel frame to the magnitudes of the first `bins`
//! coefficients of a zero-padded real FFT of the channel average. No window
//! and no normalization are applied.
//!
//! All transform buffers are allocated once at construction.
//! [`SpectralReducer::reduce_into`] writes into a caller-owned slice and is
//! what the capture thread uses; [`SpectralReducer::reduce`] allocates its
//! result and is meant for everything else.

use std::fmt;
use std::sync::Arc;

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::error::{AudioError, Result};
use crate::frame::{AudioFrame, SpectrumVector};
use crate::AudioConfig;

/// Frame → spectrum reducer with preplanned FFT resources
pub struct SpectralReducer {
    channels: u16,
    fft_size: usize,
    bins: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl SpectralReducer {
    /// Create a reducer for frames with `channels` interleaved channels
    ///
    /// # Arguments
    ///
    /// * `channels` - Expected channel count; other frames are rejected
    /// * `fft_size` - Transform length M (frames are zero-padded or truncated to it)
    /// * `bins` - Number of leading magnitudes K to keep (≤ M/2 + 1)
    pub fn new(channels: u16, fft_size: usize, bins: usize) -> Result<Self> {
        if channels == 0 {
            return Err(AudioError::invalid_config("Channel count cannot be zero"));
        }
        if fft_size == 0 {
            return Err(AudioError::invalid_config("FFT size cannot be zero"));
        }
        if bins == 0 || bins > fft_size / 2 + 1 {
            return Err(AudioError::invalid_config(format!(
                "Bin count {} must be within 1..={}",
                bins,
                fft_size / 2 + 1
            )));
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(fft_size);
        let input = plan.make_input_vec();
        let spectrum = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();

        Ok(Self {
            channels,
            fft_size,
            bins,
            plan,
            input,
            spectrum,
            scratch,
        })
    }

    /// Create a reducer matching an audio configuration
    pub fn from_config(config: &AudioConfig) -> Result<Self> {
        Self::new(config.channels, config.fft_size, config.bins)
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Reduce a frame to a new [`SpectrumVector`] of exactly `bins` magnitudes
    pub fn reduce(&mut self, frame: &AudioFrame<'_>) -> Result<SpectrumVector> {
        let mut magnitudes = vec![0.0; self.bins];
        self.reduce_into(frame, &mut magnitudes)?;
        Ok(SpectrumVector::from_magnitudes(magnitudes))
    }

    /// Reduce a frame into a caller-provided slice of length `bins`
    pub fn reduce_into(&mut self, frame: &AudioFrame<'_>, out: &mut [f32]) -> Result<()> {
        if frame.channels() != self.channels {
            return Err(AudioError::invalid_frame(format!(
                "expected {} channels, got {}",
                self.channels,
                frame.channels()
            )));
        }
        if out.len() != self.bins {
            return Err(AudioError::invalid_config(format!(
                "output has {} slots, reducer produces {} bins",
                out.len(),
                self.bins
            )));
        }

        // Mono mix, truncated to M, remainder zero-padded
        let mut filled = 0;
        for (slot, sample) in self.input.iter_mut().zip(frame.mono()) {
            *slot = sample;
            filled += 1;
        }
        self.input[filled..].fill(0.0);

        self.plan
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)?;

        for (slot, coefficient) in out.iter_mut().zip(&self.spectrum[..self.bins]) {
            *slot = coefficient.norm();
        }

        Ok(())
    }
}

impl fmt::Debug for SpectralReducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralReducer")
            .field("channels", &self.channels)
            .field("fft_size", &self.fft_size)
            .field("bins", &self.bins)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    fn stereo_sine(freq: f32, sample_rate: f32, samples: usize, amplitude: f32) -> Vec<f32> {
        (0..samples)
            .flat_map(|i| {
                let v = (2.0 * PI * freq * i as f32 / sample_rate).sin() * amplitude;
                [v, v]
            })
            .collect()
    }

    #[test]
    fn test_output_has_exactly_k_non_negative_bins() {
        let mut reducer = SpectralReducer::new(2, 2048, 128).unwrap();

        for samples_per_channel in [1, 100, 1024, 2048, 4096] {
            let data: Vec<f32> = (0..samples_per_channel * 2)
                .map(|i| ((i * 7919) % 200) as f32 / 100.0 - 1.0)
                .collect();
            let frame = AudioFrame::new(&data, 2).unwrap();
            let spectrum = reducer.reduce(&frame).unwrap();

            assert_eq!(spectrum.len(), 128);
            assert!(spectrum.as_slice().iter().all(|m| *m >= 0.0 && m.is_finite()));
        }
    }

    #[test]
    fn test_silence_yields_all_zeros() {
        let mut reducer = SpectralReducer::new(2, 2048, 128).unwrap();
        let silence = vec![0.0f32; 1024 * 2];
        let frame = AudioFrame::new(&silence, 2).unwrap();

        let spectrum = reducer.reduce(&frame).unwrap();
        assert_eq!(spectrum.len(), 128);
        assert!(spectrum.as_slice().iter().all(|m| *m == 0.0));
    }

    #[test]
    fn test_dc_component_is_sum_of_mono_samples() {
        let mut reducer = SpectralReducer::new(2, 2048, 128).unwrap();
        // Left 1.0, right 0.0 → mono 0.5 for 1024 samples
        let data: Vec<f32> = (0..1024).flat_map(|_| [1.0, 0.0]).collect();
        let frame = AudioFrame::new(&data, 2).unwrap();

        let spectrum = reducer.reduce(&frame).unwrap();
        assert_relative_eq!(spectrum.as_slice()[0], 512.0, epsilon = 1e-2);
    }

    #[test]
    fn test_sine_peaks_at_expected_bin() {
        let mut reducer = SpectralReducer::new(2, 2048, 128).unwrap();
        // Bin width = 48000 / 2048 ≈ 23.4 Hz; bin 40 ≈ 937.5 Hz
        let freq = 40.0 * 48_000.0 / 2048.0;
        let data = stereo_sine(freq, 48_000.0, 2048, 0.5);
        let frame = AudioFrame::new(&data, 2).unwrap();

        let spectrum = reducer.reduce(&frame).unwrap();
        let peak = spectrum
            .as_slice()
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 40);
    }

    #[test]
    fn test_reduction_is_deterministic() {
        let mut reducer = SpectralReducer::new(2, 2048, 128).unwrap();
        let data = stereo_sine(440.0, 48_000.0, 1024, 0.8);
        let frame = AudioFrame::new(&data, 2).unwrap();

        let first = reducer.reduce(&frame).unwrap();
        let second = reducer.reduce(&frame).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_wrong_channel_count_is_invalid_frame() {
        let mut reducer = SpectralReducer::new(2, 2048, 128).unwrap();
        let mono = vec![0.0f32; 1024];
        let frame = AudioFrame::new(&mono, 1).unwrap();

        let err = reducer.reduce(&frame).unwrap_err();
        assert!(matches!(err, AudioError::InvalidFrame(_)));
    }

    #[test]
    fn test_invalid_reducer_shapes() {
        assert!(SpectralReducer::new(0, 2048, 128).is_err());
        assert!(SpectralReducer::new(2, 0, 128).is_err());
        assert!(SpectralReducer::new(2, 2048, 0).is_err());
        assert!(SpectralReducer::new(2, 2048, 1026).is_err());
    }
}
