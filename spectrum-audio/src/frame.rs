//! Frame and spectrum data types

use serde::{Deserialize, Serialize};

use crate::error::{AudioError, Result};

/// One block of interleaved samples across `channels` inputs.
///
/// Borrowed from the capture callback's buffer and never retained past the
/// reduction that consumes it.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    samples: &'a [f32],
    channels: u16,
}

impl<'a> AudioFrame<'a> {
    /// Wrap an interleaved buffer.
    ///
    /// Fails with [`AudioError::InvalidFrame`] when the buffer is empty, the
    /// channel count is zero, or the length is not a multiple of the channel count.
    pub fn new(samples: &'a [f32], channels: u16) -> Result<Self> {
        if channels == 0 {
            return Err(AudioError::invalid_frame("frame has zero channels"));
        }
        if samples.is_empty() {
            return Err(AudioError::invalid_frame("frame has no samples"));
        }
        if samples.len() % channels as usize != 0 {
            return Err(AudioError::invalid_frame(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }
        Ok(Self { samples, channels })
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Samples per channel
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn interleaved(&self) -> &'a [f32] {
        self.samples
    }

    /// Iterate the channel-averaged (mono) signal
    pub fn mono(&self) -> impl Iterator<Item = f32> + 'a {
        let channels = self.channels as usize;
        let scale = 1.0 / channels as f32;
        self.samples
            .chunks_exact(channels)
            .map(move |frame| frame.iter().sum::<f32>() * scale)
    }
}

/// Fixed-length sequence of non-negative spectral magnitudes.
///
/// Serializes as a bare JSON array, which is the wire format sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpectrumVector(Vec<f32>);

impl SpectrumVector {
    pub(crate) fn from_magnitudes(magnitudes: Vec<f32>) -> Self {
        Self(magnitudes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Encode as the JSON array payload
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl AsRef<[f32]> for SpectrumVector {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}
