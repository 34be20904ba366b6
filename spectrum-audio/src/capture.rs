//! Audio capture with cpal
//!
//! Owns the input stream and the per-frame path that runs on the audio
//! subsystem's callback thread: frame assembly, spectral reduction and the
//! spectrum callback. The callback installed by the caller must not block.
//!
//! Every buffer on the per-frame path is allocated when capture starts; the
//! callback receives a borrowed slice of magnitudes that is overwritten by the
//! next frame.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, Host, Stream, StreamConfig, SupportedBufferSize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::buffer::FrameAssembler;
use crate::error::{AudioError, Result};
use crate::frame::AudioFrame;
use crate::simulated::{SignalPattern, SimulatedDevice};
use crate::spectrum::SpectralReducer;
use crate::AudioConfig;

/// Callback receiving the magnitudes of every reduced frame (runs on the capture thread)
pub type SpectrumCallback = Box<dyn FnMut(&[f32]) + Send>;

/// Callback receiving device-level notifications
pub type DeviceEventCallback = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

/// Ring capacity of the frame assembler, in frames
const ASSEMBLER_FRAMES: usize = 4;

/// Device-level notification raised from the stream error path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Recoverable stream problem (overrun, underrun, backend hiccup)
    StreamError(String),
    /// The device disappeared or its stream was closed; capture has halted
    DeviceLost(String),
}

impl DeviceEvent {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceLost(_))
    }
}

/// Audio device information
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
    pub max_input_channels: u16,
    pub default_sample_rate: u32,
}

/// Counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Frames reduced and handed to the spectrum callback
    pub frames_processed: u64,
    /// Frames dropped because they were malformed or the transform failed
    pub frames_invalid: u64,
}

#[derive(Debug, Default)]
struct CaptureCounters {
    processed: AtomicU64,
    invalid: AtomicU64,
}

impl CaptureCounters {
    fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            frames_processed: self.processed.load(Ordering::Relaxed),
            frames_invalid: self.invalid.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.processed.store(0, Ordering::Relaxed);
        self.invalid.store(0, Ordering::Relaxed);
    }
}

/// Per-frame path shared by the cpal callback and the simulated device
///
/// Assembles device buffers into frames, reduces each one into a reused
/// magnitude buffer and passes it to the spectrum callback. Does not allocate
/// after construction.
pub struct FrameProcessor {
    channels: u16,
    assembler: FrameAssembler,
    reducer: SpectralReducer,
    magnitudes: Vec<f32>,
    callback: SpectrumCallback,
    counters: Arc<CaptureCounters>,
}

impl FrameProcessor {
    pub fn new<F>(config: &AudioConfig, callback: F) -> Result<Self>
    where
        F: FnMut(&[f32]) + Send + 'static,
    {
        Self::with_counters(config, Box::new(callback), Arc::new(CaptureCounters::default()))
    }

    fn with_counters(
        config: &AudioConfig,
        callback: SpectrumCallback,
        counters: Arc<CaptureCounters>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            channels: config.channels,
            assembler: FrameAssembler::new(config.frame_len(), ASSEMBLER_FRAMES),
            reducer: SpectralReducer::from_config(config)?,
            magnitudes: vec![0.0; config.bins],
            callback,
            counters,
        })
    }

    /// Feed raw interleaved samples from the device
    pub fn process(&mut self, data: &[f32]) {
        let Self {
            channels,
            assembler,
            reducer,
            magnitudes,
            callback,
            counters,
        } = self;

        assembler.push(data, |samples| {
            let reduced = AudioFrame::new(samples, *channels)
                .and_then(|frame| reducer.reduce_into(&frame, &mut magnitudes[..]));
            match reduced {
                Ok(()) => {
                    counters.processed.fetch_add(1, Ordering::Relaxed);
                    (**callback)(&magnitudes[..]);
                }
                Err(e) => {
                    counters.invalid.fetch_add(1, Ordering::Relaxed);
                    debug!("Dropping frame: {}", e);
                }
            }
        });
    }

    pub fn stats(&self) -> CaptureStats {
        self.counters.snapshot()
    }
}

enum ActiveStream {
    Device { stream: Stream, name: String },
    Simulated(SimulatedDevice),
}

/// Capture driver: device stream lifecycle plus the per-frame callback
pub struct AudioCapture {
    config: AudioConfig,
    host: Host,
    stream: Option<ActiveStream>,
    is_capturing: Arc<AtomicBool>,
    counters: Arc<CaptureCounters>,
    spectrum_callback: Option<SpectrumCallback>,
    event_callback: Option<DeviceEventCallback>,
}

impl AudioCapture {
    /// Create new capture instance (no device is opened yet)
    pub fn new(config: AudioConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            host: cpal::default_host(),
            stream: None,
            is_capturing: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(CaptureCounters::default()),
            spectrum_callback: None,
            event_callback: None,
        })
    }

    /// Set callback for reduced frames. It runs on the capture thread and must not block.
    ///
    /// The callback moves into the stream on `start`; set it again before a restart.
    pub fn set_spectrum_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&[f32]) + Send + 'static,
    {
        self.spectrum_callback = Some(Box::new(callback));
    }

    /// Set callback for device errors and device loss
    pub fn set_event_callback<F>(&mut self, callback: F)
    where
        F: Fn(DeviceEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(Arc::new(callback));
    }

    /// List all available input devices
    pub fn list_devices() -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let mut devices = Vec::new();

        let default_name = host.default_input_device().and_then(|d| d.name().ok());

        for (index, device) in host
            .input_devices()
            .map_err(|e| AudioError::device(format!("Failed to enumerate devices: {}", e)))?
            .enumerate()
        {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Unknown Device {}", index));

            let (max_input_channels, default_sample_rate) = device
                .default_input_config()
                .map(|c| (c.channels(), c.sample_rate().0))
                .unwrap_or((0, 0));

            devices.push(DeviceInfo {
                index,
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                max_input_channels,
                default_sample_rate,
            });
        }

        Ok(devices)
    }

    /// Print device list in formatted output
    pub fn print_devices() -> Result<()> {
        let devices = Self::list_devices()?;

        println!("\n{}", "=".repeat(78));
        println!("Available Input Devices:");
        println!("{}\n", "=".repeat(78));

        for device in devices {
            let default_marker = if device.is_default { " [DEFAULT INPUT]" } else { "" };
            println!("{:3}: {}{}", device.index, device.name, default_marker);
            println!("     Channels: {}", device.max_input_channels);
            println!("     Sample Rate: {} Hz\n", device.default_sample_rate);
        }

        println!("{}", "=".repeat(78));
        Ok(())
    }

    /// Open the configured device and start capturing
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Err(AudioError::AlreadyCapturing);
        }

        let device = self.select_device()?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        info!(
            "Opening input '{}': {} Hz, {} channels, {} samples/block",
            device_name, self.config.sample_rate, self.config.channels, self.config.blocksize
        );

        self.counters.reset();

        let buffer_size = self.buffer_size_for(&device);
        let stream = self.build_stream(&device, buffer_size)?;

        stream
            .play()
            .map_err(|e| AudioError::stream(format!("Failed to start stream: {}", e)))?;

        self.is_capturing.store(true, Ordering::Release);
        self.stream = Some(ActiveStream::Device {
            stream,
            name: device_name,
        });

        info!("Audio capture started (cpal backend)");
        Ok(())
    }

    /// Start capturing from a simulated device instead of hardware
    pub fn start_simulated(&mut self, pattern: SignalPattern) -> Result<()> {
        if self.stream.is_some() {
            return Err(AudioError::AlreadyCapturing);
        }

        self.counters.reset();
        let mut processor = self.frame_processor()?;
        let is_capturing = Arc::clone(&self.is_capturing);

        // A simulated loss halts capture the same way a vanished cpal device does
        let device_active = Arc::clone(&self.is_capturing);
        let forward = self.event_callback.clone();
        let events: DeviceEventCallback = Arc::new(move |event: DeviceEvent| {
            if event.is_fatal() {
                device_active.store(false, Ordering::Release);
            }
            if let Some(ref forward) = forward {
                forward(event);
            }
        });

        // Flag must be set before the device thread delivers its first frame
        self.is_capturing.store(true, Ordering::Release);
        let device = SimulatedDevice::spawn(
            &self.config,
            pattern,
            move |data| {
                if is_capturing.load(Ordering::Acquire) {
                    processor.process(data);
                }
            },
            Some(events),
        );

        match device {
            Ok(device) => {
                self.stream = Some(ActiveStream::Simulated(device));
                info!("Audio capture started (simulated {:?})", pattern);
                Ok(())
            }
            Err(e) => {
                self.is_capturing.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Stop capture and close the stream. Blocks only for the driver's close.
    pub fn stop(&mut self) -> CaptureStats {
        self.is_capturing.store(false, Ordering::Release);

        match self.stream.take() {
            Some(ActiveStream::Device { stream, name }) => {
                drop(stream);
                info!("Closed input '{}'", name);
            }
            Some(ActiveStream::Simulated(mut device)) => {
                device.stop();
                info!("Stopped simulated input");
            }
            None => {}
        }

        self.counters.snapshot()
    }

    /// Check if currently capturing
    pub fn is_active(&self) -> bool {
        self.is_capturing.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CaptureStats {
        self.counters.snapshot()
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    fn frame_processor(&mut self) -> Result<FrameProcessor> {
        let callback = self
            .spectrum_callback
            .take()
            .ok_or_else(|| AudioError::invalid_config("No spectrum callback set"))?;
        FrameProcessor::with_counters(&self.config, callback, Arc::clone(&self.counters))
    }

    /// Request the configured block size when the device advertises support for it
    fn buffer_size_for(&self, device: &Device) -> BufferSize {
        let wanted = self.config.blocksize as u32;
        match device.default_input_config() {
            Ok(supported) => match supported.buffer_size() {
                SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&wanted) => {
                    BufferSize::Fixed(wanted)
                }
                _ => {
                    warn!("Block size {} not supported by device, using host default", wanted);
                    BufferSize::Default
                }
            },
            Err(e) => {
                debug!("No default input config ({}), using host default block size", e);
                BufferSize::Default
            }
        }
    }

    fn select_device(&self) -> Result<Device> {
        match self.config.device_name.as_deref() {
            Some(wanted) if !wanted.is_empty() => {
                let mut available = Vec::new();
                let devices = self
                    .host
                    .input_devices()
                    .map_err(|e| AudioError::device(format!("Failed to enumerate devices: {}", e)))?;

                for device in devices {
                    match device.name() {
                        Ok(name) if name == wanted => return Ok(device),
                        Ok(name) => available.push(name),
                        Err(_) => {}
                    }
                }

                Err(AudioError::device(format!(
                    "Input device '{}' not found (available: {})",
                    wanted,
                    available.join(", ")
                )))
            }
            _ => self
                .host
                .default_input_device()
                .ok_or_else(|| AudioError::device("No default input device found")),
        }
    }

    fn build_stream(&mut self, device: &Device, buffer_size: BufferSize) -> Result<Stream> {
        let stream_config = StreamConfig {
            channels: self.config.channels,
            sample_rate: cpal::SampleRate(self.config.sample_rate),
            buffer_size,
        };

        let mut processor = self.frame_processor()?;
        let is_capturing = Arc::clone(&self.is_capturing);
        let stream_active = Arc::clone(&self.is_capturing);
        let events = self.event_callback.clone();

        device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if is_capturing.load(Ordering::Acquire) {
                        processor.process(data);
                    }
                },
                move |err| {
                    let event = match err {
                        cpal::StreamError::DeviceNotAvailable => {
                            stream_active.store(false, Ordering::Release);
                            DeviceEvent::DeviceLost("device no longer available".to_string())
                        }
                        other => DeviceEvent::StreamError(other.to_string()),
                    };
                    warn!("Audio stream error: {:?}", event);
                    if let Some(ref events) = events {
                        events(event);
                    }
                },
                None,
            )
            .map_err(|e| AudioError::stream(format!("Failed to build stream: {}", e)))
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        if self.stream.is_some() {
            self.stop();
        }
    }
}
