//! Live spectrum test - capture from a device and print the loudest bin
//! Usage: cargo run --release --example live_spectrum ["Device Name"]

use parking_lot::Mutex;
use spectrum_audio::{AudioCapture, AudioConfig};
use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Loudest bin of the most recent frame
#[derive(Default, Clone, Copy)]
struct Peak {
    bin: usize,
    magnitude: f32,
    fresh: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n=== Live Spectrum Test ===\n");

    let device_name = env::args().nth(1);
    match &device_name {
        Some(name) => println!("Testing device: {}", name),
        None => println!("Testing default input (pass a device name to pick one)"),
    }

    let config = AudioConfig {
        device_name,
        ..Default::default()
    };
    let sample_rate = config.sample_rate;
    let fft_size = config.fft_size;

    let latest = Arc::new(Mutex::new(Peak::default()));
    let sink = Arc::clone(&latest);

    let mut capture = AudioCapture::new(config)?;
    capture.set_spectrum_callback(move |magnitudes: &[f32]| {
        let (bin, magnitude) = magnitudes
            .iter()
            .copied()
            .enumerate()
            .fold((0, 0.0f32), |best, (i, m)| if m > best.1 { (i, m) } else { best });
        if let Some(mut slot) = sink.try_lock() {
            *slot = Peak { bin, magnitude, fresh: true };
        }
    });
    capture.start()?;

    println!("\nCapturing for 10 seconds...\n");

    for i in 1..=20 {
        thread::sleep(Duration::from_millis(500));

        let peak = std::mem::take(&mut *latest.lock());
        if peak.fresh {
            let hz = peak.bin as f32 * sample_rate as f32 / fft_size as f32;
            let bars = "█".repeat(((peak.magnitude / 10.0) as usize).min(50));

            println!("[{:4.1}s] Peak bin {:3} (~{:6.0} Hz) {:8.2}  {}",
                     i as f32 * 0.5, peak.bin, hz, peak.magnitude, bars);
        }
    }

    let stats = capture.stop();
    println!("\nProcessed {} frames ({} invalid)", stats.frames_processed, stats.frames_invalid);
    Ok(())
}
