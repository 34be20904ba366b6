//! List available input devices

use spectrum_audio::AudioCapture;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Audio Input Devices on System:");
    AudioCapture::print_devices()?;
    Ok(())
}
