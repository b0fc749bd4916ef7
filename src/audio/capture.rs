//! Microphone capture and device discovery using CPAL.

use crate::audio::source::AudioSource;
use crate::audio::wav::{Resampler, downmix};
use crate::error::{HaloError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// CPAL probing prints ALSA/JACK noise while it tries each backend.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns that are never a voice device.
const FILTERED_PATTERNS: &[&str] = &["surround", "front:", "rear:", "center:", "side:", "HDMI", "S/PDIF"];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// Which side of the audio path a device serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// List usable devices, marking preferred ones with "\[recommended\]".
pub fn list_devices(direction: Direction) -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        match direction {
            Direction::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
            Direction::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
        }
    })
    .map_err(|e| HaloError::AudioDevice {
        message: format!("Failed to enumerate devices: {}", e),
    })?;

    let mut names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            if should_filter_device(&name) {
                continue;
            }
            if is_preferred_device(&name) {
                names.push(format!("{} [recommended]", name));
            } else {
                names.push(name);
            }
        }
    }
    Ok(names)
}

/// Find a device by exact name, or the best default for `direction`.
pub(crate) fn open_device(direction: Direction, name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = match direction {
            Direction::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
            Direction::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
        }
        .map_err(|e| HaloError::AudioDevice {
            message: format!("Failed to enumerate devices: {}", e),
        })?;

        if let Some(wanted) = name {
            return devices
                .into_iter()
                .find(|dev| dev.name().is_ok_and(|n| n == wanted))
                .ok_or_else(|| HaloError::AudioDeviceNotFound {
                    device: wanted.to_string(),
                });
        }

        if let Some(device) = devices
            .into_iter()
            .find(|dev| dev.name().is_ok_and(|n| is_preferred_device(&n)))
        {
            return Ok(device);
        }

        match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        }
        .ok_or_else(|| HaloError::AudioDeviceNotFound {
            device: "default".to_string(),
        })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched behind the owning Mutex, from one thread
/// at a time.
pub(crate) struct SendableStream(pub(crate) cpal::Stream);

unsafe impl Send for SendableStream {}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Microphone source delivering mono i16 at the configured rate.
///
/// Tries i16 mono at the target rate first, then falls back to the device's
/// native configuration with software downmix and resampling.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Mutex<Option<SendableStream>>,
    buffer: Arc<Mutex<Vec<i16>>>,
    callback_count: Arc<AtomicU64>,
    sample_rate: u32,
}

impl CpalAudioSource {
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let device = open_device(Direction::Input, device_name)?;
        Ok(Self {
            device,
            stream: Mutex::new(None),
            buffer: Arc::new(Mutex::new(Vec::new())),
            callback_count: Arc::new(AtomicU64::new(0)),
            sample_rate,
        })
    }

    fn build_preferred_stream(&self) -> Result<cpal::Stream> {
        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        self.device
            .build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    counter.fetch_add(1, Ordering::Relaxed);
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| tracing::error!(error = %err, "audio input stream error"),
                None,
            )
            .map_err(|e| HaloError::AudioDevice {
                message: format!("Failed to build input stream: {}", e),
            })
    }

    fn build_native_stream(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| HaloError::AudioDevice {
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate().0;
        let channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::info!(
            channels,
            native_rate,
            format = ?default_config.sample_format(),
            "using native input format, converting in software"
        );

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        let mut resampler = Resampler::new(native_rate, target_rate);
        let mut push = move |data: Vec<i16>| {
            counter.fetch_add(1, Ordering::Relaxed);
            let converted = resampler.process(&downmix(&data, channels));
            if let Ok(mut buf) = buffer.lock() {
                buf.extend_from_slice(&converted);
            }
        };

        let built = match default_config.sample_format() {
            SampleFormat::I16 => self.device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| push(data.to_vec()),
                |err| tracing::error!(error = %err, "audio input stream error"),
                None,
            ),
            SampleFormat::F32 => self.device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    push(data.iter().map(|&s| to_i16(s)).collect())
                },
                |err| tracing::error!(error = %err, "audio input stream error"),
                None,
            ),
            fmt => {
                return Err(HaloError::AudioDevice {
                    message: format!("Unsupported native sample format: {:?}", fmt),
                });
            }
        };
        built.map_err(|e| HaloError::AudioDevice {
            message: format!("Failed to build native input stream: {}", e),
        })
    }
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        let mut guard = self.stream.lock().map_err(|e| HaloError::AudioDevice {
            message: format!("Failed to lock stream: {}", e),
        })?;
        if guard.is_some() {
            return Ok(());
        }

        let stream = match self.build_preferred_stream() {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!(error = %e, "preferred input format rejected");
                self.build_native_stream()?
            }
        };
        stream.play().map_err(|e| HaloError::AudioDevice {
            message: format!("Failed to start audio stream: {}", e),
        })?;

        // Some PipeWire-ALSA setups accept a non-native config and never call back.
        std::thread::sleep(std::time::Duration::from_millis(200));
        let stream = if self.callback_count.load(Ordering::Relaxed) == 0 {
            drop(stream);
            if let Ok(mut buf) = self.buffer.lock() {
                buf.clear();
            }
            let native = self.build_native_stream()?;
            native.play().map_err(|e| HaloError::AudioDevice {
                message: format!("Failed to start native audio stream: {}", e),
            })?;
            native
        } else {
            stream
        };

        *guard = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut guard = self.stream.lock().map_err(|e| HaloError::AudioDevice {
            message: format!("Failed to lock stream: {}", e),
        })?;
        if let Some(stream) = guard.take() {
            stream.0.pause().map_err(|e| HaloError::AudioDevice {
                message: format!("Failed to stop audio stream: {}", e),
            })?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let mut buffer = self.buffer.lock().map_err(|e| HaloError::AudioDevice {
            message: format!("Failed to lock audio buffer: {}", e),
        })?;
        Ok(std::mem::take(&mut *buffer))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
