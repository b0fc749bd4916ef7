//! Speaker output using CPAL.

use crate::audio::capture::{Direction, SendableStream, open_device};
use crate::audio::sink::AudioSink;
use crate::error::{HaloError, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Speaker sink fed from a bounded sample queue.
///
/// The device callback pops mono samples and copies them to every channel.
/// `wait_ready` blocks while more than `max_buffered` samples are waiting,
/// which paces the playback worker at real time; `write` only appends.
pub struct CpalAudioSink {
    _stream: SendableStream,
    queue: Arc<Mutex<VecDeque<i16>>>,
    sample_rate: u32,
    max_buffered: usize,
}

impl CpalAudioSink {
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        use cpal::SampleFormat;

        let device = open_device(Direction::Output, device_name)?;
        let default_config =
            device
                .default_output_config()
                .map_err(|e| HaloError::AudioDevice {
                    message: format!("Failed to query default output config: {}", e),
                })?;
        let sample_rate = default_config.sample_rate().0;
        let channels = default_config.channels().max(1) as usize;
        let stream_config: cpal::StreamConfig = default_config.clone().into();
        let queue = Arc::new(Mutex::new(VecDeque::<i16>::new()));

        let err_callback = |err| tracing::error!(error = %err, "audio output stream error");
        let stream = match default_config.sample_format() {
            SampleFormat::I16 => {
                let queue = Arc::clone(&queue);
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        fill(data, channels, &queue, |s| s)
                    },
                    err_callback,
                    None,
                )
            }
            SampleFormat::F32 => {
                let queue = Arc::clone(&queue);
                device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        fill(data, channels, &queue, |s| s as f32 / i16::MAX as f32)
                    },
                    err_callback,
                    None,
                )
            }
            fmt => {
                return Err(HaloError::AudioDevice {
                    message: format!("Unsupported output sample format: {:?}", fmt),
                });
            }
        }
        .map_err(|e| HaloError::AudioDevice {
            message: format!("Failed to build output stream: {}", e),
        })?;

        stream.play().map_err(|e| HaloError::AudioDevice {
            message: format!("Failed to start output stream: {}", e),
        })?;

        tracing::info!(sample_rate, channels, "speaker output ready");

        Ok(Self {
            _stream: SendableStream(stream),
            queue,
            sample_rate,
            // ~100ms of lookahead
            max_buffered: (sample_rate / 10) as usize,
        })
    }

    fn queued(&self) -> Result<usize> {
        self.queue
            .lock()
            .map(|q| q.len())
            .map_err(|e| HaloError::AudioDevice {
                message: format!("Failed to lock output queue: {}", e),
            })
    }
}

fn fill<T: Copy + Default>(
    data: &mut [T],
    channels: usize,
    queue: &Mutex<VecDeque<i16>>,
    convert: impl Fn(i16) -> T,
) {
    let Ok(mut queue) = queue.lock() else {
        data.fill(T::default());
        return;
    };
    for frame in data.chunks_mut(channels) {
        let value = queue.pop_front().map(&convert).unwrap_or_default();
        frame.fill(value);
    }
}

impl AudioSink for CpalAudioSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn wait_ready(&mut self) -> Result<()> {
        while self.queued()? > self.max_buffered {
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<()> {
        let mut queue = self.queue.lock().map_err(|e| HaloError::AudioDevice {
            message: format!("Failed to lock output queue: {}", e),
        })?;
        queue.extend(samples.iter().copied());
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut queue = self.queue.lock().map_err(|e| HaloError::AudioDevice {
            message: format!("Failed to lock output queue: {}", e),
        })?;
        queue.clear();
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        while self.queued()? > 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}
