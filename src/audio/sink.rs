use crate::error::{HaloError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Trait for audio output devices.
///
/// The playback worker waits for room in [`AudioSink::wait_ready`], outside
/// the lock a cancellation takes, and then writes. `write` should not block
/// for long, since a barge-in waits for the write in progress.
pub trait AudioSink: Send {
    /// Rate the sink expects in `write`.
    fn sample_rate(&self) -> u32;

    /// Block until the device can take another block.
    fn wait_ready(&mut self) -> Result<()> {
        Ok(())
    }

    /// Queue one block of mono PCM for output.
    fn write(&mut self, samples: &[i16]) -> Result<()>;

    /// Drop anything queued but not yet audible.
    fn stop(&mut self) -> Result<()>;

    /// Block until queued audio has been played.
    fn drain(&mut self) -> Result<()> {
        Ok(())
    }
}

impl AudioSink for Box<dyn AudioSink> {
    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn wait_ready(&mut self) -> Result<()> {
        (**self).wait_ready()
    }

    fn write(&mut self, samples: &[i16]) -> Result<()> {
        (**self).write(samples)
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn drain(&mut self) -> Result<()> {
        (**self).drain()
    }
}

/// Recording sink for tests.
///
/// Clones share the recorded blocks, so a test keeps one copy while the
/// playback worker owns another.
#[derive(Debug, Clone)]
pub struct MockAudioSink {
    sample_rate: u32,
    blocks: Arc<Mutex<Vec<Vec<i16>>>>,
    stops: Arc<AtomicUsize>,
    fail_after: Option<usize>,
    write_delay: Option<std::time::Duration>,
    ready_delay: Option<std::time::Duration>,
}

impl MockAudioSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            blocks: Arc::new(Mutex::new(Vec::new())),
            stops: Arc::new(AtomicUsize::new(0)),
            fail_after: None,
            write_delay: None,
            ready_delay: None,
        }
    }

    /// Fail every write once this many blocks have been accepted.
    pub fn with_failure_after(mut self, blocks: usize) -> Self {
        self.fail_after = Some(blocks);
        self
    }

    /// Sleep in each write, standing in for a device that paces output.
    pub fn with_write_delay(mut self, delay: std::time::Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    /// Sleep before each block in `wait_ready`, like a full device buffer.
    pub fn with_ready_delay(mut self, delay: std::time::Duration) -> Self {
        self.ready_delay = Some(delay);
        self
    }

    pub fn blocks(&self) -> Vec<Vec<i16>> {
        self.blocks.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn samples(&self) -> Vec<i16> {
        self.blocks().concat()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl AudioSink for MockAudioSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn wait_ready(&mut self) -> Result<()> {
        if let Some(delay) = self.ready_delay {
            std::thread::sleep(delay);
        }
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<()> {
        if let Some(delay) = self.write_delay {
            std::thread::sleep(delay);
        }
        let mut blocks = self.blocks.lock().map_err(|e| HaloError::AudioDevice {
            message: format!("Failed to lock mock sink: {}", e),
        })?;
        if self.fail_after.is_some_and(|limit| blocks.len() >= limit) {
            return Err(HaloError::AudioDevice {
                message: "mock sink failure".to_string(),
            });
        }
        blocks.push(samples.to_vec());
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_sink_records_blocks_in_order() {
        let sink = MockAudioSink::new(16000);
        let mut writer = sink.clone();

        writer.write(&[1, 2]).unwrap();
        writer.write(&[3]).unwrap();

        assert_eq!(sink.blocks(), vec![vec![1, 2], vec![3]]);
        assert_eq!(sink.samples(), vec![1, 2, 3]);
    }

    #[test]
    fn mock_sink_fails_after_limit() {
        let mut sink = MockAudioSink::new(16000).with_failure_after(1);
        sink.write(&[1]).unwrap();
        assert!(matches!(
            sink.write(&[2]),
            Err(HaloError::AudioDevice { .. })
        ));
    }

    #[test]
    fn mock_sink_counts_stops() {
        let mut sink = MockAudioSink::new(16000);
        sink.stop().unwrap();
        sink.stop().unwrap();
        assert_eq!(sink.stop_count(), 2);
    }
}
