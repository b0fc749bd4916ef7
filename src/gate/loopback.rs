//! Timeline of recently played synthesizer audio.

use crate::audio::Clock;
use crate::audio::frame::samples_to_duration;
use std::collections::VecDeque;
use std::ops::Range;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A copied-out slice of the loopback timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Requested window; positions without played audio are zero.
    pub samples: Vec<i16>,
    /// Positions of `samples` backed by played audio.
    pub covered: Range<usize>,
}

impl Snapshot {
    fn empty(len: usize) -> Self {
        Self {
            samples: vec![0; len],
            covered: 0..0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.covered.is_empty()
    }

    /// Number of covered positions inside `range`.
    pub fn coverage(&self, range: Range<usize>) -> usize {
        let start = range.start.max(self.covered.start);
        let end = range.end.min(self.covered.end);
        end.saturating_sub(start)
    }
}

#[derive(Debug, Default)]
struct Timeline {
    /// Playback time of `samples[0]`.
    start: Option<Instant>,
    samples: VecDeque<i16>,
}

/// Played PCM with playback timestamps, written by the playback worker and
/// read by the correlation gate.
///
/// Appended chunks form one contiguous timeline; a gap between chunks is
/// recorded as silence. Samples older than the retention horizon are evicted on
/// every append and read, and the timeline never grows beyond twice the
/// horizon. Reads copy out only the requested window, so the lock is held for
/// O(window) work.
pub struct LoopbackBuffer {
    inner: Mutex<Timeline>,
    sample_rate: u32,
    retention: Duration,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl LoopbackBuffer {
    pub fn new(sample_rate: u32, retention: Duration, clock: Arc<dyn Clock>) -> Self {
        let retention_samples = duration_to_samples(retention, sample_rate);
        Self {
            inner: Mutex::new(Timeline::default()),
            sample_rate,
            retention,
            capacity: retention_samples.saturating_mul(2).max(1),
            clock,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Record `samples` as played starting at `played_at`.
    pub fn append(&self, played_at: Instant, samples: &[i16]) {
        if samples.is_empty() {
            return;
        }
        let now = self.clock.now();
        let mut timeline = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.evict(&mut timeline, now);

        match timeline.start {
            Some(start) if !timeline.samples.is_empty() => {
                let end = start + samples_to_duration(timeline.samples.len(), self.sample_rate);
                if played_at > end {
                    let gap = duration_to_samples(played_at - end, self.sample_rate);
                    if gap >= self.capacity {
                        timeline.samples.clear();
                        timeline.start = Some(played_at);
                    } else {
                        timeline.samples.extend(std::iter::repeat_n(0, gap));
                    }
                }
                // Chunks that overlap the tail continue it; playback is sequential.
            }
            _ => {
                timeline.samples.clear();
                timeline.start = Some(played_at);
            }
        }
        timeline.samples.extend(samples.iter().copied());

        let overflow = timeline.samples.len().saturating_sub(self.capacity);
        if overflow > 0 {
            self.drop_front(&mut timeline, overflow);
        }
    }

    /// Copy out `len` samples starting at playback time `from`.
    pub fn snapshot(&self, from: Instant, len: usize) -> Snapshot {
        let now = self.clock.now();
        let mut timeline = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.evict(&mut timeline, now);

        let Some(start) = timeline.start else {
            return Snapshot::empty(len);
        };
        if timeline.samples.is_empty() {
            return Snapshot::empty(len);
        }

        let offset = signed_samples(from, start, self.sample_rate);
        let available = timeline.samples.len() as i64;
        let first = offset.clamp(0, available);
        let last = (offset + len as i64).clamp(0, available);
        if first >= last {
            return Snapshot::empty(len);
        }

        let mut samples = vec![0; len];
        let covered_start = (first - offset) as usize;
        let covered_end = (last - offset) as usize;
        for (slot, &sample) in samples[covered_start..covered_end]
            .iter_mut()
            .zip(timeline.samples.range(first as usize..last as usize))
        {
            *slot = sample;
        }

        Snapshot {
            samples,
            covered: covered_start..covered_end,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|t| t.samples.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Playback time of the oldest retained sample.
    pub fn oldest(&self) -> Option<Instant> {
        self.inner.lock().ok().and_then(|t| t.start)
    }

    pub fn clear(&self) {
        if let Ok(mut timeline) = self.inner.lock() {
            timeline.samples.clear();
            timeline.start = None;
        }
    }

    fn evict(&self, timeline: &mut Timeline, now: Instant) {
        let (Some(start), Some(cutoff)) = (timeline.start, now.checked_sub(self.retention)) else {
            return;
        };
        if start >= cutoff {
            return;
        }
        let stale = duration_to_samples(cutoff - start, self.sample_rate);
        self.drop_front(timeline, stale);
    }

    fn drop_front(&self, timeline: &mut Timeline, count: usize) {
        let count = count.min(timeline.samples.len());
        timeline.samples.drain(..count);
        if timeline.samples.is_empty() {
            timeline.start = None;
        } else if let Some(start) = timeline.start {
            timeline.start = Some(start + samples_to_duration(count, self.sample_rate));
        }
    }
}

fn duration_to_samples(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_nanos() * sample_rate as u128 / 1_000_000_000) as usize
}

/// Signed sample distance from `origin` to `at`, rounded to the nearest sample.
fn signed_samples(at: Instant, origin: Instant, sample_rate: u32) -> i64 {
    let to_samples = |d: Duration| ((d.as_nanos() * sample_rate as u128 + 500_000_000) / 1_000_000_000) as i64;
    if at >= origin {
        to_samples(at - origin)
    } else {
        -to_samples(origin - at)
    }
}
