//! Gapless playback scheduling.
//!
//! Time is measured in output frames. The output clock is owned by the
//! caller (the playback thread counts frames handed to the device) and is
//! passed in on every call.

use std::collections::VecDeque;

/// A decoded segment with a fixed start offset on the output timeline.
#[derive(Debug, Clone)]
pub struct ScheduledSegment {
    pub start: u64,
    samples: Vec<f32>,
}

impl ScheduledSegment {
    pub fn duration(&self) -> u64 {
        self.samples.len() as u64
    }

    pub fn end(&self) -> u64 {
        self.start + self.duration()
    }
}

/// Queue of non-overlapping segments, each starting at or after the end of
/// the previous one.
#[derive(Debug)]
pub struct PlaybackScheduler {
    sample_rate: u32,
    next_start: u64,
    queue: VecDeque<ScheduledSegment>,
}

impl PlaybackScheduler {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            next_start: 0,
            queue: VecDeque::new(),
        }
    }

    /// Schedule a segment at `max(next_start, now)` and advance `next_start`
    /// by its duration. Returns the start frame.
    pub fn schedule(&mut self, samples: Vec<f32>, now: u64) -> u64 {
        let start = self.next_start.max(now);
        let segment = ScheduledSegment { start, samples };
        self.next_start = segment.end();
        self.queue.push_back(segment);
        start
    }

    /// Drop every segment that has not finished playing and reset the
    /// scheduling clock to zero. Returns the number of discarded segments.
    pub fn interrupt(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        self.next_start = 0;
        dropped
    }

    /// Fill `out` with the audio covering `[now, now + out.len())`.
    ///
    /// Frames not covered by any segment are silence. Segments that end
    /// inside the window are released.
    pub fn render(&mut self, now: u64, out: &mut [f32]) {
        out.fill(0.0);
        let window_end = now + out.len() as u64;

        for segment in &self.queue {
            if segment.start >= window_end {
                break;
            }
            if segment.end() <= now {
                continue;
            }
            let from = segment.start.max(now);
            let to = segment.end().min(window_end);
            let src = (from - segment.start) as usize..(to - segment.start) as usize;
            let dst = (from - now) as usize..(to - now) as usize;
            out[dst].copy_from_slice(&segment.samples[src]);
        }

        while self
            .queue
            .front()
            .is_some_and(|segment| segment.end() <= window_end)
        {
            self.queue.pop_front();
        }
    }

    /// Start frame the next segment would get if nothing else is playing.
    pub fn next_start(&self) -> u64 {
        self.next_start
    }

    pub fn next_start_secs(&self) -> f64 {
        self.next_start() as f64 / self.sample_rate as f64
    }

    /// Segments scheduled but not yet fully rendered.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }
}
