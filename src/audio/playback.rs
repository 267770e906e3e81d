use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::SyncSender;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use anyhow::Result;
use alsa::pcm::PCM;

use super::alsa_device;
use super::audio_system::AudioConfig;
use super::resample;
use super::scheduler::PlaybackScheduler;

/// Decoded mono samples at the session output rate, tagged with the
/// interrupt epoch current when they were queued.
#[derive(Debug)]
pub struct PlaybackSegment {
    pub epoch: u64,
    pub samples: Vec<f32>,
}

/// Tracks interrupt epochs seen by the playback thread.
///
/// Interrupts only bump a shared counter, so they are never lost to a
/// full segment queue. Segments queued before the latest interrupt are
/// stale and must not be scheduled.
#[derive(Debug, Default)]
pub struct EpochGate {
    seen: u64,
}

impl EpochGate {
    /// Returns true when `epoch` is newer than anything seen, i.e. the
    /// schedule has to be flushed before going on.
    pub fn advance(&mut self, epoch: u64) -> bool {
        if epoch > self.seen {
            self.seen = epoch;
            true
        } else {
            false
        }
    }

    pub fn is_stale(&self, segment_epoch: u64) -> bool {
        segment_epoch < self.seen
    }
}

// 清空调度队列并丢弃设备缓冲区中尚未播放的数据
fn flush(scheduler: &mut PlaybackScheduler, pcm: &PCM) -> Result<()> {
    let dropped = scheduler.interrupt();
    if let Err(e) = pcm.drop() {
        log::warn!("Failed to drop PCM playback buffer: {}", e);
    }
    pcm.prepare()?;
    log::info!("Playback interrupted, {} segments discarded", dropped);
    Ok(())
}

/// Playback loop: renders the schedule one period at a time.
///
/// The device is fed continuously (silence when nothing is scheduled), so
/// the number of frames written is the output clock.
pub fn playback_thread(
    config: &AudioConfig,
    mut segment_rx: mpsc::Receiver<PlaybackSegment>,
    flush_epoch: &AtomicU64,
    running: &AtomicBool,
    ready: SyncSender<std::result::Result<(), String>>,
) -> Result<()> {
    let period_size_opt = if config.playback_period_size > 0 {
        Some(config.playback_period_size)
    } else {
        None
    };
    let (pcm, params) = match alsa_device::open_playback(
        &config.playback_device,
        config.output_sample_rate,
        1,
        period_size_opt,
    ) {
        Ok(opened) => {
            let _ = ready.send(Ok(()));
            opened
        }
        Err(e) => {
            let _ = ready.send(Err(format!("{:#}", e)));
            return Err(e);
        }
    };

    let actual_rate = params.sample_rate;
    let actual_channels = params.channels.max(1) as usize;
    let period_size = params.period_size.max(1);

    let io = pcm.io_f32()?;

    let mut scheduler = PlaybackScheduler::new(actual_rate);
    let mut clock: u64 = 0;
    let mut mono = vec![0f32; period_size];
    let mut interleaved = vec![0f32; period_size * actual_channels];

    log::info!(
        "Playback started: rate={}, ch={}, period={}",
        actual_rate,
        actual_channels,
        period_size,
    );

    if actual_rate != config.output_sample_rate {
        log::info!(
            "Resampling output {}Hz -> {}Hz",
            config.output_sample_rate,
            actual_rate
        );
    }

    let mut gate = EpochGate::default();

    'outer: while running.load(Ordering::Relaxed) {
        if gate.advance(flush_epoch.load(Ordering::Acquire)) {
            if let Err(e) = flush(&mut scheduler, &pcm) {
                log::error!("Failed to re-prepare PCM playback: {:#}", e);
                break 'outer;
            }
        }

        loop {
            match segment_rx.try_recv() {
                Ok(segment) => {
                    if gate.is_stale(segment.epoch) {
                        log::debug!("Discarding segment queued before interrupt");
                        continue;
                    }
                    if gate.advance(segment.epoch) {
                        if let Err(e) = flush(&mut scheduler, &pcm) {
                            log::error!("Failed to re-prepare PCM playback: {:#}", e);
                            break 'outer;
                        }
                    }
                    let samples = match resample::resample_segment(
                        &segment.samples,
                        config.output_sample_rate,
                        actual_rate,
                    ) {
                        Ok(samples) => samples,
                        Err(e) => {
                            log::warn!("Dropping output segment: {}", e);
                            continue;
                        }
                    };
                    let len = samples.len();
                    let start = scheduler.schedule(samples, clock);
                    log::debug!(
                        "Segment scheduled: start={} len={} next={:.3}s pending={}",
                        start,
                        len,
                        scheduler.next_start_secs(),
                        scheduler.pending()
                    );
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    log::info!("Playback channel closed");
                    break 'outer;
                }
            }
        }

        let was_idle = scheduler.is_idle();
        scheduler.render(clock, &mut mono);
        if !was_idle && scheduler.is_idle() {
            log::debug!("Playback queue drained at frame {}", clock + period_size as u64);
        }
        if actual_channels == 1 {
            interleaved.copy_from_slice(&mono);
        } else {
            // mono → all channels
            for (frame, &sample) in interleaved.chunks_exact_mut(actual_channels).zip(&mono) {
                frame.fill(sample);
            }
        }

        // Short writes and XRUN recovery, bounded so a stuck device
        // cannot spin forever.
        let mut frames_written = 0;
        let mut retry_count = 0u32;
        while frames_written < period_size {
            let offset = frames_written * actual_channels;
            match io.writei(&interleaved[offset..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    if let Err(e2) = pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        break 'outer;
                    }
                    if retry_count >= 3 {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            period_size - frames_written
                        );
                        break;
                    }
                }
            }
        }

        clock += period_size as u64;
    }

    log::info!("Playback stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_queued_before_an_interrupt_are_stale() {
        let mut gate = EpochGate::default();
        assert!(!gate.advance(0));
        assert!(!gate.is_stale(0));

        // two interrupts while segments from epoch 0 are still queued
        assert!(gate.advance(2));
        assert!(gate.is_stale(0));
        assert!(gate.is_stale(1));
        assert!(!gate.is_stale(2));
        assert!(!gate.advance(2));
    }

    #[test]
    fn segment_from_a_newer_epoch_forces_a_flush_first() {
        let mut gate = EpochGate::default();
        // interrupt raced ahead of the per-period check
        assert!(!gate.is_stale(1));
        assert!(gate.advance(1));
        // the counter catching up later does not flush again
        assert!(!gate.advance(1));
    }

    #[test]
    fn session_audio_keeps_its_length_on_a_48k_device() {
        let mut scheduler = PlaybackScheduler::new(48000);
        let segment = resample::resample_segment(&vec![0.1; 24000], 24000, 48000).unwrap();
        scheduler.schedule(segment, 0);
        assert!((scheduler.next_start_secs() - 1.0).abs() < 1e-9);
    }
}
