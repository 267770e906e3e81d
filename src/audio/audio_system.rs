//! The AudioSystem that manages the capture and playback threads.
//!
//! Uses std::thread (NOT tokio tasks) for real-time audio I/O to avoid
//! contention with async network tasks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;

use super::capture::capture_thread;
use super::engine::AudioEngine;
use super::pcm::EncodedFrame;
use super::playback::{playback_thread, PlaybackSegment};
use crate::error::{BridgeError, Result};

/// How long to wait for a device to open before giving up.
const DEVICE_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Segments waiting for the playback thread.
const PLAYBACK_QUEUE_DEPTH: usize = 256;

/// Audio system configuration.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// ALSA capture device name (e.g. "default", "plughw:0,0")
    pub capture_device: String,
    /// ALSA playback device name
    pub playback_device: String,
    /// Microphone sample rate sent to the session (16000)
    pub input_sample_rate: u32,
    /// Sample rate of the session's audio output (24000)
    pub output_sample_rate: u32,
    /// Samples per encoded capture frame (4096)
    pub chunk_size: usize,
    /// Desired ALSA playback period size (0 = let ALSA decide)
    pub playback_period_size: usize,
}

struct Worker {
    name: String,
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Why a device thread could not be started.
struct SpawnFailure {
    message: String,
    /// Thread still stuck opening its device; must be joined later
    stalled: Option<Worker>,
}

impl SpawnFailure {
    fn new(message: String) -> Self {
        Self {
            message,
            stalled: None,
        }
    }
}

impl Worker {
    /// Spawn a device thread and wait until it reports whether its device
    /// opened.
    fn spawn<F>(name: &str, timeout: Duration, body: F) -> std::result::Result<Self, SpawnFailure>
    where
        F: FnOnce(&AtomicBool, SyncSender<std::result::Result<(), String>>) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);

        let handle = {
            let running = running.clone();
            thread::Builder::new()
                .name(name.into())
                .spawn(move || body(&*running, ready_tx))
                .map_err(|e| SpawnFailure::new(format!("failed to spawn {}: {}", name, e)))?
        };

        let worker = Self {
            name: name.to_string(),
            running,
            handle,
        };
        match ready_rx.recv_timeout(timeout) {
            Ok(Ok(())) => Ok(worker),
            Ok(Err(e)) => {
                worker.stop();
                Err(SpawnFailure::new(e))
            }
            Err(RecvTimeoutError::Timeout) => {
                // 设备调用仍在阻塞，线程返回后再回收
                worker.running.store(false, Ordering::SeqCst);
                Err(SpawnFailure {
                    message: format!("{} device did not open within {:?}", name, timeout),
                    stalled: Some(worker),
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                worker.stop();
                Err(SpawnFailure::new(format!(
                    "{} thread exited before opening its device",
                    name
                )))
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        if self.handle.join().is_err() {
            log::error!("{} thread panicked", self.name);
        }
    }
}

struct PlaybackWorker {
    worker: Worker,
    tx: mpsc::Sender<PlaybackSegment>,
}

/// The audio system manages capture and playback in dedicated OS threads.
///
/// - Capture thread: ALSA capture → chunk → PCM16/base64 encode → `frame_tx`
/// - Playback thread: `PlaybackSegment`s → scheduler → ALSA playback
///
/// Interrupts bump `flush_epoch`; the playback thread flushes when it sees
/// a new value and discards segments tagged with an older one.
pub struct AudioSystem {
    config: AudioConfig,
    capture: Option<Worker>,
    playback: Option<PlaybackWorker>,
    flush_epoch: Arc<AtomicU64>,
    stalled: Vec<Worker>,
}

impl AudioSystem {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            capture: None,
            playback: None,
            flush_epoch: Arc::new(AtomicU64::new(0)),
            stalled: Vec::new(),
        }
    }

    fn keep_stalled(&mut self, failure: SpawnFailure) -> String {
        if let Some(worker) = failure.stalled {
            log::warn!("{} thread is stuck opening its device, will join it later", worker.name);
            self.stalled.push(worker);
        }
        failure.message
    }

    /// Join stalled device threads that have returned since.
    fn reap_stalled(&mut self) {
        let (finished, waiting): (Vec<_>, Vec<_>) =
            self.stalled.drain(..).partition(Worker::is_finished);
        for worker in finished {
            worker.stop();
        }
        if !waiting.is_empty() {
            log::warn!("{} device threads still stuck in open", waiting.len());
        }
        self.stalled = waiting;
    }
}

impl AudioEngine for AudioSystem {
    fn start_playback(&mut self) -> Result<()> {
        if self.playback.is_some() {
            return Ok(());
        }
        self.reap_stalled();
        let (tx, rx) = mpsc::channel(PLAYBACK_QUEUE_DEPTH);
        let config = self.config.clone();
        let flush_epoch = self.flush_epoch.clone();
        let spawned = Worker::spawn("audio-playback", DEVICE_OPEN_TIMEOUT, move |running, ready| {
            if let Err(e) = playback_thread(&config, rx, &flush_epoch, running, ready) {
                log::error!("Playback thread error: {:#}", e);
            }
        });
        let worker = match spawned {
            Ok(worker) => worker,
            Err(failure) => return Err(BridgeError::Audio(self.keep_stalled(failure))),
        };

        self.playback = Some(PlaybackWorker { worker, tx });
        Ok(())
    }

    fn start_capture(&mut self, frame_tx: mpsc::Sender<EncodedFrame>) -> Result<()> {
        if self.capture.is_some() {
            return Ok(());
        }
        self.reap_stalled();
        let config = self.config.clone();
        let spawned = Worker::spawn("audio-capture", DEVICE_OPEN_TIMEOUT, move |running, ready| {
            if let Err(e) = capture_thread(&config, frame_tx, running, ready) {
                log::error!("Capture thread error: {:#}", e);
            }
        });
        let worker = match spawned {
            Ok(worker) => worker,
            Err(failure) => return Err(BridgeError::Permission(self.keep_stalled(failure))),
        };

        self.capture = Some(worker);
        Ok(())
    }

    fn enqueue(&mut self, samples: Vec<f32>) -> Result<()> {
        let playback = self
            .playback
            .as_ref()
            .ok_or_else(|| BridgeError::Audio("playback not started".to_string()))?;
        let segment = PlaybackSegment {
            epoch: self.flush_epoch.load(Ordering::Acquire),
            samples,
        };
        playback
            .tx
            .try_send(segment)
            .map_err(|e| BridgeError::Audio(format!("playback queue: {}", e)))
    }

    fn interrupt(&mut self) {
        let epoch = self.flush_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        log::debug!("Interrupt epoch {}", epoch);
    }

    fn stop(&mut self) {
        if let Some(worker) = self.capture.take() {
            worker.stop();
        }
        if let Some(playback) = self.playback.take() {
            drop(playback.tx);
            playback.worker.stop();
        }
        self.reap_stalled();
    }

    fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    fn is_playing(&self) -> bool {
        self.playback.is_some()
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(500);

    fn test_config() -> AudioConfig {
        AudioConfig {
            capture_device: "nonexistent-capture".to_string(),
            playback_device: "nonexistent-playback".to_string(),
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            chunk_size: 4096,
            playback_period_size: 1024,
        }
    }

    fn idle_worker(name: &str) -> Worker {
        Worker::spawn(name, SHORT, |running, ready| {
            let _ = ready.send(Ok(()));
            while running.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(1));
            }
        })
        .ok()
        .unwrap()
    }

    #[test]
    fn worker_reports_open_failure() {
        let failure = Worker::spawn("test-fail", SHORT, |_running, ready| {
            let _ = ready.send(Err("no such device".to_string()));
        })
        .err()
        .unwrap();
        assert_eq!(failure.message, "no such device");
        assert!(failure.stalled.is_none());
    }

    #[test]
    fn worker_runs_until_stopped() {
        let worker = idle_worker("test-loop");
        assert!(!worker.is_finished());
        worker.stop();
    }

    #[test]
    fn worker_exiting_early_is_an_error() {
        let failure = Worker::spawn("test-exit", SHORT, |_running, _ready| {})
            .err()
            .unwrap();
        assert!(failure.message.contains("exited"));
    }

    #[test]
    fn stalled_open_is_kept_and_joined_later() {
        let mut system = AudioSystem::new(test_config());
        let failure = Worker::spawn("test-slow", Duration::from_millis(20), |_running, ready| {
            thread::sleep(Duration::from_millis(100));
            let _ = ready.send(Ok(()));
        })
        .err()
        .unwrap();
        assert!(failure.message.contains("did not open"));

        let message = system.keep_stalled(failure);
        assert!(message.contains("test-slow"));
        assert_eq!(system.stalled.len(), 1);
        assert!(!system.stalled[0].running.load(Ordering::SeqCst));

        while !system.stalled[0].is_finished() {
            thread::sleep(Duration::from_millis(5));
        }
        system.stop();
        assert!(system.stalled.is_empty());
    }

    #[test]
    fn enqueue_before_playback_fails() {
        let mut system = AudioSystem::new(test_config());
        assert!(!system.is_playing());
        assert!(matches!(
            system.enqueue(vec![0.0; 4]),
            Err(BridgeError::Audio(_))
        ));
        system.stop();
        assert!(!system.is_capturing());
    }

    #[test]
    fn interrupt_is_not_lost_when_the_queue_is_full() {
        let mut system = AudioSystem::new(test_config());
        let (tx, mut rx) = mpsc::channel(1);
        system.playback = Some(PlaybackWorker {
            worker: idle_worker("test-playback"),
            tx,
        });

        system.enqueue(vec![0.1; 4]).unwrap();
        assert!(system.enqueue(vec![0.2; 4]).is_err());
        system.interrupt();
        system.interrupt();
        assert_eq!(system.flush_epoch.load(Ordering::SeqCst), 2);

        // the queued segment predates both interrupts
        assert_eq!(rx.try_recv().unwrap().epoch, 0);
        system.enqueue(vec![0.3; 4]).unwrap();
        assert_eq!(rx.try_recv().unwrap().epoch, 2);

        system.stop();
        assert!(!system.is_playing());
    }
}
