use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use anyhow::Result;

use super::alsa_device;
use super::audio_system::AudioConfig;
use super::pcm::{self, EncodedFrame};
use super::resample::StreamResampler;

/// Turns interleaved device periods into fixed-size mono chunks at the
/// session input rate.
///
/// Channels are averaged to mono, then resampled from the device rate.
/// Leftover samples carry over to the next period.
pub struct Chunker {
    channels: usize,
    chunk_size: usize,
    resampler: StreamResampler,
    mono: Vec<f32>,
    accum: Vec<f32>,
}

impl Chunker {
    pub fn new(
        channels: usize,
        device_rate: u32,
        session_rate: u32,
        chunk_size: usize,
    ) -> crate::error::Result<Self> {
        Ok(Self {
            channels: channels.max(1),
            chunk_size: chunk_size.max(1),
            resampler: StreamResampler::new(device_rate, session_rate)?,
            mono: Vec::new(),
            accum: Vec::with_capacity(chunk_size * 2),
        })
    }

    /// Feed one period; returns every chunk it completed, oldest first.
    pub fn push(&mut self, interleaved: &[f32]) -> crate::error::Result<Vec<Vec<f32>>> {
        self.mono.clear();
        if self.channels == 1 {
            self.mono.extend_from_slice(interleaved);
        } else {
            let channels = self.channels;
            self.mono.extend(
                interleaved
                    .chunks_exact(channels)
                    .map(|f| f.iter().sum::<f32>() / channels as f32),
            );
        }
        self.resampler.process_into(&self.mono, &mut self.accum)?;

        let mut chunks = Vec::new();
        while self.accum.len() >= self.chunk_size {
            chunks.push(self.accum.drain(..self.chunk_size).collect());
        }
        Ok(chunks)
    }

    /// Samples waiting for the next chunk.
    pub fn buffered(&self) -> usize {
        self.accum.len()
    }
}

/// Capture loop: ALSA float frames → fixed-size chunks → encoded frames.
///
/// `ready` receives the outcome of opening the device before any audio is
/// read, so the caller can tell a missing microphone from a later failure.
pub fn capture_thread(
    config: &AudioConfig,
    frame_tx: mpsc::Sender<EncodedFrame>,
    running: &AtomicBool,
    ready: SyncSender<std::result::Result<(), String>>,
) -> Result<()> {
    // 1. Open ALSA capture device (mono, float)
    let opened = alsa_device::open_capture(
        &config.capture_device,
        config.input_sample_rate,
        1,
        Some(config.chunk_size),
    )
    .and_then(|(pcm, params)| {
        let chunker = Chunker::new(
            params.channels as usize,
            params.sample_rate,
            config.input_sample_rate,
            config.chunk_size,
        )?;
        Ok((pcm, params, chunker))
    });
    let (pcm, params, mut chunker) = match opened {
        Ok(opened) => {
            let _ = ready.send(Ok(()));
            opened
        }
        Err(e) => {
            let _ = ready.send(Err(format!("{:#}", e)));
            return Err(e);
        }
    };

    let actual_channels = params.channels.max(1) as usize;
    let io = pcm.io_f32()?;

    // ALSA read buffer (interleaved f32, one period)
    let mut read_buf = vec![0f32; params.period_size.max(1) * actual_channels];

    log::info!(
        "Capture started: rate={}, ch={}, period={}, chunk={}, resampling={}",
        params.sample_rate,
        actual_channels,
        params.period_size,
        config.chunk_size,
        !chunker.resampler.is_passthrough(),
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                for chunk in chunker.push(&read_buf[..frames * actual_channels])? {
                    let frame = pcm::encode_frame(&chunk, config.input_sample_rate);
                    if !forward_frame(&frame_tx, frame, running) {
                        log::info!("Capture stopped while forwarding a frame");
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("Capture stopped ({} samples unsent)", chunker.buffered());
    Ok(())
}

// 通道满时等待而不是阻塞，停止时主循环可能不再读取
fn forward_frame(
    frame_tx: &mpsc::Sender<EncodedFrame>,
    mut frame: EncodedFrame,
    running: &AtomicBool,
) -> bool {
    loop {
        match frame_tx.try_send(frame) {
            Ok(()) => return true,
            Err(TrySendError::Full(f)) => {
                if !running.load(Ordering::Relaxed) {
                    return false;
                }
                frame = f;
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(TrySendError::Closed(_)) => {
                log::warn!("Failed to send captured frame, receiver dropped");
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_is_averaged_to_mono() {
        let mut chunker = Chunker::new(2, 16000, 16000, 3).unwrap();
        let chunks = chunker.push(&[0.2, 0.4, -1.0, 0.0, 0.5, 0.5]).unwrap();
        assert_eq!(chunks.len(), 1);
        let expected = [0.3, -0.5, 0.5];
        for (got, want) in chunks[0].iter().zip(expected) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn partial_period_carries_over() {
        let mut chunker = Chunker::new(1, 16000, 16000, 4).unwrap();
        assert!(chunker.push(&[1.0, 2.0, 3.0]).unwrap().is_empty());
        assert_eq!(chunker.buffered(), 3);

        let chunks = chunker.push(&[4.0, 5.0]).unwrap();
        assert_eq!(chunks, vec![vec![1.0, 2.0, 3.0, 4.0]]);
        assert_eq!(chunker.buffered(), 1);
    }

    #[test]
    fn one_period_can_complete_several_chunks_in_order() {
        let mut chunker = Chunker::new(1, 16000, 16000, 2).unwrap();
        let period: Vec<f32> = (0..7).map(|i| i as f32).collect();
        let chunks = chunker.push(&period).unwrap();
        assert_eq!(
            chunks,
            vec![vec![0.0, 1.0], vec![2.0, 3.0], vec![4.0, 5.0]]
        );

        let chunks = chunker.push(&[7.0]).unwrap();
        assert_eq!(chunks, vec![vec![6.0, 7.0]]);
    }

    #[test]
    fn device_rate_is_converted_to_session_rate() {
        // device negotiated 48 kHz stereo instead of 16 kHz mono
        let mut chunker = Chunker::new(2, 48000, 16000, 1600).unwrap();
        let period = vec![0.1f32; 960 * 2];
        let mut chunks = Vec::new();
        for _ in 0..50 {
            chunks.extend(chunker.push(&period).unwrap());
        }
        // one second at 48 kHz, about 16000 samples at the session rate
        let total: usize = chunks.iter().map(Vec::len).sum::<usize>() + chunker.buffered();
        assert!(total > 15000 && total <= 16000, "total {}", total);
        assert!(chunks.iter().all(|c| c.len() == 1600));
    }
}
