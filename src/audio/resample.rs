//! Sample-rate conversion between the session rates and whatever rate the
//! ALSA device actually negotiated.

use rubato::{FftFixedIn, Resampler};

use crate::error::{BridgeError, Result};

const CHUNK: usize = 1024;
const SUB_CHUNKS: usize = 2;

fn new_resampler(from_rate: u32, to_rate: u32) -> Result<FftFixedIn<f32>> {
    FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK, SUB_CHUNKS, 1)
        .map_err(|e| BridgeError::Audio(format!("resampler init failed: {}", e)))
}

fn resample_failed(e: rubato::ResampleError) -> BridgeError {
    BridgeError::Audio(format!("resample failed: {}", e))
}

/// Number of output frames `len` input frames map to.
pub fn output_len(len: usize, from_rate: u32, to_rate: u32) -> usize {
    (len as u64 * to_rate as u64).div_ceil(from_rate as u64) as usize
}

/// Resample one complete mono segment.
///
/// The output is aligned with the input (resampler delay removed) and has
/// exactly `output_len(samples.len(), from_rate, to_rate)` frames.
pub fn resample_segment(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = new_resampler(from_rate, to_rate)?;
    let delay = resampler.output_delay();
    let expected = output_len(samples.len(), from_rate, to_rate);
    let mut output = Vec::with_capacity(delay + expected + CHUNK);

    let mut chunks = samples.chunks_exact(CHUNK);
    for chunk in &mut chunks {
        let out = resampler.process(&[chunk], None).map_err(resample_failed)?;
        output.extend_from_slice(&out[0]);
    }
    let rest = chunks.remainder();
    if !rest.is_empty() {
        let tail: [&[f32]; 1] = [rest];
        let out = resampler
            .process_partial(Some(&tail[..]), None)
            .map_err(resample_failed)?;
        output.extend_from_slice(&out[0]);
    }
    // 把延迟中的尾部数据冲出来
    while output.len() < delay + expected {
        let out = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(resample_failed)?;
        if out[0].is_empty() {
            break;
        }
        output.extend_from_slice(&out[0]);
    }

    output.drain(..delay.min(output.len()));
    output.resize(expected, 0.0);
    Ok(output)
}

/// Resampler for a continuous mono stream fed in arbitrary pieces.
///
/// Input that does not fill a resampler chunk is held until the next call.
/// Equal rates pass through untouched.
pub struct StreamResampler {
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let inner = if from_rate == to_rate {
            None
        } else {
            Some(new_resampler(from_rate, to_rate)?)
        };
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Feed `input` and append every finished output frame to `out`.
    pub fn process_into(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<()> {
        let Some(resampler) = self.inner.as_mut() else {
            out.extend_from_slice(input);
            return Ok(());
        };

        self.pending.extend_from_slice(input);
        let mut consumed = 0;
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() - consumed < needed {
                break;
            }
            let chunk = &self.pending[consumed..consumed + needed];
            let result = resampler.process(&[chunk], None).map_err(resample_failed)?;
            out.extend_from_slice(&result[0]);
            consumed += needed;
        }
        self.pending.drain(..consumed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(len: usize, freq: f32, rate: u32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn equal_rates_pass_through() {
        let input = sine(1000, 440.0, 24000);
        assert_eq!(resample_segment(&input, 24000, 24000).unwrap(), input);

        let mut stream = StreamResampler::new(16000, 16000).unwrap();
        assert!(stream.is_passthrough());
        let mut out = Vec::new();
        stream.process_into(&input[..10], &mut out).unwrap();
        assert_eq!(out, input[..10]);
    }

    #[test]
    fn segment_keeps_its_duration_on_a_faster_device() {
        // one second of 24 kHz output on a device that negotiated 48 kHz
        let input = vec![0.25f32; 24000];
        let output = resample_segment(&input, 24000, 48000).unwrap();
        assert_eq!(output.len(), 48000);

        // steady signal survives away from the edges
        for &s in &output[4000..44000] {
            assert!((s - 0.25).abs() < 0.02, "sample {}", s);
        }
    }

    #[test]
    fn short_segment_is_not_lost() {
        let output = resample_segment(&[0.1; 300], 24000, 44100).unwrap();
        assert_eq!(output.len(), output_len(300, 24000, 44100));
    }

    #[test]
    fn stream_converts_device_rate_to_session_rate() {
        // microphone opened at 48 kHz, session expects 16 kHz
        let input = sine(48000, 300.0, 48000);
        let mut stream = StreamResampler::new(48000, 16000).unwrap();
        assert!(!stream.is_passthrough());

        let mut out = Vec::new();
        // irregular ALSA period sizes
        for piece in input.chunks(941) {
            stream.process_into(piece, &mut out).unwrap();
        }
        assert!(out.len() <= 16000);
        assert!(out.len() > 15000, "only {} samples", out.len());
    }
}
