//! audio - Microphone capture, PCM transport encoding and gapless playback
//!
//! Uses ALSA for audio I/O on dedicated threads. Captured float audio is
//! sent as base64 16-bit PCM; output segments are decoded and scheduled
//! back-to-back on the output timeline.

mod alsa_device;
mod audio_system;
mod capture;
mod engine;
pub mod pcm;
mod playback;
mod resample;
pub mod scheduler;

pub use audio_system::{AudioConfig, AudioSystem};
pub use engine::AudioEngine;
pub use pcm::EncodedFrame;
