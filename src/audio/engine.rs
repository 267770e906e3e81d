//! The seam between the session controller and the audio hardware.

use tokio::sync::mpsc;

use super::pcm::EncodedFrame;
use crate::error::Result;

/// Audio capture and scheduled playback for one live session.
///
/// Implementations own their device handles; `stop` must release all of
/// them and be safe to call repeatedly.
pub trait AudioEngine: Send {
    /// Open the output device and start rendering the schedule. No-op if
    /// playback is already running.
    fn start_playback(&mut self) -> Result<()>;

    /// Open the microphone and start sending encoded frames, in capture
    /// order, to `frame_tx`. Fails with `BridgeError::Permission` when the
    /// microphone cannot be opened.
    fn start_capture(&mut self, frame_tx: mpsc::Sender<EncodedFrame>) -> Result<()>;

    /// Schedule decoded output samples after everything already queued.
    fn enqueue(&mut self, samples: Vec<f32>) -> Result<()>;

    /// Silence and discard everything scheduled but not yet played. Must
    /// take effect even when the segment queue is full.
    fn interrupt(&mut self);

    /// Stop capture and playback and release the devices.
    fn stop(&mut self);

    fn is_capturing(&self) -> bool;

    fn is_playing(&self) -> bool;
}
