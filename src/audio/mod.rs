//! Audio output abstraction and the single-buffer playback session.
//!
//! The backend traits mirror what the session needs from an audio platform:
//! a context owning one gain stage wired to the output, decoding of an
//! encoded asset into PCM, and voices (playing sources) that can be stopped.
//! Every voice a context starts is routed through its gain.

mod session;

#[cfg(feature = "playback")]
mod rodio_backend;

#[cfg(test)]
pub(crate) mod fake;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

pub use session::{AudioSession, AudioSources, DEFAULT_VOLUME};

#[cfg(feature = "playback")]
pub use rodio_backend::{RodioBackend, RodioContext, RodioVoice};

/// Fully decoded interleaved PCM, shared by every voice that plays it.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub channels: u16,
    pub sample_rate: u32,
    pub samples: Arc<[f32]>,
}

impl DecodedAudio {
    /// Number of sample frames (samples per channel).
    #[must_use]
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / usize::from(self.channels)
    }

    /// Playback length of one pass.
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        #[allow(clippy::cast_precision_loss)]
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate))
    }
}

/// Whether a voice repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayMode {
    /// Repeat the buffer end to start with no gap.
    Loop,
    /// Play the buffer once.
    Once,
}

/// Creates audio contexts.
pub trait AudioBackend {
    type Context: AudioContext;

    /// Opens the output and creates a context with a gain stage connected to it.
    ///
    /// # Errors
    ///
    /// Returns an error if no output device is available.
    fn create_context(&self) -> Result<Self::Context>;
}

/// One audio output with a single gain stage in front of it.
pub trait AudioContext {
    type Voice: Voice;

    /// Current gain applied to every voice.
    fn gain(&self) -> f32;

    /// Changes the gain; playing voices follow.
    fn set_gain(&mut self, value: f32);

    /// Returns true if the output is paused by the platform until resumed.
    fn is_suspended(&self) -> bool {
        false
    }

    /// Resumes a suspended output.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses.
    fn resume(&mut self) -> Result<()> {
        Ok(())
    }

    /// Decodes an encoded asset (MP3, WAV, ...) into PCM.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`](crate::Error::Decode) for unsupported or corrupt data.
    fn decode(&self, bytes: Bytes) -> Result<DecodedAudio>;

    /// Starts a voice for `audio` behind the gain, immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot accept a new voice.
    fn start(&mut self, audio: &DecodedAudio, mode: PlayMode) -> Result<Self::Voice>;
}

/// A playing source.
pub trait Voice {
    /// Stops playback.
    ///
    /// # Errors
    ///
    /// Returns an error if the voice was already stopped or is broken.
    fn stop(&mut self) -> Result<()>;

    /// Detaches the voice from the gain stage and releases it.
    ///
    /// # Errors
    ///
    /// Returns an error if the voice is already disconnected.
    fn disconnect(&mut self) -> Result<()>;

    /// Returns true once a one-shot voice has played to the end.
    fn is_finished(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_and_duration() {
        let audio = DecodedAudio {
            channels: 2,
            sample_rate: 4,
            samples: vec![0.0; 16].into(),
        };
        assert_eq!(audio.frames(), 8);
        assert_eq!(audio.duration(), Duration::from_secs(2));
    }

    #[test]
    fn degenerate_audio_has_no_length() {
        let audio = DecodedAudio {
            channels: 0,
            sample_rate: 0,
            samples: Vec::new().into(),
        };
        assert_eq!(audio.frames(), 0);
        assert_eq!(audio.duration(), Duration::ZERO);
    }
}
