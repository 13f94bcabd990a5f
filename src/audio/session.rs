//! The playback session: one context, one gain, one decoded buffer, and at
//! most one looping voice.

use crate::best_effort::BestEffort;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::prefs::{KeyValueStore, load_volume, save_volume};
use crate::request::{AssetRequest, Url};

use super::{AudioBackend, AudioContext, DecodedAudio, PlayMode, Voice};

/// Gain used when no volume has been persisted yet.
pub const DEFAULT_VOLUME: f32 = 0.9;

type VoiceOf<B> = <<B as AudioBackend>::Context as AudioContext>::Voice;

/// Where the alert sound is loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSources {
    pub primary: Url,
    pub fallback: Url,
}

/// Owns all audio state for one running app.
///
/// Nothing here is global: the controller owns the session and every
/// operation takes `&mut self`, so two mutations can never interleave.
pub struct AudioSession<B: AudioBackend, F: Fetcher, K: KeyValueStore> {
    backend: B,
    fetcher: F,
    prefs: K,
    sources: AudioSources,
    default_volume: f32,
    context: Option<B::Context>,
    buffer: Option<DecodedAudio>,
    loop_voice: Option<VoiceOf<B>>,
    one_shots: Vec<VoiceOf<B>>,
}

impl<B: AudioBackend, F: Fetcher, K: KeyValueStore> AudioSession<B, F, K> {
    /// Creates a session. No device is opened until first use.
    #[must_use]
    pub fn new(backend: B, fetcher: F, prefs: K, sources: AudioSources) -> Self {
        Self {
            backend,
            fetcher,
            prefs,
            sources,
            default_volume: DEFAULT_VOLUME,
            context: None,
            buffer: None,
            loop_voice: None,
            one_shots: Vec::new(),
        }
    }

    /// Sets the gain used when nothing is persisted.
    #[must_use]
    pub const fn with_default_volume(mut self, volume: f32) -> Self {
        self.default_volume = volume;
        self
    }

    #[must_use]
    pub const fn sources(&self) -> &AudioSources {
        &self.sources
    }

    #[must_use]
    pub const fn prefs(&self) -> &K {
        &self.prefs
    }

    #[must_use]
    pub const fn has_context(&self) -> bool {
        self.context.is_some()
    }

    #[must_use]
    pub const fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    /// The decoded alert, once loaded.
    #[must_use]
    pub const fn buffer(&self) -> Option<&DecodedAudio> {
        self.buffer.as_ref()
    }

    /// Returns true while a loop voice is active.
    #[must_use]
    pub const fn is_looping(&self) -> bool {
        self.loop_voice.is_some()
    }

    /// Current gain, or the persisted volume if no context exists yet.
    #[must_use]
    pub fn volume(&self) -> f32 {
        self.context.as_ref().map_or_else(
            || load_volume(&self.prefs, self.default_volume),
            |context| context.gain(),
        )
    }

    /// Creates the context and restores the persisted gain on first call.
    /// Later calls return the existing context.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot open an output.
    pub fn ensure_context(&mut self) -> Result<&mut B::Context> {
        if self.context.is_none() {
            let mut context = self.backend.create_context()?;
            let volume = load_volume(&self.prefs, self.default_volume);
            context.set_gain(volume);
            log::debug!("Audio context created (gain {volume})");
            self.context = Some(context);
        }
        self.context
            .as_mut()
            .ok_or_else(|| Error::AudioDevice("audio context unavailable".to_string()))
    }

    /// Resumes the context if the platform suspended it.
    ///
    /// # Errors
    ///
    /// Returns an error if the context cannot be created or resumed.
    pub fn resume(&mut self) -> Result<()> {
        let context = self.ensure_context()?;
        if context.is_suspended() {
            context.resume()?;
        }
        Ok(())
    }

    /// Returns the decoded alert, loading it on first use.
    ///
    /// Tries the primary URL, then the fallback. Only when both fail is an
    /// error returned; the buffer then stays unset so a later call retries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AudioUnavailable`] with both causes.
    pub async fn load_buffer(&mut self) -> Result<DecodedAudio> {
        if let Some(buffer) = &self.buffer {
            return Ok(buffer.clone());
        }
        self.ensure_context()?;

        let buffer = match self.fetch_decode(&self.sources.primary).await {
            Ok(buffer) => buffer,
            Err(primary) => {
                log::warn!("Primary audio {} failed: {primary}", self.sources.primary);
                match self.fetch_decode(&self.sources.fallback).await {
                    Ok(buffer) => buffer,
                    Err(fallback) => {
                        log::error!("Fallback audio {} failed: {fallback}", self.sources.fallback);
                        return Err(Error::AudioUnavailable {
                            primary: Box::new(primary),
                            fallback: Box::new(fallback),
                        });
                    }
                }
            }
        };

        log::info!(
            "Loaded alert: {} ch, {} Hz, {:.2}s",
            buffer.channels,
            buffer.sample_rate,
            buffer.duration().as_secs_f64()
        );
        self.buffer = Some(buffer.clone());
        Ok(buffer)
    }

    async fn fetch_decode(&self, url: &Url) -> Result<DecodedAudio> {
        let response = self.fetcher.fetch(&AssetRequest::get(url.clone())).await?;
        if !response.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: response.status,
            });
        }
        let context = self
            .context
            .as_ref()
            .ok_or_else(|| Error::AudioDevice("audio context unavailable".to_string()))?;
        context.decode(response.body)
    }

    /// Starts the gapless loop.
    ///
    /// Does nothing (returns `Ok(false)`) unless the context and buffer exist
    /// and no loop is already playing.
    ///
    /// # Errors
    ///
    /// Returns an error if the output refuses a new voice.
    pub fn start_loop(&mut self) -> Result<bool> {
        if self.loop_voice.is_some() {
            return Ok(false);
        }
        let (Some(context), Some(buffer)) = (self.context.as_mut(), self.buffer.as_ref()) else {
            return Ok(false);
        };
        let voice = context.start(buffer, PlayMode::Loop)?;
        self.loop_voice = Some(voice);
        log::info!("Loop started");
        Ok(true)
    }

    /// Stops and releases the loop voice if one is playing.
    ///
    /// Stop and disconnect failures are swallowed into the returned outcome;
    /// the voice reference is cleared either way.
    pub fn stop_loop(&mut self) -> BestEffort {
        let Some(mut voice) = self.loop_voice.take() else {
            return BestEffort::Completed;
        };
        let outcome = BestEffort::from_result(voice.stop())
            .and(BestEffort::from_result(voice.disconnect()));
        log::info!("Loop stopped");
        outcome
    }

    /// Plays the alert once on an independent voice, loading it if needed.
    /// The loop voice, if any, is untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the context or buffer cannot be prepared.
    pub async fn play_once(&mut self) -> Result<()> {
        self.ensure_context()?;
        let buffer = self.load_buffer().await?;
        self.one_shots.retain(|voice| !voice.is_finished());

        let context = self.ensure_context()?;
        let voice = context.start(&buffer, PlayMode::Once)?;
        self.one_shots.push(voice);
        Ok(())
    }

    /// Applies `volume` to the gain (when a context exists) and persists it.
    /// The value is not clamped.
    ///
    /// # Errors
    ///
    /// Returns an error if the volume cannot be persisted.
    pub fn set_volume(&mut self, volume: f32) -> Result<()> {
        if let Some(context) = self.context.as_mut() {
            context.set_gain(volume);
        }
        save_volume(&self.prefs, volume)
    }
}
