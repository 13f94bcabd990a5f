//! Playback controls: start, stop, test and volume, plus the button state a
//! front end renders from them.

use crate::audio::{AudioBackend, AudioSession};
use crate::best_effort::BestEffort;
use crate::cache::CacheStorage;
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::prefs::KeyValueStore;
use crate::wake::{Visibility, WakeLockManager, WakeLockProvider};
use crate::worker::{CacheWorker, LifecycleObserver};

/// Outcome of registering the cache worker at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Assets are cached; the app keeps working offline.
    OfflineReady,
    /// Registration failed; the app still works while online.
    Unavailable,
}

/// Enabled/pressed state of the start and stop buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonState {
    pub start_enabled: bool,
    pub stop_enabled: bool,
    pub start_pressed: bool,
    pub stop_pressed: bool,
}

impl ButtonState {
    const fn for_playing(playing: bool) -> Self {
        Self {
            start_enabled: !playing,
            stop_enabled: playing,
            start_pressed: playing,
            stop_pressed: !playing,
        }
    }
}

/// Binds the user-facing controls to the audio session and wake lock.
pub struct Controller<B, F, K, P>
where
    B: AudioBackend,
    F: Fetcher,
    K: KeyValueStore,
    P: WakeLockProvider,
{
    audio: AudioSession<B, F, K>,
    wake: WakeLockManager<P>,
    playing: bool,
    readiness: Option<Readiness>,
}

impl<B, F, K, P> Controller<B, F, K, P>
where
    B: AudioBackend,
    F: Fetcher,
    K: KeyValueStore,
    P: WakeLockProvider,
{
    #[must_use]
    pub const fn new(audio: AudioSession<B, F, K>, wake: WakeLockManager<P>) -> Self {
        Self {
            audio,
            wake,
            playing: false,
            readiness: None,
        }
    }

    /// Registers the cache worker once. Failures are logged, not returned.
    pub async fn register_worker<S, W>(
        &mut self,
        worker: &CacheWorker<S, W>,
        observer: &dyn LifecycleObserver,
    ) -> Readiness
    where
        S: CacheStorage,
        W: Fetcher,
    {
        if let Some(readiness) = self.readiness {
            return readiness;
        }
        let readiness = match worker.register(observer).await {
            Ok(report) => {
                if !report.is_complete() {
                    log::warn!(
                        "{} of {} assets could not be precached",
                        report.failed.len(),
                        worker.manifest().len()
                    );
                }
                log::info!("Offline ready ({})", report.cache);
                Readiness::OfflineReady
            }
            Err(e) => {
                log::warn!("Worker registration failed: {e}");
                Readiness::Unavailable
            }
        };
        self.readiness = Some(readiness);
        readiness
    }

    /// Result of [`register_worker`](Self::register_worker), once it has run.
    #[must_use]
    pub const fn readiness(&self) -> Option<Readiness> {
        self.readiness
    }

    /// Starts the loop and keeps the screen awake.
    ///
    /// # Errors
    ///
    /// Returns an error if the output cannot be opened or the alert cannot be
    /// loaded from either URL. The buttons stay idle in that case.
    pub async fn start(&mut self) -> Result<()> {
        self.audio.resume()?;
        self.audio.load_buffer().await?;
        self.audio.start_loop()?;
        self.wake.acquire().await.log("wake lock request");
        self.playing = true;
        Ok(())
    }

    /// Stops the loop and lets the screen sleep. Never fails.
    pub async fn stop(&mut self) -> BestEffort {
        let audio = self.audio.stop_loop();
        let wake = self.wake.release().await;
        self.playing = false;
        audio.and(wake)
    }

    /// Plays the alert once over whatever is already playing.
    ///
    /// # Errors
    ///
    /// Returns an error if the alert cannot be loaded.
    pub async fn test(&mut self) -> Result<()> {
        self.audio.play_once().await
    }

    /// Sets and persists the volume.
    ///
    /// # Errors
    ///
    /// Returns an error if the volume cannot be persisted.
    pub fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.audio.set_volume(volume)
    }

    /// Current volume.
    #[must_use]
    pub fn volume(&self) -> f32 {
        self.audio.volume()
    }

    /// Forwards a foreground/background change to the wake lock.
    pub async fn visibility_changed(&mut self, visibility: Visibility) -> BestEffort {
        let looping = self.audio.is_looping();
        self.wake.on_visibility_change(visibility, looping).await
    }

    #[must_use]
    pub const fn is_playing(&self) -> bool {
        self.playing
    }

    #[must_use]
    pub const fn buttons(&self) -> ButtonState {
        ButtonState::for_playing(self.playing)
    }

    #[must_use]
    pub const fn audio(&self) -> &AudioSession<B, F, K> {
        &self.audio
    }

    #[must_use]
    pub const fn wake_lock(&self) -> &WakeLockManager<P> {
        &self.wake
    }
}
