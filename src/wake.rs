//! Keeps the display awake while the alert loops.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::best_effort::BestEffort;
use crate::error::{Error, Result};

/// Whether the app is in the foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Platform source of screen wake locks.
#[async_trait]
pub trait WakeLockProvider: Send + Sync {
    /// Handle that keeps the lock alive until released.
    type Lock: Send;

    /// Returns false if this platform has no wake lock facility.
    fn is_supported(&self) -> bool;

    /// Requests a screen wake lock.
    async fn request(&self) -> Result<Self::Lock>;

    /// Releases a lock obtained from [`request`](Self::request).
    async fn release(&self, lock: Self::Lock) -> Result<()>;
}

/// Provider for platforms without wake locks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWakeLock;

#[async_trait]
impl WakeLockProvider for NoWakeLock {
    type Lock = ();

    fn is_supported(&self) -> bool {
        false
    }

    async fn request(&self) -> Result<()> {
        Err(Error::WakeLock("wake locks are not supported".to_string()))
    }

    async fn release(&self, _lock: ()) -> Result<()> {
        Ok(())
    }
}

/// Holds an idle inhibitor through `systemd-inhibit` for as long as a child
/// process lives.
#[derive(Debug, Clone)]
pub struct InhibitProvider {
    program: String,
    who: String,
    why: String,
}

impl Default for InhibitProvider {
    fn default() -> Self {
        Self {
            program: "systemd-inhibit".to_string(),
            who: "bearbang".to_string(),
            why: "Alert loop is playing".to_string(),
        }
    }
}

impl InhibitProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the inhibitor binary.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--what=idle:sleep")
            .arg(format!("--who={}", self.who))
            .arg(format!("--why={}", self.why))
            .arg("--mode=block")
            .args(["sleep", "infinity"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl WakeLockProvider for InhibitProvider {
    type Lock = Child;

    fn is_supported(&self) -> bool {
        cfg!(target_os = "linux")
    }

    async fn request(&self) -> Result<Child> {
        self.command()
            .spawn()
            .map_err(|e| Error::WakeLock(format!("{}: {e}", self.program)))
    }

    async fn release(&self, mut lock: Child) -> Result<()> {
        lock.kill()
            .await
            .map_err(|e| Error::WakeLock(format!("failed to release inhibitor: {e}")))
    }
}

/// Owns the single wake lock handle.
pub struct WakeLockManager<P: WakeLockProvider> {
    provider: P,
    lock: Option<P::Lock>,
    follows_visibility: bool,
}

impl<P: WakeLockProvider> WakeLockManager<P> {
    #[must_use]
    pub const fn new(provider: P) -> Self {
        Self {
            provider,
            lock: None,
            follows_visibility: false,
        }
    }

    /// Returns true while a lock is held.
    #[must_use]
    pub const fn is_held(&self) -> bool {
        self.lock.is_some()
    }

    /// Requests the lock and starts following visibility changes.
    ///
    /// Unsupported platforms and refusals are reported as ignored failures.
    pub async fn acquire(&mut self) -> BestEffort {
        if !self.provider.is_supported() {
            return BestEffort::Ignored(Error::WakeLock("wake locks are not supported".to_string()));
        }
        self.follows_visibility = true;
        self.request().await
    }

    async fn request(&mut self) -> BestEffort {
        if self.lock.is_some() {
            return BestEffort::Completed;
        }
        match self.provider.request().await {
            Ok(lock) => {
                log::debug!("Wake lock acquired");
                self.lock = Some(lock);
                BestEffort::Completed
            }
            Err(e) => BestEffort::Ignored(e),
        }
    }

    /// Re-requests the lock when the app becomes visible with a loop active.
    ///
    /// Platforms drop wake locks while hidden, so a held handle is treated as
    /// lost on [`Visibility::Hidden`].
    pub async fn on_visibility_change(&mut self, visibility: Visibility, loop_active: bool) -> BestEffort {
        if !self.follows_visibility {
            return BestEffort::Completed;
        }
        match visibility {
            Visibility::Hidden => self.release().await,
            Visibility::Visible if loop_active => self.request().await,
            Visibility::Visible => BestEffort::Completed,
        }
    }

    /// Releases the lock if held; the handle is cleared regardless of outcome.
    pub async fn release(&mut self) -> BestEffort {
        let Some(lock) = self.lock.take() else {
            return BestEffort::Completed;
        };
        log::debug!("Wake lock released");
        BestEffort::from_result(self.provider.release(lock).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct FakeProvider {
        requests: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
        refuse: Arc<AtomicBool>,
        fail_release: Arc<AtomicBool>,
    }

    #[async_trait]
    impl WakeLockProvider for FakeProvider {
        type Lock = usize;

        fn is_supported(&self) -> bool {
            true
        }

        async fn request(&self) -> Result<usize> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(Error::WakeLock("NotAllowedError".to_string()));
            }
            Ok(self.requests.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn release(&self, _lock: usize) -> Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            if self.fail_release.load(Ordering::SeqCst) {
                return Err(Error::WakeLock("already released".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn unsupported_is_silent_noop() {
        let mut manager = WakeLockManager::new(NoWakeLock);
        let outcome = manager.acquire().await;
        assert!(outcome.is_ignored());
        assert!(!manager.is_held());
        assert!(!manager.release().await.is_ignored());
    }

    #[tokio::test]
    async fn acquire_and_release() {
        let provider = FakeProvider::default();
        let mut manager = WakeLockManager::new(provider.clone());

        assert!(!manager.acquire().await.is_ignored());
        assert!(manager.is_held());
        assert!(!manager.release().await.is_ignored());
        assert!(!manager.is_held());
        assert_eq!(provider.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refusal_is_ignored() {
        let provider = FakeProvider::default();
        provider.refuse.store(true, Ordering::SeqCst);
        let mut manager = WakeLockManager::new(provider);

        let outcome = manager.acquire().await;
        assert!(matches!(outcome.ignored(), Some(Error::WakeLock(m)) if m == "NotAllowedError"));
        assert!(!manager.is_held());
    }

    #[tokio::test]
    async fn release_failure_still_clears_handle() {
        let provider = FakeProvider::default();
        provider.fail_release.store(true, Ordering::SeqCst);
        let mut manager = WakeLockManager::new(provider);

        let _ = manager.acquire().await;
        assert!(manager.release().await.is_ignored());
        assert!(!manager.is_held());
    }

    #[tokio::test]
    async fn visible_again_reacquires_only_while_looping() {
        let provider = FakeProvider::default();
        let mut manager = WakeLockManager::new(provider.clone());
        let _ = manager.acquire().await;

        let _ = manager.on_visibility_change(Visibility::Hidden, true).await;
        assert!(!manager.is_held());
        let _ = manager.on_visibility_change(Visibility::Visible, true).await;
        assert!(manager.is_held());
        assert_eq!(provider.requests.load(Ordering::SeqCst), 2);

        let _ = manager.on_visibility_change(Visibility::Hidden, false).await;
        let _ = manager.on_visibility_change(Visibility::Visible, false).await;
        assert!(!manager.is_held());
        assert_eq!(provider.requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn visibility_is_ignored_before_first_acquire() {
        let provider = FakeProvider::default();
        let mut manager = WakeLockManager::new(provider.clone());
        let _ = manager.on_visibility_change(Visibility::Visible, true).await;
        assert!(!manager.is_held());
        assert_eq!(provider.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_acquire_keeps_one_lock() {
        let provider = FakeProvider::default();
        let mut manager = WakeLockManager::new(provider.clone());
        let _ = manager.acquire().await;
        let _ = manager.acquire().await;
        assert_eq!(provider.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_inhibitor_binary_is_ignored() {
        let provider = InhibitProvider::new().with_program("/nonexistent/bearbang-inhibit");
        let mut manager = WakeLockManager::new(provider);
        let outcome = manager.acquire().await;
        assert!(outcome.is_ignored());
        assert!(!manager.is_held());
    }
}
