// SPDX-License-Identifier: AGPL-3.0-or-later

//! # Inactivity Auto-Lock
//!
//! Background timer that locks the wallet session after a period
//! without keystore activity. Long-running operations (block
//! submission) suspend locking for their duration via a
//! reference-counted guard, so overlapping operations nest correctly:
//! only the outermost suspend disables locking and only the outermost
//! resume re-enables it.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::AutoLockOptions;
use crate::wallet::WalletSession;

/// Suspendable inactivity lock timer.
pub struct AutoLock {
    options: AutoLockOptions,
    counter: AtomicI32,
    suspended: AtomicBool,
    last_activity: Mutex<Instant>,
}

impl AutoLock {
    pub fn new(options: AutoLockOptions) -> Self {
        Self {
            options,
            counter: AtomicI32::new(0),
            suspended: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Record keystore activity; resets the idle clock. Called by every
    /// operation that touches the keystore.
    pub fn activity(&self) {
        debug!("activity");
        *self.last_activity.lock().expect("activity clock poisoned") = Instant::now();
    }

    /// Disable auto-locking until the matching [`AutoLock::resume`].
    /// Only the 0→1 transition flips the suspended flag.
    pub fn suspend(&self) {
        if self.counter.fetch_add(1, Ordering::AcqRel) == 0 {
            debug!("suspend");
            self.suspended.store(true, Ordering::Release);
        }
    }

    /// Re-enable auto-locking. Only the 1→0 transition flips the flag;
    /// a resume without a matching suspend is ignored.
    pub fn resume(&self) {
        let mut current = self.counter.load(Ordering::Acquire);
        while current > 0 {
            match self.counter.compare_exchange(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if current == 1 {
                        debug!("resume");
                        self.suspended.store(false, Ordering::Release);
                    }
                    return;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// RAII suspension: resumes when the guard drops, on every exit path.
    pub fn suspend_scope(self: &Arc<Self>) -> SuspendGuard {
        self.suspend();
        SuspendGuard {
            auto_lock: Arc::clone(self),
        }
    }

    fn idle_elapsed(&self) -> std::time::Duration {
        self.last_activity
            .lock()
            .expect("activity clock poisoned")
            .elapsed()
    }

    /// Run the lock timer until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(auto_lock.run(session.clone(), shutdown.clone()));
    /// ```
    pub async fn run(self: Arc<Self>, session: Arc<WalletSession>, shutdown: CancellationToken) {
        info!(
            timeout_secs = self.options.lock_timeout.as_secs(),
            enabled = self.options.enabled,
            "Auto-lock starting"
        );

        let mut ticker = tokio::time::interval(self.options.timer_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                _ = shutdown.cancelled() => {
                    info!("Auto-lock shutting down");
                    return;
                }
            }

            if self.is_enabled()
                && !self.is_suspended()
                && session.is_unlocked()
                && self.idle_elapsed() > self.options.lock_timeout
            {
                debug!("auto-lock timeout reached");
                session.lock().await;
            }
        }
    }
}

/// Resumes the auto-lock when dropped.
pub struct SuspendGuard {
    auto_lock: Arc<AutoLock>,
}

impl Drop for SuspendGuard {
    fn drop(&mut self) {
        self.auto_lock.resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auto_lock() -> AutoLock {
        AutoLock::new(AutoLockOptions::default())
    }

    #[test]
    fn suspend_resume_toggles_flag() {
        let lock = auto_lock();
        assert!(!lock.is_suspended());

        lock.suspend();
        assert!(lock.is_suspended());

        lock.resume();
        assert!(!lock.is_suspended());
    }

    #[test]
    fn nested_suspend_requires_matching_resumes() {
        let lock = auto_lock();

        lock.suspend();
        lock.suspend();
        lock.resume();
        // Still suspended until the second resume
        assert!(lock.is_suspended());

        lock.resume();
        assert!(!lock.is_suspended());
    }

    #[test]
    fn resume_without_suspend_is_ignored() {
        let lock = auto_lock();
        lock.resume();
        assert!(!lock.is_suspended());

        lock.suspend();
        assert!(lock.is_suspended());
        lock.resume();
        assert!(!lock.is_suspended());
    }

    #[test]
    fn suspend_guard_resumes_on_drop() {
        let lock = Arc::new(auto_lock());
        {
            let _guard = lock.suspend_scope();
            assert!(lock.is_suspended());

            {
                let _inner = lock.suspend_scope();
                assert!(lock.is_suspended());
            }
            // Inner guard dropped, outer still holds
            assert!(lock.is_suspended());
        }
        assert!(!lock.is_suspended());
    }

    #[test]
    fn activity_resets_idle_clock() {
        let lock = auto_lock();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let before = lock.idle_elapsed();
        lock.activity();
        assert!(lock.idle_elapsed() < before);
    }
}
