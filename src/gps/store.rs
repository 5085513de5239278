//! # Fix Store
//!
//! Single guarded cell holding the latest accepted fix. Written by the GPS
//! reader task, read by the dispatch loop.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

use crate::error::{PingerError, Result};
use crate::nmea::Fix;

/// Latest fix plus a wakeup for readers waiting on a fresh one
#[derive(Debug, Default)]
pub struct FixStore {
    latest: Mutex<Option<Fix>>,
    updated: Notify,
}

impl FixStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held fix and stamp it with the current time
    pub fn record(&self, mut fix: Fix) {
        fix.acquired_at = Instant::now();
        *self.lock() = Some(fix);
        self.updated.notify_waiters();
    }

    /// The held fix, if it was recorded no more than `max_age` ago
    pub fn current(&self, max_age: Duration) -> Option<Fix> {
        let latest = self.lock();
        latest
            .as_ref()
            .filter(|fix| Instant::now().saturating_duration_since(fix.acquired_at) <= max_age)
            .cloned()
    }

    /// Wait up to `timeout` for a fix no older than `max_age`
    ///
    /// # Errors
    ///
    /// Returns [`PingerError::NoUsableFix`] when the window closes first.
    pub async fn wait_for_fix(&self, max_age: Duration, timeout: Duration) -> Result<Fix> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register before checking so a record() in between is not missed
            let updated = self.updated.notified();
            tokio::pin!(updated);
            updated.as_mut().enable();

            if let Some(fix) = self.current(max_age) {
                return Ok(fix);
            }

            if timeout_at(deadline, updated).await.is_err() {
                return Err(PingerError::NoUsableFix(timeout));
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Fix>> {
        // The guarded value is a plain Option, so a poisoned lock still holds valid data
        self.latest.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    fn fix(latitude: f64) -> Fix {
        Fix {
            latitude,
            longitude: -122.5,
            satellites: Some(8),
            hdop: Some(0.9),
            fix_quality: None,
            time: None,
            date: None,
            timestamp: Utc::now(),
            acquired_at: Instant::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_store_has_no_fix() {
        let store = FixStore::new();
        assert!(store.current(Duration::from_secs(60)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fix_usable_within_window() {
        let store = FixStore::new();
        store.record(fix(37.0));

        tokio::time::advance(Duration::from_secs(15)).await;
        let current = store.current(Duration::from_secs(15)).unwrap();
        assert_eq!(current.latitude, 37.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fix_stale_after_window() {
        let store = FixStore::new();
        store.record(fix(37.0));

        tokio::time::advance(Duration::from_millis(15_001)).await;
        assert!(store.current(Duration::from_secs(15)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_age() {
        let store = FixStore::new();
        store.record(fix(37.0));
        assert!(store.current(Duration::ZERO).is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(store.current(Duration::ZERO).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_replaces_wholesale() {
        let store = FixStore::new();
        store.record(fix(37.0));
        let mut second = fix(38.0);
        second.hdop = None;
        store.record(second);

        let current = store.current(Duration::from_secs(1)).unwrap();
        assert_eq!(current.latitude, 38.0);
        assert_eq!(current.hdop, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_restamps_acquired_at() {
        let store = FixStore::new();
        let old = fix(37.0);
        tokio::time::advance(Duration::from_secs(100)).await;
        store.record(old);
        assert!(store.current(Duration::from_secs(1)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_existing_fix_immediately() {
        let store = FixStore::new();
        store.record(fix(37.0));

        let started = Instant::now();
        let got = store.wait_for_fix(Duration::from_secs(15), Duration::from_secs(15)).await.unwrap();
        assert_eq!(got.latitude, 37.0);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_wakes_on_record() {
        let store = Arc::new(FixStore::new());
        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            writer.record(fix(40.0));
        });

        let started = Instant::now();
        let got = store.wait_for_fix(Duration::from_secs(15), Duration::from_secs(15)).await.unwrap();
        assert_eq!(got.latitude, 40.0);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let store = FixStore::new();
        let started = Instant::now();
        let result = store.wait_for_fix(Duration::from_secs(15), Duration::from_secs(15)).await;

        assert!(matches!(result, Err(PingerError::NoUsableFix(_))));
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ignores_stale_fix() {
        let store = FixStore::new();
        store.record(fix(37.0));
        tokio::time::advance(Duration::from_secs(30)).await;

        let result = store.wait_for_fix(Duration::from_secs(15), Duration::from_secs(5)).await;
        assert!(matches!(result, Err(PingerError::NoUsableFix(_))));
    }
}
