//! Debounced settings persistence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use vaultsync_core::{CoreResult, SettingsStore, SyncSettings};

/// Produces the settings to write at save time.
pub type SettingsSource = Arc<dyn Fn() -> SyncSettings + Send + Sync>;

/// Coalesces settings writes.
///
/// [`schedule`](Self::schedule) arms a timer; a later call re-arms it, so a
/// burst of local events costs one write. [`flush`](Self::flush) writes
/// immediately and disarms any pending timer.
pub struct DebouncedSaver {
    store: Arc<dyn SettingsStore>,
    source: SettingsSource,
    delay: Duration,
    generation: Arc<AtomicU64>,
}

impl DebouncedSaver {
    /// Creates a saver writing `source()` into `store`.
    pub fn new(store: Arc<dyn SettingsStore>, source: SettingsSource, delay: Duration) -> Self {
        Self {
            store,
            source,
            delay,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedules a write after the debounce delay.
    ///
    /// Outside a tokio runtime the write happens immediately.
    pub fn schedule(&self) {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            if let Err(e) = self.store.save(&(self.source)()) {
                warn!(error = %e, "failed to save settings");
            }
            return;
        };

        let store = Arc::clone(&self.store);
        let source = Arc::clone(&self.source);
        let generation = Arc::clone(&self.generation);
        let delay = self.delay;
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if generation.load(Ordering::SeqCst) != ticket {
                return;
            }
            match store.save(&source()) {
                Ok(()) => debug!("settings saved"),
                Err(e) => warn!(error = %e, "failed to save settings"),
            }
        });
    }

    /// Writes now and cancels any pending write.
    pub fn flush(&self) -> CoreResult<()> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.store.save(&(self.source)())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use vaultsync_core::MemorySettings;

    fn saver(delay: Duration) -> (Arc<MemorySettings>, Arc<Mutex<u64>>, DebouncedSaver) {
        let store = Arc::new(MemorySettings::new());
        let value = Arc::new(Mutex::new(0u64));
        let read = Arc::clone(&value);
        let source: SettingsSource = Arc::new(move || SyncSettings {
            last_synced_at: *read.lock(),
            ..SyncSettings::default()
        });
        let saver = DebouncedSaver::new(store.clone(), source, delay);
        (store, value, saver)
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_coalesce() {
        let (store, value, saver) = saver(Duration::from_millis(100));
        for n in 1..=5 {
            *value.lock() = n;
            saver.schedule();
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.current().last_synced_at, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_cancels_pending() {
        let (store, value, saver) = saver(Duration::from_millis(100));
        *value.lock() = 7;
        saver.schedule();
        saver.flush().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.current().last_synced_at, 7);
    }

    #[test]
    fn saves_immediately_without_runtime() {
        let (store, _, saver) = saver(Duration::from_secs(60));
        saver.schedule();
        assert_eq!(store.save_count(), 1);
    }
}
