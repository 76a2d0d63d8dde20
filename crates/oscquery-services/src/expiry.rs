//! Expiry cache: keys with an absolute expiry instant and a wake-driven reaper.
//!
//! The reaper does not poll. It sleeps until the nearest expiry (the
//! watermark), capped at the default TTL, and is woken early whenever an
//! insert moves the watermark earlier. Wakes coalesce: any number of
//! signals before the reaper next waits cost a single sweep.

use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;

/// Outcome of [`ExpiryCache::add_or_touch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Touch {
    /// The key was not present and has been inserted.
    New,
    /// The key was present; its expiry moved.
    Refreshed,
}

type EvictionCallback<K> = Arc<dyn Fn(&K) -> anyhow::Result<()> + Send + Sync>;

pub struct ExpiryCache<K> {
    entries: DashMap<K, Instant>,
    default_ttl: Duration,
    max_ttl: Option<Duration>,
    /// Nearest known expiry. `None` means nothing is due.
    watermark: Mutex<Option<Instant>>,
    wake: Notify,
    callbacks: RwLock<Vec<EvictionCallback<K>>>,
}

impl<K> ExpiryCache<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    pub fn new(default_ttl: Duration, max_ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            max_ttl,
            watermark: Mutex::new(None),
            wake: Notify::new(),
            callbacks: RwLock::new(Vec::new()),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// The TTL cap, falling back to the default TTL when uncapped.
    pub fn max_ttl(&self) -> Duration {
        self.max_ttl.unwrap_or(self.default_ttl)
    }

    /// Register a callback fired once per evicted key, in sweep order.
    pub fn on_expiry<F>(&self, callback: F)
    where
        F: Fn(&K) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if let Ok(mut callbacks) = self.callbacks.write() {
            callbacks.push(Arc::new(callback));
        }
    }

    /// Insert `key` or push its expiry out to `now + ttl`.
    ///
    /// `ttl` defaults to the cache's default TTL and is clamped to the max TTL.
    pub fn add_or_touch(&self, key: K, ttl: Option<Duration>) -> Touch {
        let expiry = self.expiry_after(ttl.unwrap_or(self.default_ttl));

        // The shard guard from `entry` is released before the watermark lock is taken.
        let touch = match self.entries.entry(key) {
            Entry::Occupied(mut e) => {
                e.insert(expiry);
                Touch::Refreshed
            }
            Entry::Vacant(e) => {
                e.insert(expiry);
                Touch::New
            }
        };

        self.lower_watermark(expiry);
        touch
    }

    /// Move an existing key's expiry to `now + ttl`. Absent keys are left
    /// absent. Returns whether the key was present.
    pub fn touch_existing(&self, key: &K, ttl: Duration) -> bool {
        let expiry = self.expiry_after(ttl);
        match self.entries.get_mut(key) {
            Some(mut e) => *e.value_mut() = expiry,
            None => return false,
        }
        self.lower_watermark(expiry);
        true
    }

    fn expiry_after(&self, ttl: Duration) -> Instant {
        let ttl = match self.max_ttl {
            Some(max) => ttl.min(max),
            None => ttl,
        };
        Instant::now() + ttl
    }

    /// Wake the reaper if `expiry` is due before anything it knows about.
    fn lower_watermark(&self, expiry: Instant) {
        if let Ok(mut watermark) = self.watermark.lock() {
            if watermark.map_or(true, |w| expiry < w) {
                *watermark = Some(expiry);
                self.wake.notify_one();
            }
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn expiry_of(&self, key: &K) -> Option<Instant> {
        self.entries.get(key).map(|e| *e.value())
    }

    /// Snapshot of the live keys.
    pub fn items(&self) -> Vec<K> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// How long the reaper should wait before the next sweep.
    pub fn next_wait(&self) -> Duration {
        let watermark = self.watermark.lock().ok().and_then(|w| *w);
        match watermark {
            None => self.default_ttl,
            Some(w) => w
                .saturating_duration_since(Instant::now())
                .min(self.default_ttl),
        }
    }

    /// Evict every entry due at or before now. Returns the number evicted.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let due: Vec<K> = self
            .entries
            .iter()
            .filter(|e| *e.value() <= now)
            .map(|e| e.key().clone())
            .collect();

        let callbacks: Vec<EvictionCallback<K>> = self
            .callbacks
            .read()
            .map(|c| c.clone())
            .unwrap_or_default();

        let mut evicted = 0;
        for key in due {
            // A touch may have landed between the scan and here.
            if self.entries.remove_if(&key, |_, expiry| *expiry <= now).is_none() {
                continue;
            }
            evicted += 1;
            tracing::debug!(key = ?key, "cache entry expired");
            for callback in &callbacks {
                match catch_unwind(AssertUnwindSafe(|| callback(&key))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(key = ?key, error = %e, "eviction callback failed")
                    }
                    Err(_) => tracing::error!(key = ?key, "eviction callback panicked"),
                }
            }
        }

        if let Ok(mut watermark) = self.watermark.lock() {
            *watermark = self.entries.iter().map(|e| *e.value()).min();
        }

        evicted
    }

    /// Reaper loop. Runs until `shutdown` fires.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::debug!(default_ttl = ?self.default_ttl, "cache reaper starting");
        loop {
            let wait = self.next_wait();
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
            let evicted = self.sweep();
            if evicted > 0 {
                tracing::trace!(evicted, remaining = self.len(), "reaper sweep");
            }
        }
        tracing::debug!("cache reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache(default_secs: u64, max_secs: Option<u64>) -> Arc<ExpiryCache<&'static str>> {
        Arc::new(ExpiryCache::new(
            Duration::from_secs(default_secs),
            max_secs.map(Duration::from_secs),
        ))
    }

    fn counting(cache: &ExpiryCache<&'static str>) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        cache.on_expiry(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        count
    }

    #[tokio::test(start_paused = true)]
    async fn new_then_refreshed_moves_expiry() {
        let cache = cache(60, None);
        let ttl = Duration::from_secs(10);

        assert_eq!(cache.add_or_touch("peer", Some(ttl)), Touch::New);
        tokio::time::advance(Duration::from_secs(4)).await;

        let now2 = Instant::now();
        assert_eq!(cache.add_or_touch("peer", Some(ttl)), Touch::Refreshed);
        assert_eq!(cache.expiry_of(&"peer"), Some(now2 + ttl));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_is_clamped_to_max() {
        let cache = cache(60, Some(30));
        let start = Instant::now();
        cache.add_or_touch("peer", Some(Duration::from_secs(4500)));
        assert_eq!(cache.expiry_of(&"peer"), Some(start + Duration::from_secs(30)));

        cache.add_or_touch("other", None);
        assert_eq!(cache.expiry_of(&"other"), Some(start + Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_is_evicted_exactly_once() {
        let cache = cache(60, None);
        let count = counting(&cache);
        let (tx, rx) = broadcast::channel(1);
        let reaper = tokio::spawn(cache.clone().run(rx));

        cache.add_or_touch("gone", Some(Duration::ZERO));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());

        tokio::time::sleep(Duration::from_secs(180)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tx.send(()).unwrap();
        reaper.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn short_entry_wakes_a_long_sleep() {
        let cache = cache(60, None);
        let count = counting(&cache);
        let (tx, rx) = broadcast::channel(1);
        let reaper = tokio::spawn(cache.clone().run(rx));

        cache.add_or_touch("long", Some(Duration::from_secs(50)));
        tokio::time::sleep(Duration::from_secs(1)).await;
        cache.add_or_touch("short", Some(Duration::from_secs(2)));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!cache.contains(&"short"));
        assert!(cache.contains(&"long"));

        tx.send(()).unwrap();
        reaper.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn touched_entry_survives_its_original_expiry() {
        let cache = cache(60, None);
        let count = counting(&cache);
        let (tx, rx) = broadcast::channel(1);
        let reaper = tokio::spawn(cache.clone().run(rx));

        cache.add_or_touch("peer", Some(Duration::from_secs(10)));
        tokio::time::sleep(Duration::from_secs(8)).await;
        cache.add_or_touch("peer", Some(Duration::from_secs(10)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(cache.contains(&"peer"));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!cache.contains(&"peer"));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tx.send(()).unwrap();
        reaper.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failing_callback_does_not_stop_the_sweep() {
        let cache = cache(60, None);
        cache.on_expiry(|key| {
            if *key == "bad" {
                anyhow::bail!("refusing {key}");
            }
            Ok(())
        });
        cache.on_expiry(|key| {
            if *key == "worse" {
                panic!("boom");
            }
            Ok(())
        });
        let count = counting(&cache);

        for key in ["bad", "worse", "fine"] {
            cache.add_or_touch(key, Some(Duration::ZERO));
        }
        assert_eq!(cache.sweep(), 3);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn touch_existing_never_inserts() {
        let cache = cache(60, None);
        let count = counting(&cache);
        let (tx, rx) = broadcast::channel(1);
        let reaper = tokio::spawn(cache.clone().run(rx));

        assert!(!cache.touch_existing(&"stranger", Duration::ZERO));
        assert!(cache.is_empty());

        cache.add_or_touch("peer", Some(Duration::from_secs(50)));
        assert!(cache.touch_existing(&"peer", Duration::ZERO));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(cache.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tx.send(()).unwrap();
        reaper.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn next_wait_is_clamped() {
        let cache = cache(60, None);
        assert_eq!(cache.next_wait(), Duration::from_secs(60));

        cache.add_or_touch("soon", Some(Duration::from_secs(5)));
        assert_eq!(cache.next_wait(), Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cache.next_wait(), Duration::ZERO);

        cache.sweep();
        assert_eq!(cache.next_wait(), Duration::from_secs(60));
    }
}
