//! Time-bounded credential/token cache with single-flight refresh.

use std::fmt::Debug;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::time::Duration;

use chrono::TimeDelta;
use log::debug;
use log::warn;

use crate::time::Clock;
use crate::time::DateTime;
use crate::time::SystemClock;
use crate::Error;
use crate::ProvideCredential;
use crate::Result;
use crate::SigningCredential;

/// Default duration before expiration at which a value counts as stale.
pub const DEFAULT_STALE_DURATION: Duration = Duration::from_secs(60);

/// What a blocking refresh does when the underlying provider fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Propagate the failure to the caller.
    #[default]
    Rethrow,
    /// Serve the last known value if one exists, propagate otherwise.
    ReuseLastValue,
}

/// A resolved value together with its refresh thresholds.
struct CachedEntry<C> {
    value: Option<C>,
    /// Past this instant the value must not be served without a refresh.
    stale_at: DateTime,
    /// Past this instant a background refresh should be scheduled.
    prefetch_at: DateTime,
}

/// A caching layer over a [`ProvideCredential`] supplier.
///
/// Values are served from memory until their stale time
/// (`expiration - stale_duration`). A stale or missing value triggers a
/// synchronous refresh; concurrent callers share a single in-flight
/// supplier call. With background refresh enabled, values past their
/// prefetch time are refreshed off the request path while callers keep
/// receiving the still-valid value.
///
/// Values without an expiration are stale immediately, so every `get`
/// consults the supplier.
pub struct CachedCredentialProvider<C: SigningCredential> {
    inner: Arc<Inner<C>>,
}

struct Inner<C: SigningCredential> {
    provider: Arc<dyn ProvideCredential<Credential = C>>,
    entry: RwLock<Option<Arc<CachedEntry<C>>>>,

    /// Serializes blocking refreshes; holders must re-check freshness
    /// after acquisition.
    refresh: tokio::sync::Mutex<()>,
    prefetch_inflight: AtomicBool,
    prefetch_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    closed: AtomicBool,

    clock: Arc<dyn Clock>,
    stale_duration: Duration,
    prefetch_duration: Duration,
    async_prefetch: bool,
    fallback: FallbackPolicy,
}

impl<C: SigningCredential> Clone for CachedCredentialProvider<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: SigningCredential> Debug for CachedCredentialProvider<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedCredentialProvider")
            .field("provider", &self.inner.provider)
            .field("stale_duration", &self.inner.stale_duration)
            .field("prefetch_duration", &self.inner.prefetch_duration)
            .field("async_prefetch", &self.inner.async_prefetch)
            .field("fallback", &self.inner.fallback)
            .finish()
    }
}

impl<C: SigningCredential> CachedCredentialProvider<C> {
    /// Wrap `provider` with default thresholds: one minute stale
    /// duration, prefetch disabled, failures rethrown.
    pub fn new(provider: impl ProvideCredential<Credential = C>) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider: Arc::new(provider),
                entry: RwLock::new(None),
                refresh: tokio::sync::Mutex::new(()),
                prefetch_inflight: AtomicBool::new(false),
                prefetch_task: Mutex::new(None),
                closed: AtomicBool::new(false),
                clock: Arc::new(SystemClock),
                stale_duration: DEFAULT_STALE_DURATION,
                prefetch_duration: DEFAULT_STALE_DURATION,
                async_prefetch: false,
                fallback: FallbackPolicy::default(),
            }),
        }
    }

    fn inner_mut(&mut self) -> &mut Inner<C> {
        Arc::get_mut(&mut self.inner).expect("configure the cache before sharing it")
    }

    /// How long before expiration a value becomes stale. Also resets the
    /// prefetch duration when the latter was not set explicitly.
    pub fn with_stale_duration(mut self, d: Duration) -> Self {
        let inner = self.inner_mut();
        if inner.prefetch_duration == inner.stale_duration {
            inner.prefetch_duration = d;
        }
        inner.stale_duration = d;
        self
    }

    /// How long before expiration a background refresh becomes due.
    pub fn with_prefetch_duration(mut self, d: Duration) -> Self {
        self.inner_mut().prefetch_duration = d;
        self
    }

    /// Enable or disable background refresh of prefetch-due values.
    pub fn with_async_prefetch(mut self, enabled: bool) -> Self {
        self.inner_mut().async_prefetch = enabled;
        self
    }

    /// Behavior when a blocking refresh fails.
    pub fn with_fallback(mut self, policy: FallbackPolicy) -> Self {
        self.inner_mut().fallback = policy;
        self
    }

    /// Replace the clock, mainly for tests and skew compensation.
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.inner_mut().clock = Arc::new(clock);
        self
    }

    /// Get the current credential, refreshing it if necessary.
    pub async fn get(&self) -> Result<Option<C>> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::resource_closed("credential cache is closed"));
        }

        let now = self.inner.clock.now();
        if let Some(entry) = self.inner.current() {
            if now < entry.stale_at {
                if self.inner.async_prefetch && now >= entry.prefetch_at {
                    self.inner.clone().spawn_prefetch();
                }
                return Ok(entry.value.clone());
            }
        }

        self.refresh_blocking().await
    }

    /// Release the background refresh task, if any. Subsequent `get`
    /// calls fail with a resource-closed error.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        if let Some(handle) = self
            .inner
            .prefetch_task
            .lock()
            .expect("lock poisoned")
            .take()
        {
            handle.abort();
        }
    }

    async fn refresh_blocking(&self) -> Result<Option<C>> {
        let _guard = self.inner.refresh.lock().await;

        // A concurrent caller may have refreshed while we waited.
        if let Some(entry) = self.inner.current() {
            if self.inner.clock.now() < entry.stale_at {
                return Ok(entry.value.clone());
            }
        }

        match self.inner.provider.provide_credential().await {
            Ok(value) => {
                debug!("credential cache refreshed");
                self.inner.store(value.clone());
                Ok(value)
            }
            Err(err) => {
                let last = self.inner.current().and_then(|e| e.value.clone());
                match (self.inner.fallback, last) {
                    (FallbackPolicy::ReuseLastValue, Some(value)) => {
                        warn!("credential refresh failed, serving last known value: {err:?}");
                        Ok(Some(value))
                    }
                    _ => Err(Error::token_acquisition("credential refresh failed")
                        .with_source(err)),
                }
            }
        }
    }
}

impl<C: SigningCredential> Inner<C> {
    fn current(&self) -> Option<Arc<CachedEntry<C>>> {
        self.entry.read().expect("lock poisoned").clone()
    }

    /// Replace the cached entry with a single reference swap so readers
    /// never observe a partially constructed value.
    fn store(&self, value: Option<C>) {
        let now = self.clock.now();
        let expires_at = value.expires_at();

        let threshold = |d: Duration| match expires_at {
            Some(e) => e - TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX),
            None => now,
        };
        let entry = Arc::new(CachedEntry {
            stale_at: threshold(self.stale_duration),
            prefetch_at: threshold(self.prefetch_duration),
            value,
        });

        *self.entry.write().expect("lock poisoned") = Some(entry);
    }

    fn spawn_prefetch(self: Arc<Self>) {
        // Only one outstanding prefetch task at a time.
        if self.prefetch_inflight.swap(true, Ordering::AcqRel) {
            return;
        }

        let inner = self.clone();
        let handle = tokio::spawn(async move {
            match inner.provider.provide_credential().await {
                Ok(value) => {
                    debug!("background credential refresh succeeded");
                    inner.store(value);
                }
                // A failed prefetch never disturbs the value being served.
                Err(err) => warn!("background credential refresh failed: {err:?}"),
            }
            inner.prefetch_inflight.store(false, Ordering::Release);
        });

        *self.prefetch_task.lock().expect("lock poisoned") = Some(handle);
    }
}

#[async_trait::async_trait]
impl<C: SigningCredential> ProvideCredential for CachedCredentialProvider<C> {
    type Credential = C;

    async fn provide_credential(&self) -> Result<Option<Self::Credential>> {
        self.get().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use chrono::TimeZone;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct TestCred {
        id: usize,
        expires_at: Option<DateTime>,
    }

    impl SigningCredential for TestCred {
        fn is_valid(&self) -> bool {
            true
        }

        fn expires_at(&self) -> Option<DateTime> {
            self.expires_at
        }
    }

    /// Counts supplier invocations; optionally sleeps to widen the race
    /// window, optionally fails from a scripted queue.
    #[derive(Debug)]
    struct TestProvider {
        calls: Arc<AtomicUsize>,
        delay: Duration,
        expires_at: Option<DateTime>,
        failures: Mutex<VecDeque<bool>>,
    }

    impl TestProvider {
        fn new(expires_at: Option<DateTime>) -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                delay: Duration::ZERO,
                expires_at,
                failures: Mutex::new(VecDeque::new()),
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn fail_on_calls(self, script: &[bool]) -> Self {
            *self.failures.lock().unwrap() = script.iter().copied().collect();
            self
        }
    }

    #[async_trait::async_trait]
    impl ProvideCredential for TestProvider {
        type Credential = TestCred;

        async fn provide_credential(&self) -> Result<Option<TestCred>> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let id = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let fail = self.failures.lock().unwrap().pop_front().unwrap_or(false);
            if fail {
                return Err(Error::unexpected("supplier down"));
            }
            Ok(Some(TestCred {
                id,
                expires_at: self.expires_at,
            }))
        }
    }

    fn t0() -> DateTime {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_single_flight_refresh() {
        let _ = env_logger::builder().is_test(true).try_init();

        let provider = TestProvider::new(Some(crate::time::now() + TimeDelta::hours(1)))
            .with_delay(Duration::from_millis(50));
        let calls = provider.calls.clone();
        let cache = CachedCredentialProvider::new(provider);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get().await.unwrap() }));
        }

        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| v == &values[0]));
    }

    #[tokio::test]
    async fn test_fresh_value_served_without_supplier_call() {
        let clock = ManualClock::new(t0());
        let provider = TestProvider::new(Some(t0() + TimeDelta::seconds(2)));
        let calls = provider.calls.clone();
        let cache = CachedCredentialProvider::new(provider)
            .with_stale_duration(Duration::from_secs(1))
            .with_clock(clock.clone());

        cache.get().await.unwrap();
        cache.get().await.unwrap();
        cache.get().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Cross the stale threshold (expiration - 1s): exactly one more
        // supplier call.
        clock.advance(TimeDelta::milliseconds(1200));
        cache.get().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_value_without_expiration_always_refreshes() {
        let provider = TestProvider::new(None);
        let calls = provider.calls.clone();
        let cache = CachedCredentialProvider::new(provider);

        cache.get().await.unwrap();
        cache.get().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_async_prefetch_serves_current_value() {
        let clock = ManualClock::new(t0());
        let provider = TestProvider::new(Some(t0() + TimeDelta::seconds(60)));
        let calls = provider.calls.clone();
        let cache = CachedCredentialProvider::new(provider)
            .with_stale_duration(Duration::from_secs(10))
            .with_prefetch_duration(Duration::from_secs(40))
            .with_async_prefetch(true)
            .with_clock(clock.clone());

        let first = cache.get().await.unwrap().unwrap();
        assert_eq!(first.id, 1);

        // Prefetch-due (past expiration - 40s) but not stale: value is
        // served immediately and a background refresh runs.
        clock.advance(TimeDelta::seconds(25));
        let second = cache.get().await.unwrap().unwrap();
        assert_eq!(second.id, 1);

        for _ in 0..100 {
            if calls.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let third = cache.get().await.unwrap().unwrap();
        assert_eq!(third.id, 2);
    }

    #[tokio::test]
    async fn test_fallback_reuses_last_value() {
        // No expiration: every get consults the supplier.
        let provider = TestProvider::new(None).fail_on_calls(&[false, true]);
        let cache =
            CachedCredentialProvider::new(provider).with_fallback(FallbackPolicy::ReuseLastValue);

        let first = cache.get().await.unwrap().unwrap();
        assert_eq!(first.id, 1);

        let second = cache.get().await.unwrap().unwrap();
        assert_eq!(second.id, 1);
    }

    #[tokio::test]
    async fn test_default_fallback_rethrows() {
        let provider = TestProvider::new(None).fail_on_calls(&[false, true]);
        let cache = CachedCredentialProvider::new(provider);

        cache.get().await.unwrap();
        let err = cache.get().await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::TokenAcquisition);
    }

    #[tokio::test]
    async fn test_get_after_close_fails() {
        let provider = TestProvider::new(None);
        let cache = CachedCredentialProvider::new(provider);

        cache.get().await.unwrap();
        cache.close();

        let err = cache.get().await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ResourceClosed);
    }
}
