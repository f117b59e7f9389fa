//! Bounded pool of named model handles.
//!
//! Each handle can be held by at most one logical task at a time. Holding is
//! represented by a [`ModelLease`]; dropping the lease releases the handle,
//! so every exit path of a turn (early return, `?`, panic unwinding) gives
//! its models back.

use gaia_llm::provider::LlmProvider;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Conventional handle names.
pub const PRIME: &str = "prime";
pub const LITE: &str = "lite";
pub const EMBED: &str = "embed";

/// Status of one pooled handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Idle,
    Busy,
    Observing,
    Responding,
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelStatus::Idle => "idle",
            ModelStatus::Busy => "busy",
            ModelStatus::Observing => "observing",
            ModelStatus::Responding => "responding",
        };
        f.write_str(s)
    }
}

struct Slot {
    name: String,
    /// `None` when the model failed to load; such a slot never hands out leases.
    provider: Option<Arc<dyn LlmProvider>>,
    status: ModelStatus,
    /// Bumped on every grant so a stale lease cannot release a newer holder.
    generation: u64,
}

struct PoolInner {
    slots: Mutex<Vec<Slot>>,
    released: Notify,
}

impl PoolInner {
    fn slots(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_generation(&self, name: &str, generation: u64) {
        let mut slots = self.slots();
        if let Some(slot) = slots.iter_mut().find(|s| s.name == name)
            && slot.generation == generation
            && slot.status != ModelStatus::Idle
        {
            slot.status = ModelStatus::Idle;
            drop(slots);
            tracing::debug!(model = name, "model lease released");
            self.released.notify_waiters();
        }
    }
}

enum Claim {
    Granted(ModelLease),
    Held,
    Missing,
}

/// Shared registry of model handles. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ModelPool {
    inner: Arc<PoolInner>,
}

impl Default for ModelPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ModelPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.inner.slots();
        let mut map = f.debug_map();
        for slot in slots.iter() {
            let state = if slot.provider.is_some() { slot.status.to_string() } else { "failed".into() };
            map.entry(&slot.name, &state);
        }
        map.finish()
    }
}

impl ModelPool {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolInner { slots: Mutex::new(Vec::new()), released: Notify::new() }),
        }
    }

    /// Build the pool from `GAIA_PRIME_MODEL`, `GAIA_LITE_MODEL` and `GAIA_EMBED_MODEL`.
    /// Unset variables leave that name unregistered.
    pub fn from_env() -> Self {
        let pool = Self::new();
        for (name, var) in [(PRIME, "GAIA_PRIME_MODEL"), (LITE, "GAIA_LITE_MODEL"), (EMBED, "GAIA_EMBED_MODEL")] {
            match gaia_llm::http::from_env_with_model_var(var) {
                Some(provider) => {
                    tracing::info!(model = name, backend = provider.model(), "model registered");
                    pool.register(name, Arc::new(provider));
                }
                None => tracing::info!(model = name, env = var, "model not configured"),
            }
        }
        pool
    }

    /// Register (or replace) a loaded model in registration order.
    pub fn register(&self, name: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        self.insert(name.into(), Some(provider));
    }

    /// Record a model that failed to load. `acquire` for it always yields `None`.
    pub fn register_failed(&self, name: impl Into<String>, reason: &str) {
        let name = name.into();
        tracing::error!(model = %name, reason, "model failed to load");
        self.insert(name, None);
    }

    fn insert(&self, name: String, provider: Option<Arc<dyn LlmProvider>>) {
        let mut slots = self.inner.slots();
        match slots.iter_mut().find(|s| s.name == name) {
            Some(slot) => {
                slot.provider = provider;
                slot.status = ModelStatus::Idle;
                slot.generation += 1;
            }
            None => slots.push(Slot { name, provider, status: ModelStatus::Idle, generation: 0 }),
        }
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.inner.slots().iter().map(|s| s.name.clone()).collect()
    }

    /// True if `name` is registered and loaded (regardless of status).
    pub fn is_available(&self, name: &str) -> bool {
        self.inner.slots().iter().any(|s| s.name == name && s.provider.is_some())
    }

    pub fn status(&self, name: &str) -> Option<ModelStatus> {
        self.inner.slots().iter().find(|s| s.name == name && s.provider.is_some()).map(|s| s.status)
    }

    fn claim(&self, name: &str) -> Claim {
        let mut slots = self.inner.slots();
        let Some(slot) = slots.iter_mut().find(|s| s.name == name) else {
            return Claim::Missing;
        };
        let Some(provider) = slot.provider.clone() else {
            return Claim::Missing;
        };
        if slot.status != ModelStatus::Idle {
            return Claim::Held;
        }
        slot.status = ModelStatus::Busy;
        slot.generation += 1;
        Claim::Granted(ModelLease {
            pool: Arc::clone(&self.inner),
            name: slot.name.clone(),
            generation: slot.generation,
            provider,
        })
    }

    /// Take `name` if it is idle right now. `None` if unknown, failed, or held.
    pub fn try_acquire(&self, name: &str) -> Option<ModelLease> {
        match self.claim(name) {
            Claim::Granted(lease) => {
                tracing::debug!(model = name, "model acquired");
                Some(lease)
            }
            Claim::Held | Claim::Missing => None,
        }
    }

    /// Take `name`, waiting for the current holder to release it.
    /// Returns `None` immediately if `name` is unknown or failed to load.
    pub async fn acquire(&self, name: &str) -> Option<ModelLease> {
        loop {
            // Registered before the check so a release in between is not missed.
            let released = self.inner.released.notified();
            match self.claim(name) {
                Claim::Granted(lease) => {
                    tracing::debug!(model = name, "model acquired");
                    return Some(lease);
                }
                Claim::Missing => {
                    tracing::warn!(model = name, pool = ?self, "requested model not in pool");
                    return None;
                }
                Claim::Held => released.await,
            }
        }
    }

    /// Mark `name` idle. Tolerates unknown names and already-idle handles.
    pub fn release(&self, name: &str) {
        let mut slots = self.inner.slots();
        match slots.iter_mut().find(|s| s.name == name) {
            None => tracing::warn!(model = name, "release of unknown model ignored"),
            Some(slot) if slot.status == ModelStatus::Idle => {
                tracing::debug!(model = name, "release of idle model ignored");
            }
            Some(slot) => {
                slot.status = ModelStatus::Idle;
                drop(slots);
                self.inner.released.notify_waiters();
            }
        }
    }

    /// Administrative status change (e.g. marking a held handle `Observing`).
    pub fn set_status(&self, name: &str, status: ModelStatus) {
        let mut slots = self.inner.slots();
        let Some(slot) = slots.iter_mut().find(|s| s.name == name) else {
            tracing::warn!(model = name, %status, "status change for unknown model ignored");
            return;
        };
        slot.status = status;
        drop(slots);
        tracing::debug!(model = name, %status, "model status set");
        if status == ModelStatus::Idle {
            self.inner.released.notify_waiters();
        }
    }

    /// First idle, loaded model (registration order) whose name is not in `exclude`.
    pub fn get_idle_model(&self, exclude: &[&str]) -> Option<String> {
        self.inner
            .slots()
            .iter()
            .find(|s| s.provider.is_some() && s.status == ModelStatus::Idle && !exclude.contains(&s.name.as_str()))
            .map(|s| s.name.clone())
    }
}

/// Exclusive hold on one pooled model. Released on drop.
pub struct ModelLease {
    pool: Arc<PoolInner>,
    name: String,
    generation: u64,
    provider: Arc<dyn LlmProvider>,
}

impl ModelLease {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &dyn LlmProvider {
        self.provider.as_ref()
    }

    /// Shared handle to the provider, for components that outlive a borrow.
    pub fn shared(&self) -> Arc<dyn LlmProvider> {
        Arc::clone(&self.provider)
    }

    /// Change this handle's status while keeping it held.
    pub fn mark(&self, status: ModelStatus) {
        let mut slots = self.pool.slots();
        if let Some(slot) = slots.iter_mut().find(|s| s.name == self.name)
            && slot.generation == self.generation
        {
            slot.status = status;
        }
    }
}

impl fmt::Debug for ModelLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelLease").field("name", &self.name).field("generation", &self.generation).finish()
    }
}

impl Drop for ModelLease {
    fn drop(&mut self) {
        self.pool.release_generation(&self.name, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaia_llm::provider::MockProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn pool_with(names: &[&str]) -> ModelPool {
        let pool = ModelPool::new();
        for n in names {
            pool.register(*n, Arc::new(MockProvider::new(*n)));
        }
        pool
    }

    #[tokio::test]
    async fn acquire_marks_busy_and_drop_releases() {
        let pool = pool_with(&[LITE, PRIME]);
        let lease = pool.acquire(PRIME).await.unwrap();
        assert_eq!(pool.status(PRIME), Some(ModelStatus::Busy));
        assert!(pool.try_acquire(PRIME).is_none());
        drop(lease);
        assert_eq!(pool.status(PRIME), Some(ModelStatus::Idle));
        assert!(pool.try_acquire(PRIME).is_some());
    }

    #[tokio::test]
    async fn missing_and_failed_models_yield_none() {
        let pool = pool_with(&[LITE]);
        pool.register_failed(PRIME, "weights not found");
        assert!(pool.acquire("nonexistent").await.is_none());
        assert!(pool.acquire(PRIME).await.is_none());
        assert!(pool.try_acquire(PRIME).is_none());
        assert!(!pool.is_available(PRIME));
        assert!(pool.is_available(LITE));
    }

    #[test]
    fn release_is_idempotent() {
        let pool = pool_with(&[LITE]);
        pool.release(LITE);
        pool.release("ghost");
        let lease = pool.try_acquire(LITE).unwrap();
        pool.release(LITE);
        pool.release(LITE);
        assert_eq!(pool.status(LITE), Some(ModelStatus::Idle));
        drop(lease);
        assert_eq!(pool.status(LITE), Some(ModelStatus::Idle));
    }

    #[test]
    fn stale_lease_does_not_release_new_holder() {
        let pool = pool_with(&[LITE]);
        let stale = pool.try_acquire(LITE).unwrap();
        pool.release(LITE);
        let fresh = pool.try_acquire(LITE).unwrap();
        drop(stale);
        assert_eq!(pool.status(LITE), Some(ModelStatus::Busy));
        drop(fresh);
        assert_eq!(pool.status(LITE), Some(ModelStatus::Idle));
    }

    #[test]
    fn idle_model_respects_order_and_exclusions() {
        let pool = pool_with(&[LITE, PRIME, EMBED]);
        assert_eq!(pool.get_idle_model(&[]), Some(LITE.to_string()));
        assert_eq!(pool.get_idle_model(&[LITE]), Some(PRIME.to_string()));
        let _held = pool.try_acquire(PRIME).unwrap();
        assert_eq!(pool.get_idle_model(&[LITE]), Some(EMBED.to_string()));
        assert_eq!(pool.get_idle_model(&[LITE, EMBED]), None);
    }

    #[test]
    fn set_status_and_mark() {
        let pool = pool_with(&[LITE]);
        let lease = pool.try_acquire(LITE).unwrap();
        lease.mark(ModelStatus::Observing);
        assert_eq!(pool.status(LITE), Some(ModelStatus::Observing));
        pool.set_status("ghost", ModelStatus::Busy);
        drop(lease);
        assert_eq!(pool.status(LITE), Some(ModelStatus::Idle));
    }

    #[tokio::test]
    async fn waiting_acquire_wakes_on_release() {
        let pool = pool_with(&[PRIME]);
        let lease = pool.try_acquire(PRIME).unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(PRIME).await.map(|l| l.name().to_string()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(lease);
        let got = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(got.as_deref(), Some(PRIME));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_holders_never_overlap() {
        let pool = pool_with(&[PRIME]);
        let holders = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let pool = pool.clone();
            let holders = Arc::clone(&holders);
            let max_seen = Arc::clone(&max_seen);
            tasks.push(tokio::spawn(async move {
                for _ in 0..5 {
                    let lease = pool.acquire(PRIME).await.unwrap();
                    let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    holders.fetch_sub(1, Ordering::SeqCst);
                    drop(lease);
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(pool.status(PRIME), Some(ModelStatus::Idle));
    }
}
