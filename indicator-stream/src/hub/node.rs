//! Shared core of every provider and hub: a locked cache plus the
//! registry of downstream observers.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::config::HubConfig;
use crate::error::{HubError, HubResult};

use super::cache::{Pruned, StreamCache};
use super::{StreamObserver, TimedItem};

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Subscription-ordered list of non-owning observer references.
///
/// The registry never keeps an observer alive; entries whose observer has
/// been dropped are skipped and removed on the next notification.
pub struct ObserverRegistry<T: TimedItem> {
    next_id: AtomicU64,
    observers: Mutex<Vec<(SubscriptionId, Weak<dyn StreamObserver<T>>)>>,
}

impl<T: TimedItem> Default for ObserverRegistry<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            observers: Mutex::new(Vec::new()),
        }
    }
}

impl<T: TimedItem> ObserverRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Weak<dyn StreamObserver<T>>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().push((id, observer));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(sub, _)| *sub != id);
        observers.len() != before
    }

    /// Live observers in subscription order. The registry lock is released
    /// before the caller notifies anyone.
    pub fn live(&self) -> Vec<Arc<dyn StreamObserver<T>>> {
        let mut observers = self.observers.lock();
        observers.retain(|(_, weak)| weak.strong_count() > 0);
        observers.iter().filter_map(|(_, weak)| weak.upgrade()).collect()
    }

    pub fn len(&self) -> usize {
        self.observers
            .lock()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry, returning the live observers.
    pub fn drain(&self) -> Vec<Arc<dyn StreamObserver<T>>> {
        let drained: Vec<_> = self.observers.lock().drain(..).collect();
        drained.into_iter().filter_map(|(_, weak)| weak.upgrade()).collect()
    }
}

/// Cache, observers and fault flag of one graph node.
///
/// Locks are never held while observers run, so a cascade never holds two
/// nodes' caches for writing at once. When a hub needs both its provider's
/// cache and its own, it takes the provider's first.
pub struct HubNode<T: TimedItem> {
    name: String,
    config: HubConfig,
    cache: Mutex<StreamCache<T>>,
    observers: ObserverRegistry<T>,
    faulted: AtomicBool,
}

impl<T: TimedItem> HubNode<T> {
    pub fn new(name: impl Into<String>, config: HubConfig) -> Self {
        Self {
            name: name.into(),
            config,
            cache: Mutex::new(StreamCache::new(config.max_cache_size)),
            observers: ObserverRegistry::new(),
            faulted: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> HubConfig {
        self.config
    }

    pub fn lock(&self) -> MutexGuard<'_, StreamCache<T>> {
        self.cache.lock()
    }

    pub fn results(&self) -> Vec<T> {
        self.cache.lock().to_vec()
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    pub fn reset_fault(&self) {
        if self.faulted.swap(false, Ordering::AcqRel) {
            debug!("{}: fault cleared", self.name);
        }
        self.cache.lock().reset_arrivals();
    }

    /// Reject mutations while faulted.
    pub fn ensure_active(&self) -> HubResult<()> {
        if self.is_faulted() {
            return Err(HubError::faulted(&self.name));
        }
        Ok(())
    }

    pub fn subscribe(&self, observer: Weak<dyn StreamObserver<T>>) -> SubscriptionId {
        let id = self.observers.subscribe(observer);
        debug!("{}: registered observer {}", self.name, id);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.observers.unsubscribe(id);
        if removed {
            debug!("{}: removed observer {}", self.name, id);
        }
        removed
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Announce a prune (if any) followed by a new item at `index`.
    pub fn announce(&self, item: &T, index: usize, pruned: Option<Pruned>) -> HubResult<()> {
        if let Some(pruned) = pruned {
            self.notify_prune(pruned.to)?;
        }
        self.notify_add(item, index)
    }

    /// Deliver to every live observer in order. A failing observer does not
    /// stop delivery to the rest; the first error is returned afterwards.
    fn fan_out(&self, mut deliver: impl FnMut(&dyn StreamObserver<T>) -> HubResult<()>) -> HubResult<()> {
        let mut first_error = None;
        for observer in self.observers.live() {
            if let Err(error) = deliver(observer.as_ref()) {
                debug!("{}: observer failed: {}", self.name, error);
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn notify_add(&self, item: &T, index: usize) -> HubResult<()> {
        trace!("{}: add {} at {}", self.name, item.timestamp(), index);
        self.fan_out(|observer| observer.on_add(item, Some(index)))
    }

    pub fn notify_rebuild(&self, from: DateTime<Utc>) -> HubResult<()> {
        debug!("{}: rebuild from {}", self.name, from);
        self.fan_out(|observer| observer.on_rebuild(from))
    }

    pub fn notify_prune(&self, to: DateTime<Utc>) -> HubResult<()> {
        debug!("{}: pruned through {}", self.name, to);
        self.fan_out(|observer| observer.on_prune(to))
    }

    pub fn notify_error(&self, error: &HubError) {
        for observer in self.observers.live() {
            observer.on_error(error);
        }
    }

    /// Notify completion and release every observer. A second call finds
    /// the registry empty and does nothing.
    pub fn end_transmission(&self) {
        let observers = self.observers.drain();
        if observers.is_empty() {
            return;
        }
        debug!("{}: ending transmission to {} observers", self.name, observers.len());
        for observer in observers {
            observer.on_complete();
        }
    }

    /// Trip the overflow guard: fault, tell observers, end transmission.
    pub fn overflow(&self) -> HubError {
        let error = HubError::overflow(&self.name);
        self.faulted.store(true, Ordering::Release);
        warn!("{}", error);
        self.notify_error(&error);
        self.end_transmission();
        error
    }
}

impl<T: TimedItem> fmt::Debug for HubNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubNode")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("observers", &self.observer_count())
            .field("faulted", &self.is_faulted())
            .finish()
    }
}
