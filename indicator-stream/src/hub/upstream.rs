use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{HubError, HubResult};

use super::{Provider, StreamObserver, SubscriptionId, TimedItem};

/// Non-owning link from a hub to the provider it observes.
///
/// The provider's lifetime is independent of the hub; once it is dropped
/// every operation that needs it fails with `NullInput`.
pub(crate) struct Upstream<I: TimedItem> {
    provider: Weak<dyn super::StreamObservable<Item = I>>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl<I: TimedItem> Upstream<I> {
    pub(crate) fn new(provider: &Provider<I>) -> Self {
        Self {
            provider: Arc::downgrade(provider),
            subscription: Mutex::new(None),
        }
    }

    pub(crate) fn get(&self) -> HubResult<Provider<I>> {
        self.provider
            .upgrade()
            .ok_or_else(|| HubError::null_input("provider"))
    }

    /// Subscribe `observer`, replacing any earlier subscription.
    pub(crate) fn attach(&self, observer: Weak<dyn StreamObserver<I>>) -> HubResult<()> {
        let provider = self.get()?;
        let mut subscription = self.subscription.lock();
        if let Some(old) = subscription.take() {
            provider.unsubscribe(old);
        }
        *subscription = Some(provider.subscribe(observer));
        Ok(())
    }

    /// Drop the subscription, if any. Returns true when one was removed.
    pub(crate) fn detach(&self) -> bool {
        let Some(id) = self.subscription.lock().take() else {
            return false;
        };
        match self.provider.upgrade() {
            Some(provider) => provider.unsubscribe(id),
            None => false,
        }
    }

    /// Forget the subscription after the provider ended transmission.
    pub(crate) fn forget(&self) {
        self.subscription.lock().take();
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// Same provider instance as `other`.
    pub(crate) fn same_provider(&self, other: &Upstream<I>) -> bool {
        self.provider.as_ptr() as *const () == other.provider.as_ptr() as *const ()
    }
}
