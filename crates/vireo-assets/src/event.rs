//! "On load" notifications.
//!
//! Completed tasks stage a load event for their asset; the main thread
//! dispatches the staged batch during
//! [`AssetScheduler::step`](crate::AssetScheduler::step).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use vireo_core::alloc::HashMap;
use vireo_core::profiling::profile_function;

use crate::record::AssetHandle;
use crate::registry::AssetRegistry;

/// Identifies one `on_load` subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadSubscription(u64);

type LoadCallback = Arc<dyn Fn(&AssetHandle) + Send + Sync>;

struct Subscription {
    id: LoadSubscription,
    asset: AssetHandle,
    callback: LoadCallback,
}

/// Load subscriptions and the batch of staged events.
#[derive(Default)]
pub(crate) struct LoadEvents {
    /// Keyed by [`AssetHandle::key`].
    subscriptions: Mutex<HashMap<usize, Vec<Subscription>>>,
    /// Each staged asset holds a reference until dispatched.
    staged: Mutex<Vec<AssetHandle>>,
    next_id: AtomicU64,
}

impl LoadEvents {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Subscribe to load events for `asset`.
    ///
    /// If the asset is already loaded the callback runs immediately, unless
    /// an event for it is already staged and will deliver it anyway.
    pub(crate) fn on_load(
        &self,
        asset: &AssetHandle,
        callback: impl Fn(&AssetHandle) + Send + Sync + 'static,
    ) -> LoadSubscription {
        let id = LoadSubscription(self.next_id.fetch_add(1, Ordering::Relaxed));
        let callback: LoadCallback = Arc::new(callback);

        // Same lock order as `dispatch`: it either sees this subscription or
        // has already taken the staged event.
        let already_staged = {
            let mut subscriptions = self.subscriptions.lock();
            subscriptions.entry(asset.key()).or_default().push(Subscription {
                id,
                asset: asset.clone(),
                callback: callback.clone(),
            });
            self.staged.lock().contains(asset)
        };

        if asset.state().is_loaded() && !already_staged {
            callback(asset);
        }
        id
    }

    /// Remove one subscription, or every subscription for the asset when
    /// `id` is `None`. Returns how many were removed.
    pub(crate) fn on_load_remove(&self, asset: &AssetHandle, id: Option<LoadSubscription>) -> usize {
        let mut subscriptions = self.subscriptions.lock();
        let Some(list) = subscriptions.get_mut(&asset.key()) else {
            return 0;
        };
        let before = list.len();
        match id {
            Some(id) => list.retain(|subscription| subscription.id != id),
            None => list.clear(),
        }
        let removed = before - list.len();
        if list.is_empty() {
            subscriptions.remove(&asset.key());
        }
        removed
    }

    /// Queue a load event for `asset`.
    pub(crate) fn stage(&self, asset: &AssetHandle, registry: &AssetRegistry) {
        registry.addref(asset);
        self.staged.lock().push(asset.clone());
    }

    #[cfg(test)]
    pub(crate) fn staged_len(&self) -> usize {
        self.staged.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn subscription_count(&self) -> usize {
        self.subscriptions.lock().values().map(Vec::len).sum()
    }

    /// Deliver every staged event. Returns the number of callbacks run.
    pub(crate) fn dispatch(&self, registry: &AssetRegistry) -> usize {
        profile_function!();
        // Copied out so callbacks can (un)subscribe freely.
        let mut batch: Vec<(AssetHandle, LoadCallback)> = Vec::new();
        let staged = {
            let mut subscriptions = self.subscriptions.lock();
            let staged = std::mem::take(&mut *self.staged.lock());
            subscriptions.retain(|_, list| {
                list.retain(|subscription| !subscription.asset.is_destroyed());
                !list.is_empty()
            });
            for asset in &staged {
                if let Some(list) = subscriptions.get(&asset.key()) {
                    batch.extend(
                        list.iter()
                            .map(|subscription| (asset.clone(), subscription.callback.clone())),
                    );
                }
            }
            staged
        };

        for (asset, callback) in &batch {
            callback(asset);
        }

        for asset in &staged {
            registry.release(asset);
        }
        batch.len()
    }

    /// Drop every subscription and staged event.
    pub(crate) fn clear(&self, registry: &AssetRegistry) {
        self.subscriptions.lock().clear();
        let staged = std::mem::take(&mut *self.staged.lock());
        for asset in &staged {
            registry.release(asset);
        }
    }
}
