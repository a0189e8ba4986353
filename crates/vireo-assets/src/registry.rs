//! The global list of live asset records and their reference counting.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use vireo_core::alloc::sparse_set::SparseSet;
use vireo_core::profiling::profile_function;

use crate::fatal;
use crate::id::{AssetId, AssetKey};
use crate::record::{AssetHandle, AssetKind, AssetRecord};
use crate::state::{AssetState, AssetType};

/// Whether [`AssetRegistry::find_or_create`] returned an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// A live record with that id already existed and was addref'd.
    Found,
    /// A fresh record was allocated with a single reference.
    Created,
}

impl Lookup {
    /// `true` if an existing record was returned.
    pub fn is_found(self) -> bool {
        self == Lookup::Found
    }

    /// `true` if a new record was created.
    pub fn is_created(self) -> bool {
        self == Lookup::Created
    }
}

/// Registry of every live asset record.
///
/// Lookups and insertion share one lock so that racing
/// [`find_or_create`](AssetRegistry::find_or_create) calls for the same id
/// always agree on a single record. Reference counts are atomics on the
/// records themselves and never take the lock.
pub struct AssetRegistry {
    records: Mutex<SparseSet<AssetHandle>>,
    /// Records whose count hit zero off the main thread, waiting for
    /// [`flush_destroy_queue`](AssetRegistry::flush_destroy_queue).
    destroy_queue: Mutex<Vec<AssetHandle>>,
    auto_ids: AtomicU64,
}

impl Default for AssetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(SparseSet::new()),
            destroy_queue: Mutex::new(Vec::new()),
            auto_ids: AtomicU64::new(0),
        }
    }

    fn scan(records: &SparseSet<AssetHandle>, id: AssetId, ty: AssetType) -> Option<&AssetHandle> {
        records
            .iter()
            .find(|record| record.id() == id && record.asset_type() == ty && record.refs() > 0)
    }

    /// Find a live record by id and type.
    ///
    /// Records whose count already reached zero are invisible, even if they
    /// have not been unlinked yet. The reference count is left untouched.
    pub fn find(&self, id: impl Into<AssetId>, ty: AssetType) -> Option<AssetHandle> {
        profile_function!();
        let id = id.into();
        let records = self.records.lock();
        Self::scan(&records, id, ty).cloned()
    }

    /// Like [`find`](AssetRegistry::find), but takes a reference on the
    /// record for the caller.
    pub fn find_addref(&self, id: impl Into<AssetId>, ty: AssetType) -> Option<AssetHandle> {
        profile_function!();
        let id = id.into();
        let records = self.records.lock();
        records
            .iter()
            .find(|record| {
                record.id() == id && record.asset_type() == ty && record.try_increment()
            })
            .cloned()
    }

    /// Find a live `T` with this id and take a reference on it, or create a
    /// new one holding a single reference.
    pub fn find_or_create<T: AssetKind>(&self, key: impl Into<AssetKey>) -> (Lookup, AssetHandle) {
        profile_function!();
        let key = key.into();
        let mut records = self.records.lock();

        let found = records.iter().find(|record| {
            record.id() == key.id && record.asset_type() == T::TYPE && record.try_increment()
        });
        if let Some(found) = found {
            return (Lookup::Found, found.clone());
        }

        let handle = Self::insert::<T>(&mut records, key);
        tracing::trace!(asset = %handle.display_name(), ty = %T::TYPE, "Created asset");
        (Lookup::Created, handle)
    }

    /// Allocate a new anonymous `T` with an automatic unique id.
    pub fn create<T: AssetKind>(&self) -> AssetHandle {
        let mut records = self.records.lock();
        let name = loop {
            let n = self.auto_ids.fetch_add(1, Ordering::Relaxed);
            let candidate = format!("auto/asset_{n}");
            if Self::scan(&records, AssetId::from_name(&candidate), T::TYPE).is_none() {
                break candidate;
            }
        };
        Self::insert::<T>(&mut records, AssetKey::from(name))
    }

    fn insert<T: AssetKind>(records: &mut SparseSet<AssetHandle>, key: AssetKey) -> AssetHandle {
        let handle = AssetHandle::new(AssetRecord::new::<T>(key.id, key.name));
        let slot = records.push(handle.clone());
        handle.set_index(Some(slot));
        handle
    }

    /// Re-address a record under a new id.
    ///
    /// # Aborts
    ///
    /// In debug builds, aborts the process if another live record of the
    /// same type already uses the id.
    pub fn set_id(&self, asset: &AssetHandle, key: impl Into<AssetKey>) {
        let key = key.into();
        let records = self.records.lock();
        let taken = Self::scan(&records, key.id, asset.asset_type())
            .is_some_and(|existing| existing != asset);
        if cfg!(debug_assertions) && taken {
            drop(records);
            fatal!(
                "Asset id '{}' is already in use by another {} asset",
                key.name.as_deref().unwrap_or("<unnamed>"),
                asset.asset_type()
            );
        }
        asset.set_id(key.id, key.name);
    }

    /// Find a name derived from `root` that no live asset of this type uses:
    /// `root`, then `root1`, `root2`, ...
    pub fn unique_name(&self, ty: AssetType, root: &str) -> String {
        let records = self.records.lock();
        let mut candidate = root.to_string();
        let mut count = 1;
        while Self::scan(&records, AssetId::from_name(&candidate), ty).is_some() {
            candidate = format!("{root}{count}");
            count += 1;
        }
        candidate
    }

    /// Take an additional reference.
    ///
    /// # Aborts
    ///
    /// Aborts the process if the asset has already been destroyed.
    pub fn addref(&self, asset: &AssetHandle) {
        if asset.is_destroyed() {
            fatal!(
                "Added a reference to destroyed {} asset '{}'",
                asset.asset_type(),
                asset.display_name()
            );
        }
        let refs = asset.increment();
        if refs == 1 {
            // Pulled back from zero before the destroy queue got to it.
            tracing::debug!(asset = %asset.display_name(), "Asset rescued from pending destruction");
        }
    }

    /// Drop a reference, destroying the asset right away when it was the
    /// last one.
    ///
    /// The type-specific destructor runs on the calling thread, so use
    /// [`release_threadsafe`](AssetRegistry::release_threadsafe) from threads
    /// that must not touch main-thread resources.
    ///
    /// # Aborts
    ///
    /// Aborts the process if the count drops below zero (a double release).
    pub fn release(&self, asset: &AssetHandle) {
        let refs = asset.decrement();
        if refs < 0 {
            self.over_release(asset, refs);
        }
        if refs == 0 {
            self.destroy(asset);
        }
    }

    /// Drop a reference from any thread.
    ///
    /// When the count reaches zero the asset is queued instead of destroyed,
    /// and the next [`flush_destroy_queue`](AssetRegistry::flush_destroy_queue)
    /// on the main thread finishes the job, unless someone took a new
    /// reference in the meantime.
    ///
    /// # Aborts
    ///
    /// Aborts the process if the count drops below zero (a double release).
    pub fn release_threadsafe(&self, asset: &AssetHandle) {
        let refs = asset.decrement();
        if refs < 0 {
            self.over_release(asset, refs);
        }
        if refs == 0 {
            self.destroy_queue.lock().push(asset.clone());
        }
    }

    fn over_release(&self, asset: &AssetHandle, refs: i32) -> ! {
        fatal!(
            "Released too many references to {} asset '{}' (refs = {}, state = {:?})",
            asset.asset_type(),
            asset.display_name(),
            refs,
            asset.state()
        );
    }

    /// Point `slot` at `asset`, moving a reference from the old value to the
    /// new one. The new reference is taken first, so this is safe when both
    /// are the same asset.
    pub fn safe_swap_ref(&self, slot: &mut Option<AssetHandle>, asset: Option<&AssetHandle>) {
        if let Some(asset) = asset {
            self.addref(asset);
        }
        if let Some(old) = slot.take() {
            self.release(&old);
        }
        *slot = asset.cloned();
    }

    /// Destroy everything queued by
    /// [`release_threadsafe`](AssetRegistry::release_threadsafe) that is
    /// still at zero references. Returns the number of assets destroyed.
    pub fn flush_destroy_queue(&self) -> usize {
        profile_function!();
        let queued = std::mem::take(&mut *self.destroy_queue.lock());
        let mut destroyed = 0;
        for asset in queued {
            if asset.refs() == 0 {
                if self.destroy(&asset) {
                    destroyed += 1;
                }
            } else {
                tracing::trace!(asset = %asset.display_name(), refs = asset.refs(), "Skipping rescued asset");
            }
        }
        destroyed
    }

    /// Number of assets waiting in the destroy queue.
    pub fn pending_destroy_count(&self) -> usize {
        self.destroy_queue.lock().len()
    }

    /// Run the destructor (once) and unlink the record. Returns `false` if
    /// the asset had already been destroyed.
    fn destroy(&self, asset: &AssetHandle) -> bool {
        let Some(mut contents) = asset.begin_destroy() else {
            return false;
        };
        tracing::trace!(asset = %asset.display_name(), ty = %asset.asset_type(), "Destroying asset");

        // No lock is held here: destructors may release other assets.
        contents.destroy_erased(self);
        drop(contents);

        if let Some(slot) = asset.index() {
            let mut records = self.records.lock();
            if records.try_get(slot) == Some(asset) {
                records.remove(slot);
            }
        }
        asset.set_index(None);
        asset.set_state(AssetState::None);
        true
    }

    /// Number of records currently linked into the registry.
    pub fn count(&self) -> usize {
        self.records.lock().len()
    }

    /// The `index`-th record in registry order.
    pub fn get_index(&self, index: usize) -> Option<AssetHandle> {
        self.records.lock().iter().nth(index).cloned()
    }

    /// Handles to every record currently linked into the registry.
    pub fn snapshot(&self) -> Vec<AssetHandle> {
        self.records.lock().iter().cloned().collect()
    }

    /// Log every asset that is still alive. Returns how many there were.
    ///
    /// Intended for shutdown, where anything left over is a leaked
    /// reference. Per-asset details are only logged in debug builds.
    pub fn report_leaks(&self) -> usize {
        let leaked: Vec<AssetHandle> = self
            .records
            .lock()
            .iter()
            .filter(|record| record.refs() > 0)
            .cloned()
            .collect();

        if leaked.is_empty() {
            return 0;
        }

        if cfg!(debug_assertions) {
            for asset in &leaked {
                tracing::warn!(
                    ty = %asset.asset_type(),
                    asset = %asset.display_name(),
                    refs = asset.refs(),
                    "Unreleased asset"
                );
            }
        }
        tracing::error!("{} unreleased assets still found in the asset registry!", leaked.len());
        leaked.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct TestTex {
        width: u32,
    }

    impl AssetKind for TestTex {
        const TYPE: AssetType = AssetType::Tex;
    }

    #[derive(Default)]
    struct TestShader;

    impl AssetKind for TestShader {
        const TYPE: AssetType = AssetType::Shader;
    }

    static MATERIALS_DESTROYED: AtomicUsize = AtomicUsize::new(0);

    /// A material that owns a reference to its texture.
    #[derive(Default)]
    struct TestMaterial {
        texture: Option<AssetHandle>,
    }

    impl AssetKind for TestMaterial {
        const TYPE: AssetType = AssetType::Material;

        fn destroy(&mut self, registry: &AssetRegistry) {
            MATERIALS_DESTROYED.fetch_add(1, Ordering::SeqCst);
            registry.safe_swap_ref(&mut self.texture, None);
        }
    }

    #[test]
    fn test_find_or_create() {
        let registry = AssetRegistry::new();
        let (lookup, tex) = registry.find_or_create::<TestTex>("stone.png");
        assert!(lookup.is_created());
        assert_eq!(tex.refs(), 1);
        assert_eq!(tex.name().as_deref(), Some("stone.png"));
        assert!(tex.index().is_some());

        let (lookup, again) = registry.find_or_create::<TestTex>("stone.png");
        assert!(lookup.is_found());
        assert_eq!(again, tex);
        assert_eq!(tex.refs(), 2);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_same_id_different_type() {
        let registry = AssetRegistry::new();
        let (_, tex) = registry.find_or_create::<TestTex>("default");
        let (lookup, shader) = registry.find_or_create::<TestShader>("default");
        assert!(lookup.is_created());
        assert_ne!(tex, shader);
        assert_eq!(registry.find("default", AssetType::Shader), Some(shader));
    }

    #[test]
    fn test_find_has_no_side_effects() {
        let registry = AssetRegistry::new();
        let (_, tex) = registry.find_or_create::<TestTex>("a.png");
        let found = registry.find("a.png", AssetType::Tex).unwrap();
        assert_eq!(found, tex);
        assert_eq!(tex.refs(), 1);
        assert!(registry.find("b.png", AssetType::Tex).is_none());
        assert!(registry.find("a.png", AssetType::Mesh).is_none());

        let found = registry.find_addref("a.png", AssetType::Tex).unwrap();
        assert_eq!(found.refs(), 2);
    }

    #[test]
    fn test_release_destroys_and_unlinks() {
        let registry = AssetRegistry::new();
        let (_, tex) = registry.find_or_create::<TestTex>("a.png");
        registry.addref(&tex);
        registry.release(&tex);
        assert!(tex.is_alive());
        assert_eq!(registry.count(), 1);

        registry.release(&tex);
        assert!(tex.is_destroyed());
        assert_eq!(tex.refs(), 0);
        assert_eq!(tex.index(), None);
        assert_eq!(registry.count(), 0);
        assert!(registry.find("a.png", AssetType::Tex).is_none());
    }

    #[test]
    #[should_panic(expected = "Released too many references")]
    fn test_double_release_is_fatal() {
        let registry = AssetRegistry::new();
        let (_, tex) = registry.find_or_create::<TestTex>("a.png");
        registry.release(&tex);
        registry.release(&tex);
    }

    #[test]
    #[should_panic(expected = "destroyed")]
    fn test_addref_after_destroy_is_fatal() {
        let registry = AssetRegistry::new();
        let (_, tex) = registry.find_or_create::<TestTex>("a.png");
        registry.release(&tex);
        registry.addref(&tex);
    }

    #[test]
    fn test_release_threadsafe_defers_destruction() {
        let registry = AssetRegistry::new();
        let (_, tex) = registry.find_or_create::<TestTex>("a.png");
        registry.release_threadsafe(&tex);

        assert!(!tex.is_destroyed());
        assert_eq!(registry.pending_destroy_count(), 1);
        // Already invisible to lookups
        assert!(registry.find("a.png", AssetType::Tex).is_none());

        assert_eq!(registry.flush_destroy_queue(), 1);
        assert!(tex.is_destroyed());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_rescue_from_destroy_queue() {
        let registry = AssetRegistry::new();
        let (_, tex) = registry.find_or_create::<TestTex>("a.png");
        registry.release_threadsafe(&tex);
        registry.addref(&tex);

        assert_eq!(registry.flush_destroy_queue(), 0);
        assert!(tex.is_alive());
        assert_eq!(registry.pending_destroy_count(), 0);
        assert_eq!(registry.find("a.png", AssetType::Tex), Some(tex.clone()));
    }

    #[test]
    fn test_lookup_skips_zero_ref_record() {
        let registry = AssetRegistry::new();
        let (_, old) = registry.find_or_create::<TestTex>("a.png");
        registry.release_threadsafe(&old);

        let (lookup, fresh) = registry.find_or_create::<TestTex>("a.png");
        assert!(lookup.is_created());
        assert_ne!(fresh, old);

        registry.flush_destroy_queue();
        assert!(old.is_destroyed());
        assert!(fresh.is_alive());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_safe_swap_ref() {
        let registry = AssetRegistry::new();
        let (_, a) = registry.find_or_create::<TestTex>("a.png");
        let (_, b) = registry.find_or_create::<TestTex>("b.png");

        let mut slot = None;
        registry.safe_swap_ref(&mut slot, Some(&a));
        assert_eq!(a.refs(), 2);

        // Swapping in the same asset must never pass through zero
        registry.release(&a);
        registry.safe_swap_ref(&mut slot, Some(&a));
        assert!(a.is_alive());
        assert_eq!(a.refs(), 1);

        registry.safe_swap_ref(&mut slot, Some(&b));
        assert!(a.is_destroyed());
        assert_eq!(b.refs(), 2);
        assert_eq!(slot.as_ref(), Some(&b));

        registry.safe_swap_ref(&mut slot, None);
        assert_eq!(b.refs(), 1);
        assert!(slot.is_none());
    }

    #[test]
    fn test_destructor_releases_dependencies() {
        let registry = AssetRegistry::new();
        let (_, tex) = registry.find_or_create::<TestTex>("albedo.png");
        let (_, mat) = registry.find_or_create::<TestMaterial>("stone");
        mat.write(|m: &mut TestMaterial| registry.safe_swap_ref(&mut m.texture, Some(&tex)));
        registry.release(&tex);
        assert!(tex.is_alive());

        let before = MATERIALS_DESTROYED.load(Ordering::SeqCst);
        registry.release(&mat);
        assert!(MATERIALS_DESTROYED.load(Ordering::SeqCst) > before);
        assert!(tex.is_destroyed());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_unique_name_and_create() {
        let registry = AssetRegistry::new();
        assert_eq!(registry.unique_name(AssetType::Tex, "zbuffer/"), "zbuffer/");
        let (_, _a) = registry.find_or_create::<TestTex>("zbuffer/");
        let (_, _b) = registry.find_or_create::<TestTex>("zbuffer/1");
        assert_eq!(registry.unique_name(AssetType::Tex, "zbuffer/"), "zbuffer/2");
        // Other types don't collide
        assert_eq!(registry.unique_name(AssetType::Mesh, "zbuffer/"), "zbuffer/");

        let first = registry.create::<TestTex>();
        let second = registry.create::<TestTex>();
        assert_ne!(first.id(), second.id());
        assert!(first.name().unwrap().starts_with("auto/asset_"));
    }

    #[test]
    fn test_set_id() {
        let registry = AssetRegistry::new();
        let tex = registry.create::<TestTex>();
        registry.set_id(&tex, "renamed.png");
        assert_eq!(registry.find("renamed.png", AssetType::Tex), Some(tex.clone()));
        // Re-assigning its own id is fine
        registry.set_id(&tex, "renamed.png");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "already in use")]
    fn test_set_id_duplicate_is_fatal_in_debug() {
        let registry = AssetRegistry::new();
        let (_, _a) = registry.find_or_create::<TestTex>("taken.png");
        let b = registry.create::<TestTex>();
        registry.set_id(&b, "taken.png");
    }

    #[test]
    fn test_enumeration_and_leaks() {
        let registry = AssetRegistry::new();
        let (_, a) = registry.find_or_create::<TestTex>("a.png");
        let (_, b) = registry.find_or_create::<TestShader>("b");
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.get_index(0), Some(a.clone()));
        assert_eq!(registry.get_index(1), Some(b.clone()));
        assert_eq!(registry.get_index(2), None);
        assert_eq!(registry.snapshot().len(), 2);

        assert_eq!(registry.report_leaks(), 2);
        registry.release(&a);
        registry.release(&b);
        assert_eq!(registry.report_leaks(), 0);
    }

    #[test]
    fn test_concurrent_find_or_create_creates_once() {
        let registry = Arc::new(AssetRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| registry.find_or_create::<TestTex>("shared.png"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<_> = threads.into_iter().flat_map(|t| t.join().unwrap()).collect();
        let created = results.iter().filter(|(lookup, _)| lookup.is_created()).count();
        assert_eq!(created, 1);

        let first = &results[0].1;
        assert!(results.iter().all(|(_, handle)| handle == first));
        assert_eq!(first.refs(), results.len() as i32);

        for (_, handle) in &results {
            registry.release(handle);
        }
        assert!(first.is_destroyed());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_typed_contents_survive_lookup() {
        let registry = AssetRegistry::new();
        let (_, tex) = registry.find_or_create::<TestTex>("a.png");
        tex.write(|t: &mut TestTex| t.width = 512);
        let (_, again) = registry.find_or_create::<TestTex>("a.png");
        assert_eq!(again.read(|t: &TestTex| t.width), Some(512));
    }
}
