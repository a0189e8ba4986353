//! Asset records and handles.
//!
//! An [`AssetRecord`] is the shared header every asset carries: its type tag,
//! id, reference count and load state, plus the type-specific contents.
//! Records live in the [`AssetRegistry`](crate::AssetRegistry) and are
//! referenced through [`AssetHandle`]s.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

use parking_lot::Mutex;
use vireo_core::alloc::sparse_set::IndexSlot;

use crate::id::AssetId;
use crate::registry::AssetRegistry;
use crate::state::{AssetState, AssetType};

/// Type-specific contents of an asset.
///
/// Records are created with `Default::default()` contents, the equivalent of
/// zeroed memory, and filled in by load actions.
///
/// # Example
///
/// ```ignore
/// #[derive(Default)]
/// struct Texture {
///     width: u32,
///     height: u32,
///     gpu_handle: Option<u64>,
/// }
///
/// impl AssetKind for Texture {
///     const TYPE: AssetType = AssetType::Tex;
///
///     fn destroy(&mut self, _registry: &AssetRegistry) {
///         // Free the GPU resource...
///     }
/// }
/// ```
pub trait AssetKind: Default + Send + 'static {
    /// The type tag records of this kind carry.
    const TYPE: AssetType;

    /// Type-specific destructor, run once when the last reference is
    /// released. Runs on the main thread unless the asset was released with
    /// a plain `release` from another thread.
    ///
    /// Assets that hold references to other assets should release them here.
    fn destroy(&mut self, _registry: &AssetRegistry) {}
}

/// Type-erased asset contents.
pub(crate) trait ErasedAsset: Send {
    fn type_name(&self) -> &'static str;

    fn destroy_erased(&mut self, registry: &AssetRegistry);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: AssetKind> ErasedAsset for T {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn destroy_erased(&mut self, registry: &AssetRegistry) {
        self.destroy(registry);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Shared header and contents of one asset.
pub struct AssetRecord {
    asset_type: AssetType,
    id: AtomicU64,
    name: Mutex<Option<String>>,
    refs: AtomicI32,
    state: AtomicI32,
    /// Encoded [`IndexSlot`] in the registry, 0 once unlinked.
    index: AtomicU64,
    destroyed: AtomicBool,
    data: Mutex<Option<Box<dyn ErasedAsset>>>,
}

impl AssetRecord {
    pub(crate) fn new<T: AssetKind>(id: AssetId, name: Option<String>) -> Self {
        Self {
            asset_type: T::TYPE,
            id: AtomicU64::new(id.value()),
            name: Mutex::new(name),
            refs: AtomicI32::new(1),
            state: AtomicI32::new(AssetState::None.code()),
            index: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
            data: Mutex::new(Some(Box::new(T::default()))),
        }
    }

    /// The type tag of this asset.
    pub fn asset_type(&self) -> AssetType {
        self.asset_type
    }

    /// The id this asset is addressed by.
    pub fn id(&self) -> AssetId {
        AssetId(self.id.load(Ordering::Acquire))
    }

    /// The string id, if the asset was given one.
    pub fn name(&self) -> Option<String> {
        self.name.lock().clone()
    }

    /// Name for diagnostics: the string id, or the hashed id when there is
    /// none.
    pub fn display_name(&self) -> String {
        match &*self.name.lock() {
            Some(name) => name.clone(),
            None => format!("#{}", self.id()),
        }
    }

    /// Current reference count.
    pub fn refs(&self) -> i32 {
        self.refs.load(Ordering::Acquire)
    }

    /// Current load state.
    pub fn state(&self) -> AssetState {
        AssetState::from_code(self.state.load(Ordering::Acquire))
    }

    /// Update the load state. Called by load actions as data becomes
    /// available.
    pub fn set_state(&self, state: AssetState) {
        self.state.store(state.code(), Ordering::Release);
    }

    /// `true` while the asset holds references and has not been destroyed.
    pub fn is_alive(&self) -> bool {
        self.refs() > 0 && !self.is_destroyed()
    }

    /// `true` once the type-specific destructor has run.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Position of this record in the registry, if it is still linked.
    pub fn index(&self) -> Option<IndexSlot> {
        IndexSlot::from_bits(self.index.load(Ordering::Acquire))
    }

    /// Run `f` with shared access to the contents.
    ///
    /// Returns `None` if the asset is not a `T` or has been destroyed.
    pub fn read<T: AssetKind, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let data = self.data.lock();
        data.as_ref()
            .and_then(|data| data.as_any().downcast_ref::<T>())
            .map(f)
    }

    /// Run `f` with exclusive access to the contents.
    ///
    /// Returns `None` if the asset is not a `T` or has been destroyed.
    pub fn write<T: AssetKind, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut data = self.data.lock();
        data.as_mut()
            .and_then(|data| data.as_any_mut().downcast_mut::<T>())
            .map(f)
    }

    /// Rust type name of the contents, `None` once destroyed.
    pub fn content_type_name(&self) -> Option<&'static str> {
        self.data.lock().as_ref().map(|data| data.type_name())
    }

    pub(crate) fn set_id(&self, id: AssetId, name: Option<String>) {
        self.id.store(id.value(), Ordering::Release);
        *self.name.lock() = name;
    }

    pub(crate) fn set_index(&self, slot: Option<IndexSlot>) {
        self.index
            .store(slot.map(IndexSlot::to_bits).unwrap_or(0), Ordering::Release);
    }

    /// Increment and return the new count.
    pub(crate) fn increment(&self) -> i32 {
        // Relaxed is enough: the caller already holds a reference, so no
        // other thread can be concurrently deciding to destroy the record.
        self.refs.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Increment only if the count is still positive. Used by lookups, which
    /// must not resurrect a record that is being destroyed.
    pub(crate) fn try_increment(&self) -> bool {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| {
                (refs > 0).then_some(refs + 1)
            })
            .is_ok()
    }

    /// Decrement and return the new count.
    pub(crate) fn decrement(&self) -> i32 {
        // AcqRel so that every write made while holding a reference is
        // visible to whichever thread ends up running the destructor.
        self.refs.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Flag the record as destroyed and hand back its contents. Only the
    /// first caller gets `Some`.
    pub(crate) fn begin_destroy(&self) -> Option<Box<dyn ErasedAsset>> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return None;
        }
        self.data.lock().take()
    }
}

impl fmt::Debug for AssetRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetRecord")
            .field("type", &self.asset_type)
            .field("id", &self.id())
            .field("name", &*self.name.lock())
            .field("refs", &self.refs())
            .field("state", &self.state())
            .finish()
    }
}

/// A reference to an [`AssetRecord`].
///
/// Cloning a handle is cheap and does **not** touch the asset's reference
/// count; ownership is tracked explicitly through
/// [`AssetRegistry::addref`] and [`AssetRegistry::release`]. Two handles are
/// equal when they point at the same record.
#[derive(Clone)]
pub struct AssetHandle(Arc<AssetRecord>);

impl AssetHandle {
    pub(crate) fn new(record: AssetRecord) -> Self {
        Self(Arc::new(record))
    }

    /// Identity key of the record, stable for the record's lifetime.
    pub(crate) fn key(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl Deref for AssetHandle {
    type Target = AssetRecord;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl PartialEq for AssetHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for AssetHandle {}

impl Hash for AssetHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Debug for AssetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct TestMesh {
        vertices: u32,
    }

    impl AssetKind for TestMesh {
        const TYPE: AssetType = AssetType::Mesh;
    }

    #[derive(Default)]
    struct TestFont;

    impl AssetKind for TestFont {
        const TYPE: AssetType = AssetType::Font;
    }

    fn make_handle() -> AssetHandle {
        AssetHandle::new(AssetRecord::new::<TestMesh>(
            AssetId::from("cube"),
            Some("cube".into()),
        ))
    }

    #[test]
    fn test_new_record_defaults() {
        let handle = make_handle();
        assert_eq!(handle.asset_type(), AssetType::Mesh);
        assert_eq!(handle.refs(), 1);
        assert_eq!(handle.state(), AssetState::None);
        assert_eq!(handle.index(), None);
        assert_eq!(handle.read(|mesh: &TestMesh| mesh.vertices), Some(0));
        assert!(handle.is_alive());
    }

    #[test]
    fn test_typed_access() {
        let handle = make_handle();
        handle.write(|mesh: &mut TestMesh| mesh.vertices = 24);
        assert_eq!(handle.read(|mesh: &TestMesh| mesh.vertices), Some(24));
        // Wrong type yields nothing rather than panicking
        assert_eq!(handle.read(|_: &TestFont| ()), None);
    }

    #[test]
    fn test_refcount_primitives() {
        let handle = make_handle();
        assert_eq!(handle.increment(), 2);
        assert_eq!(handle.decrement(), 1);
        assert_eq!(handle.decrement(), 0);
        assert!(!handle.try_increment());
        assert_eq!(handle.refs(), 0);
        assert!(!handle.is_alive());
    }

    #[test]
    fn test_begin_destroy_only_once() {
        let handle = make_handle();
        assert!(handle.begin_destroy().is_some());
        assert!(handle.begin_destroy().is_none());
        assert!(handle.is_destroyed());
        assert_eq!(handle.read(|mesh: &TestMesh| mesh.vertices), None);
        assert_eq!(handle.content_type_name(), None);
    }

    #[test]
    fn test_handle_identity() {
        let a = make_handle();
        let b = a.clone();
        let c = make_handle();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.key(), b.key());
        // Cloning a handle leaves the reference count alone
        assert_eq!(a.refs(), 1);
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        let handle = AssetHandle::new(AssetRecord::new::<TestMesh>(AssetId(0xabc), None));
        assert_eq!(handle.display_name(), "#0000000000000abc");
    }
}
