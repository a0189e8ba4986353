//! Vireo Assets - asynchronous asset loading and lifecycle scheduling.
//!
//! Assets are reference-counted, type-tagged records addressed by a hashed
//! string id. Loading an asset means enqueueing a task: an ordered list of
//! actions, each tagged with the thread it must run on. Worker threads run
//! ordinary actions; actions that touch the graphics context are marshaled
//! to the GPU thread, which drives the scheduler once per frame.
//!
//! # Example
//!
//! ```ignore
//! use vireo_assets::prelude::*;
//!
//! #[derive(Default)]
//! struct Texture {
//!     pixels: Vec<u8>,
//! }
//!
//! impl AssetKind for Texture {
//!     const TYPE: AssetType = AssetType::Tex;
//! }
//!
//! let scheduler = AssetScheduler::new(SchedulerConfig::default())?;
//! let (lookup, texture) = scheduler.registry().find_or_create::<Texture>("stone.png");
//! if lookup.is_created() {
//!     let task = AssetTask::builder(&texture, Vec::new())
//!         .action(ThreadAffinity::Worker, |cx, _, bytes| {
//!             *bytes = cx.read_file("stone.png").unwrap_or_default();
//!             !bytes.is_empty()
//!         })
//!         .action(ThreadAffinity::Gpu, |_, asset, bytes| {
//!             asset.write(|tex: &mut Texture| tex.pixels = std::mem::take(bytes));
//!             asset.set_state(AssetState::Loaded);
//!             true
//!         })
//!         .build();
//!     scheduler.enqueue(task);
//! }
//! scheduler.block_until(&texture, AssetState::Loaded);
//! ```

/// Log an error and abort the process. Used for usage errors that leave the
/// asset system in an undefined state. Unit tests panic instead so the
/// failure can be asserted.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        tracing::error!($($arg)*);
        #[cfg(test)]
        panic!($($arg)*);
        #[cfg(not(test))]
        std::process::abort();
    }};
}
pub(crate) use fatal;

pub mod config;
pub mod error;
pub mod event;
mod gpu;
pub mod id;
pub mod io;
mod queue;
pub mod record;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod task;
mod worker;

pub use config::SchedulerConfig;
pub use error::{AssetError, AssetResult};
pub use event::LoadSubscription;
pub use id::{AssetId, AssetKey, string_hash};
pub use io::AssetFiles;
pub use record::{AssetHandle, AssetKind, AssetRecord};
pub use registry::{AssetRegistry, Lookup};
pub use scheduler::AssetScheduler;
pub use state::{AssetState, AssetType};
pub use task::{ActionContext, AssetTask, LoadAction, TaskBuilder, ThreadAffinity, sort_key};
pub use worker::is_worker_thread;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::SchedulerConfig;
    pub use crate::error::{AssetError, AssetResult};
    pub use crate::record::{AssetHandle, AssetKind};
    pub use crate::registry::{AssetRegistry, Lookup};
    pub use crate::scheduler::AssetScheduler;
    pub use crate::state::{AssetState, AssetType};
    pub use crate::task::{ActionContext, AssetTask, ThreadAffinity};
}
