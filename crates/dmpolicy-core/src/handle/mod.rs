//! Cross-context delivery onto a single owning context.
//!
//! - [`OwnerLoop`]: the task loop an owning thread runs.
//! - [`LoopProxy`]: cloneable, `Send + Sync` poster into that loop.
//! - [`WeakHandle`]: copyable reference to an owning-context object that can be
//!   invoked from any thread; calls run on the owner and only while the
//!   target is alive.

mod context;
mod weak_handle;

pub use context::{LoopProxy, OwnerLoop, Task};
pub use weak_handle::WeakHandle;
