//! `WeakHandle<T>`: invoke methods on an owning-context object from any thread.
//!
//! The target lives in an `Rc` on its owning thread. The handle never holds
//! the `rc::Weak` itself; it lives in a per-thread slot table on the owner and
//! the shared core only carries the slot id. That keeps the core `Send + Sync`
//! while the weak reference is created, upgraded, and released only on the
//! owning thread.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::context::LoopProxy;

thread_local! {
    // slot id -> rc::Weak<T> (type-erased)
    static SLOTS: RefCell<HashMap<u64, Box<dyn Any>>> = RefCell::new(HashMap::new());
}

static NEXT_SLOT: AtomicU64 = AtomicU64::new(1);

/// Abort on a caller bug. Off-context access must never be tolerated.
#[cold]
#[allow(clippy::panic)]
fn contract_violation(what: &str) -> ! {
    panic!("WeakHandle contract violation: {what}");
}

fn release_slot(slot: u64) {
    // try_with: the owner thread may already be tearing down its locals.
    let released = SLOTS.try_with(|s| s.borrow_mut().remove(&slot));
    drop(released);
}

/// Shared state behind every copy of a handle.
struct HandleCore<T: 'static> {
    proxy: LoopProxy,
    slot: u64,
    _target: PhantomData<fn() -> T>,
}

impl<T: 'static> HandleCore<T> {
    fn new(target: Weak<T>, proxy: &LoopProxy) -> Self {
        if !proxy.is_current() {
            contract_violation("handle created off the owning context");
        }
        let slot = NEXT_SLOT.fetch_add(1, Ordering::Relaxed);
        SLOTS.with(|s| {
            s.borrow_mut().insert(slot, Box::new(target));
        });
        Self {
            proxy: proxy.clone(),
            slot,
            _target: PhantomData,
        }
    }

    fn ensure_owner(&self, op: &str) {
        if !self.proxy.is_current() {
            contract_violation(op);
        }
    }

    fn weak(&self) -> Weak<T> {
        SLOTS
            .try_with(|s| {
                s.borrow()
                    .get(&self.slot)
                    .and_then(|b| b.downcast_ref::<Weak<T>>())
                    .cloned()
            })
            .ok()
            .flatten()
            .unwrap_or_default()
    }

    fn call<F: FnOnce(&T)>(&self, f: F) {
        self.ensure_owner("invocation ran off the owning context");
        // Upgrade with the slot table released: `f` may create or drop handles.
        let Some(target) = self.weak().upgrade() else {
            tracing::trace!(slot = self.slot, "handle target gone; invocation dropped");
            return;
        };
        f(target.as_ref());
    }
}

impl<T: 'static> Drop for HandleCore<T> {
    fn drop(&mut self) {
        let slot = self.slot;
        if self.proxy.is_current() {
            release_slot(slot);
        } else if !self.proxy.post(Box::new(move || release_slot(slot))) {
            tracing::trace!(slot, "owning context gone; handle slot not released");
        }
    }
}

/// Copyable, cross-thread reference to an object owned by one context.
///
/// - `new`/`from_weak` and `get` must run on the owning context; anything
///   else panics.
/// - `invoke` may run anywhere. The closure is posted to the owning context
///   and executed there only if the target is still alive; otherwise it is
///   silently dropped.
pub struct WeakHandle<T: 'static> {
    core: Option<Arc<HandleCore<T>>>,
}

impl<T: 'static> WeakHandle<T> {
    /// Handle to `target`, owned by the context behind `proxy`.
    pub fn new(target: &Rc<T>, proxy: &LoopProxy) -> Self {
        Self::from_weak(Rc::downgrade(target), proxy)
    }

    /// Handle from an existing weak reference (e.g. inside `Rc::new_cyclic`).
    pub fn from_weak(target: Weak<T>, proxy: &LoopProxy) -> Self {
        Self {
            core: Some(Arc::new(HandleCore::new(target, proxy))),
        }
    }

    /// Uninitialized handle.
    pub fn empty() -> Self {
        Self { core: None }
    }

    /// True iff built from a weak reference. Says nothing about liveness.
    pub fn is_initialized(&self) -> bool {
        self.core.is_some()
    }

    /// Drop this copy's share of the core.
    pub fn reset(&mut self) {
        self.core = None;
    }

    /// True if called on the owning context of an initialized handle.
    pub fn is_on_owner(&self) -> bool {
        self.core.as_ref().is_some_and(|c| c.proxy.is_current())
    }

    fn core(&self) -> &Arc<HandleCore<T>> {
        match &self.core {
            Some(core) => core,
            None => contract_violation("use of an uninitialized handle"),
        }
    }

    /// The wrapped weak reference. Owning context only.
    pub fn get(&self) -> Weak<T> {
        let core = self.core();
        core.ensure_owner("get() called off the owning context");
        core.weak()
    }

    /// Run `f` against the target on its owning context.
    ///
    /// Always goes through the owner's task queue, even when called on the
    /// owner. Captured values move with the closure.
    pub fn invoke<F>(&self, f: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let core = Arc::clone(self.core());
        let proxy = core.proxy.clone();
        if !proxy.post(Box::new(move || core.call(f))) {
            tracing::trace!("owning context gone; invocation dropped");
        }
    }
}

impl<T: 'static> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T: 'static> Default for WeakHandle<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: 'static> fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.core {
            Some(core) => f
                .debug_struct("WeakHandle")
                .field("slot", &core.slot)
                .field("owner", &core.proxy.owner())
                .finish(),
            None => f.write_str("WeakHandle(uninitialized)"),
        }
    }
}
