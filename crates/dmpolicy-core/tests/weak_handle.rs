//! Cross-thread handle behavior.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::thread;

use dmpolicy_core::handle::{OwnerLoop, WeakHandle};

#[derive(Default)]
struct Counter {
    hits: Cell<u32>,
    log: RefCell<Vec<String>>,
    caller: Cell<Option<thread::ThreadId>>,
}

impl Counter {
    fn hit(&self, tag: &str) {
        self.hits.set(self.hits.get() + 1);
        self.log.borrow_mut().push(tag.to_string());
        self.caller.set(Some(thread::current().id()));
    }
}

#[test]
fn uninitialized_handle() {
    let h: WeakHandle<Counter> = WeakHandle::default();
    assert!(!h.is_initialized());
}

#[test]
fn initialized_does_not_imply_alive() {
    let owner = OwnerLoop::new();
    let target = Rc::new(Counter::default());
    let h = WeakHandle::new(&target, &owner.proxy());
    drop(target);

    assert!(h.is_initialized());
    assert!(h.get().upgrade().is_none());
}

#[test]
fn get_on_owner_returns_live_target() {
    let owner = OwnerLoop::new();
    let target = Rc::new(Counter::default());
    let h = WeakHandle::new(&target, &owner.proxy());

    let got = h.get().upgrade().expect("alive");
    assert!(Rc::ptr_eq(&got, &target));
}

#[test]
fn invoke_on_owner_is_deferred() {
    let mut owner = OwnerLoop::new();
    let target = Rc::new(Counter::default());
    let h = WeakHandle::new(&target, &owner.proxy());

    h.invoke(|c| c.hit("same-thread"));
    assert_eq!(target.hits.get(), 0);

    assert_eq!(owner.run_pending(), 1);
    assert_eq!(target.hits.get(), 1);
}

#[test]
fn invoke_from_worker_runs_on_owner() {
    let mut owner = OwnerLoop::new();
    let target = Rc::new(Counter::default());
    let h = WeakHandle::new(&target, &owner.proxy());

    let worker = h.clone();
    let tag = String::from("from-worker");
    thread::spawn(move || worker.invoke(move |c| c.hit(&tag)))
        .join()
        .unwrap();

    owner.run_pending();
    assert_eq!(target.hits.get(), 1);
    assert_eq!(target.log.borrow().as_slice(), ["from-worker"]);
    assert_eq!(target.caller.get(), Some(thread::current().id()));
}

#[test]
fn invocation_after_target_drop_is_silent() {
    let mut owner = OwnerLoop::new();
    let target = Rc::new(Counter::default());
    let h = WeakHandle::new(&target, &owner.proxy());

    h.invoke(|c| c.hit("queued-before-drop"));
    drop(target);
    thread::spawn({
        let h = h.clone();
        move || h.invoke(|c| c.hit("sent-after-drop"))
    })
    .join()
    .unwrap();

    assert_eq!(owner.run_pending(), 2);
}

#[test]
fn copies_deliver_then_both_go_inert() {
    let mut owner = OwnerLoop::new();
    let target = Rc::new(Counter::default());
    let a = WeakHandle::new(&target, &owner.proxy());
    let b = a.clone();

    a.invoke(|c| c.hit("a"));
    b.invoke(|c| c.hit("b"));
    owner.run_pending();
    assert_eq!(target.hits.get(), 2);

    let weak_target = Rc::downgrade(&target);
    drop(target);
    a.invoke(|c| c.hit("a-late"));
    b.invoke(|c| c.hit("b-late"));
    owner.run_pending();
    assert!(weak_target.upgrade().is_none());
}

#[test]
fn get_off_owner_aborts() {
    let owner = OwnerLoop::new();
    let target = Rc::new(Counter::default());
    let h = WeakHandle::new(&target, &owner.proxy());

    let res = thread::spawn(move || {
        let _ = h.get();
    })
    .join();
    assert!(res.is_err(), "get() off the owning context must panic");
}

#[test]
#[should_panic(expected = "uninitialized")]
fn invoke_on_uninitialized_aborts() {
    let h: WeakHandle<Counter> = WeakHandle::empty();
    h.invoke(|c| c.hit("never"));
}

#[test]
fn reset_uninitializes_only_that_copy() {
    let mut owner = OwnerLoop::new();
    let target = Rc::new(Counter::default());
    let mut a = WeakHandle::new(&target, &owner.proxy());
    let b = a.clone();

    a.reset();
    assert!(!a.is_initialized());
    b.invoke(|c| c.hit("b"));
    owner.run_pending();
    assert_eq!(target.hits.get(), 1);
}

#[test]
fn dropped_loop_discards_invocations() {
    let owner = OwnerLoop::new();
    let target = Rc::new(Counter::default());
    let h = WeakHandle::new(&target, &owner.proxy());
    drop(owner);

    h.invoke(|c| c.hit("nowhere"));
    assert_eq!(target.hits.get(), 0);
}
