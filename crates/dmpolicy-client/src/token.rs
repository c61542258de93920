//! Token source seam.
//!
//! The token source lives on the owning context and signals auth-token
//! availability to its observers. Signals arrive on the owning context, so
//! observers are plain (non-`Send`) closures.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Signal emitted by a token source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenEvent {
    /// A usable auth token is available.
    Available,
    /// Token acquisition failed; retrying later may succeed.
    Error,
    /// The signed-in account is not subject to management.
    NotManaged,
}

pub type TokenObserver = Box<dyn Fn(TokenEvent)>;

/// Registration returned by [`TokenSource::add_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

pub trait TokenSource {
    /// Current auth token, if any.
    fn auth_token(&self) -> Option<String>;
    fn add_observer(&self, observer: TokenObserver) -> ObserverId;
    /// Unknown ids are ignored.
    fn remove_observer(&self, id: ObserverId);
}

/// In-process token source. Sign-in code (or a test) feeds it tokens.
#[derive(Default)]
pub struct TokenService {
    token: RefCell<Option<String>>,
    observers: RefCell<Vec<(ObserverId, Rc<dyn Fn(TokenEvent)>)>>,
    next_id: Cell<u64>,
}

impl TokenService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue_token(&self, token: impl Into<String>) {
        *self.token.borrow_mut() = Some(token.into());
        self.notify(TokenEvent::Available);
    }

    /// Forget the token (sign-out). No signal is emitted.
    pub fn clear_token(&self) {
        self.token.borrow_mut().take();
    }

    pub fn report_error(&self) {
        self.notify(TokenEvent::Error);
    }

    pub fn report_not_managed(&self) {
        self.notify(TokenEvent::NotManaged);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.borrow().len()
    }

    fn notify(&self, ev: TokenEvent) {
        // Copy out so observers may subscribe or unsubscribe while notified.
        let observers: Vec<_> = self
            .observers
            .borrow()
            .iter()
            .map(|(_, o)| Rc::clone(o))
            .collect();
        tracing::debug!(event = ?ev, observers = observers.len(), "token event");
        for observer in observers {
            observer(ev);
        }
    }
}

impl TokenSource for TokenService {
    fn auth_token(&self) -> Option<String> {
        self.token.borrow().clone()
    }

    fn add_observer(&self, observer: TokenObserver) -> ObserverId {
        let id = ObserverId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.observers.borrow_mut().push((id, Rc::from(observer)));
        id
    }

    fn remove_observer(&self, id: ObserverId) {
        self.observers.borrow_mut().retain(|(i, _)| *i != id);
    }
}
