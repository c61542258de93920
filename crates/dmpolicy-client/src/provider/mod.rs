//! Policy fetch orchestrator.
//!
//! [`PolicyProvider`] serves cached policy synchronously and, in the
//! background, drives register -> fetch -> persist -> schedule refresh.
//! Backend responses and timers come back on other threads and are routed
//! onto the owning context through a single
//! [`WeakHandle`](dmpolicy_core::handle::WeakHandle).

mod orchestrator;
mod refresh;
mod state;

pub use orchestrator::{Collaborators, PolicyChanged, PolicyObserver, PolicyProvider};
pub use refresh::{next_refresh_delay, next_refresh_delay_with};
pub use state::Phase;
