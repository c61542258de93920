//! dmpolicy core: owning-context primitives, error types, and policy values.
//!
//! This crate defines the pieces shared by the client and any embedder: the
//! cross-thread [`handle::WeakHandle`] that delivers work onto an owning
//! context, the task loop that context runs, and the immutable policy
//! snapshot handed to consumers. It carries no transport or storage logic.
//!
//! # Defensive guarantees
//! `unwrap`, `expect`, and `panic!` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! The single exception is the fatal contract check in `handle`, which aborts
//! on off-context access instead of corrupting state.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod handle;
pub mod policy;

/// Shared result type.
pub use error::{BackendError, DmPolicyError, Result};
