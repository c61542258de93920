//! dmpolicy client library.
//!
//! Wires the policy fetch orchestrator to its collaborators: the management
//! backend, the persistent cache, and the token source. Also hosts config
//! loading, client metrics, and the ops HTTP surface used by the binary
//! (`main.rs`) and by integration tests.

pub mod app_state;
pub mod backend;
pub mod cache;
pub mod config;
pub mod obs;
pub mod ops;
pub mod provider;
pub mod router;
pub mod token;

pub use provider::{Collaborators, Phase, PolicyChanged, PolicyProvider};
