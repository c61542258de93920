//! Top-level facade crate for dmpolicy.
//!
//! Re-exports the core primitives and the client library so users can depend on a single crate.

pub mod core {
    pub use dmpolicy_core::*;
}

pub mod client {
    pub use dmpolicy_client::*;
}
