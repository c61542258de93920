//! Policy values handed to consumers.
//!
//! A [`PolicySnapshot`] is an immutable key/value map produced by a fetch or
//! loaded from cache. Consumers receive it through [`PolicyStore::apply`].

pub mod definitions;
pub mod snapshot;
pub mod store;

pub use definitions::{PolicyDefinition, PolicyDefinitionList, PolicyKind};
pub use snapshot::PolicySnapshot;
pub use store::{MapStore, PolicyStore};
