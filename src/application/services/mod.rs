//! Application services
//!
//! Concrete service implementations that orchestrate domain logic.
//! Services depend on I/O boundary traits (FileSystem, BackendProvider)
//! but are themselves concrete structs, not traits.

mod mounts;
mod reconcile;
mod recorder;
mod store;

pub use mounts::{MountChange, MountManager};
pub use reconcile::{Outcome, Reconciler};
pub use recorder::SessionRecorder;
pub use store::{KeyFacts, KeyStore, LiveView, StoreContext};
