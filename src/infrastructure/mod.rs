//! Infrastructure layer: I/O implementations and DI container
//!
//! This layer implements I/O boundary traits, the file backends, and wires up services.

pub mod backends;
pub mod di;
pub mod error;
pub mod traits;

pub use error::{InfraError, InfraResult};
