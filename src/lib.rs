//! rsconf: declarative reconciliation of hierarchical key-value configuration stores.
//!
//! Layers, innermost first:
//! - `domain`: key-trees, desired-state builder, diff, merge, mount table, recording session
//! - `application`: requests and services (mounts, store, recorder, reconciler)
//! - `infrastructure`: file backends, filesystem abstraction, DI container
//! - `cli`: argument parsing and command dispatch

pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod exitcode;
pub mod infrastructure;
pub mod util;
