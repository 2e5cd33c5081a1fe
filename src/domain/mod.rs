//! Domain layer: key-tree model and reconciliation logic
//!
//! This layer is independent of external concerns (no I/O, no CLI, no config loading).

pub mod builder;
pub mod diff;
pub mod entities;
pub mod error;
pub mod key;
pub mod keyset;
pub mod merge;
pub mod session;

pub use builder::{BuiltTree, DesiredNode, RemoveSpec, TreeBuilder};
pub use diff::{diff, Diff};
pub use entities::*;
pub use error::{DomainError, DomainResult};
pub use key::{Key, KeyCompare, KeyName, Namespace, Segment, ARRAY_META, ORDER_META};
pub use keyset::KeySet;
pub use merge::{merge, merge_with_removals, MergeResult, MergeStrategy};
pub use session::{ChangeOrigin, RecordingSession};
