//! Small helpers without domain knowledge.

pub mod path;
pub mod testing;
