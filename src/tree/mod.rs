//! Entry model and tree construction for both sides of the sync.

pub mod builder;
pub mod entry;

pub use builder::{build_local_tree, build_remote_tree};
pub use entry::{Entry, Origin, Tree, ROOT, SEPARATOR};
