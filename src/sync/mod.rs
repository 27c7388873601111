//! Synchronization core.
//!
//! The reconciliation pass (`merge` + `materialize`, driven by `engine`)
//! and live sync (`watcher` + `mapper`) share the remote, the exclude set
//! and the record of locally pulled files.

pub mod echo;
pub mod engine;
pub mod exclude;
pub mod mapper;
pub mod materialize;
pub mod merge;
pub mod watcher;

pub use echo::LocalWrites;
pub use engine::{LiveSync, SyncEngine, SyncReport};
pub use exclude::ExcludePatterns;
pub use mapper::{EventMapper, MappedAction, Outcome};
pub use materialize::{EntryFailure, MaterializeReport, Materializer};
pub use merge::{merge, Inconsistency, Merged};
pub use watcher::{EventDebouncer, EventTranslator, FsEvent, LocalWatcher};
