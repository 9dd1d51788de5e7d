//! Project context - ignore rules, focus set, prompt assembly, and
//! compression monitoring

pub mod focus;
pub mod ignore;
pub mod manager;
pub mod monitor;
pub mod score;

pub use focus::{FocusSet, DEFAULT_FOCUS_CAPACITY};
pub use ignore::{walk_project, IgnoreMatcher};
pub use manager::{ContextManager, FocusedFile, ProjectContext};
pub use monitor::{CompressionAdvice, ContextMonitor, SUMMARY_HEADER};
pub use score::{rank_files, score_file};
