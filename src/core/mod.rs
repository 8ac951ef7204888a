pub mod comparator;
pub mod engine;
pub mod filter;
pub mod retry;
pub mod scanner;
pub mod transfer;

pub use comparator::{ActionKind, ActionSummary, FileComparator, SyncItem};
pub use engine::{ActionDetail, SyncEngine, SyncReport, SyncStatus};
pub use filter::{FilterRule, TimeFilterType, TimeWindow};
pub use retry::RetryPolicy;
pub use scanner::FileScanner;
