pub mod batch;
pub mod calculator;
pub mod index;
pub mod matcher;

pub use batch::{run_batch, BatchFailure, BatchOutcome, BatchProcessor, Progress, ProgressObserver};
pub use calculator::{apply_rounding, RecordCalculator, ERROR_MARKER};
pub use index::{HierarchyNode, PriceIndex, KEY_SEPARATOR};
pub use matcher::{match_usage, Matcher};
