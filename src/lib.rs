pub mod api;
pub mod config;
pub mod error;
pub mod formula;
pub mod models;
pub mod service;

pub use config::AppConfig;
pub use error::{ConfigError, EngineError, ErrorReport, Result};
pub use formula::{compile, FormulaCache, FormulaError};
pub use models::{BatchOptions, CalculatedRecord, Record, RunConfig, Value};
pub use service::{run_batch, BatchOutcome, PriceIndex, Progress, ProgressObserver};
