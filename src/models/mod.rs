pub mod calculation;
pub mod decimal;
pub mod diagnostics;
pub mod match_config;
pub mod result;
pub mod run_config;
pub mod value;

pub use calculation::{
    CalculationConfig, OutputConfig, OutputFieldSpec, RoundingMode, COST_AMOUNT_FIELD,
    SELL_AMOUNT_FIELD,
};
pub use decimal::{canonical, parse_decimal, round_to, Direction};
pub use diagnostics::{BatchStatistics, Diagnostics, FormulaEvaluation, MatchAttempt};
pub use match_config::{
    CustomerPricingConfig, MatchConfig, MatchFieldPair, MatchMode, NoMatchPolicy,
    PartialMatchPolicy, WildcardConfig,
};
pub use result::{CalculatedRecord, FieldError, MatchOutcome, MatchResult};
pub use run_config::{BatchOptions, ErrorStrategy, RunConfig, DEFAULT_CHUNK_SIZE};
pub use value::{fold_case, Record, Value};
