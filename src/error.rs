//! 错误类型
//!
//! 所有错误均为结构化值 (code + message + context + suggestions), 调用方可按类型分支处理。

use crate::formula::FormulaError;
use crate::models::MatchOutcome;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// 配置错误 (输入错误): 在处理任何记录之前报告
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("match config requires at least one field pair")]
    EmptyMatchPairs,

    #[error("empty field name in {0}")]
    EmptyFieldName(&'static str),

    #[error("wildcard is enabled but its value is empty")]
    EmptyWildcard,

    #[error("calculation config requires a quantity field")]
    MissingQuantityField,

    #[error("calculation config requires a cost or sell price field")]
    MissingPriceField,

    #[error("decimal places must be within 0..=3, got {0}")]
    InvalidDecimalPlaces(u32),

    #[error("calculated output #{0} has no output name")]
    EmptyOutputName(usize),

    #[error("formula for output '{output}' does not compile: {error}")]
    InvalidFormula { output: String, error: FormulaError },

    #[error("chunk size must be at least 1")]
    InvalidChunkSize,
}

/// 引擎统一错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Match error for usage record {usage_index}: {outcome}{}", reason_suffix(.reason))]
    Match {
        usage_index: usize,
        outcome: MatchOutcome,
        reason: Option<String>,
    },

    #[error("Formula error: {0}")]
    Formula(#[from] FormulaError),

    #[error("Calculation error for usage record {usage_index}, field '{field}': {message}")]
    Calculation {
        usage_index: usize,
        field: String,
        message: String,
    },

    #[error("Run cancelled after {completed_chunks} chunk(s)")]
    Cancelled { completed_chunks: usize },
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(" ({})", r))
        .unwrap_or_default()
}

impl EngineError {
    /// 稳定的错误码, 供宿主分支判断
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "config_error",
            EngineError::Match { outcome, .. } => match outcome {
                MatchOutcome::NoMatch => "no_match",
                MatchOutcome::Ambiguous => "ambiguous_match",
                MatchOutcome::CustomerAmbiguous => "customer_ambiguous_match",
                MatchOutcome::Matched => "match_error",
            },
            EngineError::Formula(e) => e.code(),
            EngineError::Calculation { .. } => "calculation_error",
            EngineError::Cancelled { .. } => "cancelled",
        }
    }

    pub fn context(&self) -> Option<String> {
        match self {
            EngineError::Match { usage_index, .. } | EngineError::Calculation { usage_index, .. } => {
                Some(format!("usage record #{}", usage_index))
            }
            EngineError::Config(ConfigError::InvalidFormula { output, .. }) => {
                Some(format!("output field '{}'", output))
            }
            _ => None,
        }
    }

    pub fn suggestions(&self) -> Vec<String> {
        let hints: &[&str] = match self {
            EngineError::Match { outcome: MatchOutcome::NoMatch, .. } => &[
                "check that the match fields exist in both price and usage data",
                "use noMatchPolicy 'skip' or 'include' to continue without a price",
            ],
            EngineError::Match { outcome: MatchOutcome::Ambiguous, .. } => &[
                "add another match field so that price keys become unique",
                "enable multiMatchAllowed to emit one output per matching price",
            ],
            EngineError::Match { outcome: MatchOutcome::CustomerAmbiguous, .. } => &[
                "remove duplicate customer-specific prices from the catalog",
            ],
            EngineError::Config(ConfigError::InvalidDecimalPlaces(_)) => {
                &["use a value between 0 and 3"]
            }
            EngineError::Formula(e) => return e.suggestions(),
            _ => &[],
        };
        hints.iter().map(|s| s.to_string()).collect()
    }

    pub fn is_fatal_input(&self) -> bool {
        matches!(self, EngineError::Config(_))
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from(self)
    }
}

/// 可序列化的错误报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl From<&EngineError> for ErrorReport {
    fn from(e: &EngineError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
            context: e.context(),
            suggestions: e.suggestions(),
        }
    }
}
