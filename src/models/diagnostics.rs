//! 诊断数据: 可选的被动收集器
//!
//! 运行开始时按需创建, 处理过程中追加, 运行结束后只读; 核心从不持久化。

use super::value::{Record, Value};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// 一次匹配尝试
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchAttempt {
    pub usage_index: usize,
    pub usage: Record,
    /// (字段, 用量值) 按配置顺序
    pub fields_tried: Vec<(String, Value)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_item: Option<Record>,
    pub success: bool,
    pub reason: String,
}

/// 一次公式求值
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormulaEvaluation {
    pub usage_index: usize,
    pub output_name: String,
    pub formula: String,
    /// 代入的字段值
    pub variables: Vec<(String, Value)>,
    /// 逐步求值记录
    pub steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 批处理统计
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct BatchStatistics {
    pub total: usize,
    pub processed: usize,
    pub successes: usize,
    pub failures: usize,
    pub skipped: usize,
    pub chunks: usize,
    pub failed_chunks: usize,
    pub elapsed_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Diagnostics {
    pub match_attempts: Vec<MatchAttempt>,
    pub formula_evaluations: Vec<FormulaEvaluation>,
    pub statistics: BatchStatistics,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_match(&mut self, attempt: MatchAttempt) {
        self.match_attempts.push(attempt);
    }

    pub fn record_formula(&mut self, evaluation: FormulaEvaluation) {
        self.formula_evaluations.push(evaluation);
    }

    /// 合并线程局部的收集器 (按块顺序调用)
    pub fn merge(&mut self, other: Diagnostics) {
        self.match_attempts.extend(other.match_attempts);
        self.formula_evaluations.extend(other.formula_evaluations);
    }

    pub fn match_success_rate(&self) -> f64 {
        if self.match_attempts.is_empty() {
            return 0.0;
        }
        let ok = self.match_attempts.iter().filter(|a| a.success).count();
        ok as f64 / self.match_attempts.len() as f64
    }
}
