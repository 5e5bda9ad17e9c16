use super::value::Record;
use serde::Serialize;
use std::fmt;

/// 匹配结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched,
    NoMatch,
    /// 通用价格键不唯一
    Ambiguous,
    /// 同一客户存在多条专属价格 (目录数据问题)
    CustomerAmbiguous,
}

impl fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchOutcome::Matched => "matched",
            MatchOutcome::NoMatch => "no match",
            MatchOutcome::Ambiguous => "ambiguous match",
            MatchOutcome::CustomerAmbiguous => "ambiguous customer-specific match",
        };
        f.write_str(s)
    }
}

/// 匹配结果, 借用价格索引中的记录
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult<'a> {
    pub outcome: MatchOutcome,
    /// 命中的价格项 (目录顺序)
    pub items: Vec<&'a Record>,
    pub reason: Option<String>,
    /// 是否命中客户专属价格
    pub customer_specific: bool,
}

impl<'a> MatchResult<'a> {
    pub fn matched(items: Vec<&'a Record>) -> Self {
        Self {
            outcome: MatchOutcome::Matched,
            items,
            reason: None,
            customer_specific: false,
        }
    }

    pub fn customer(item: &'a Record) -> Self {
        Self {
            customer_specific: true,
            ..Self::matched(vec![item])
        }
    }

    pub fn no_match(reason: impl Into<String>) -> Self {
        Self {
            outcome: MatchOutcome::NoMatch,
            items: Vec::new(),
            reason: Some(reason.into()),
            customer_specific: false,
        }
    }

    pub fn ambiguous(items: Vec<&'a Record>, reason: impl Into<String>) -> Self {
        Self {
            outcome: MatchOutcome::Ambiguous,
            items,
            reason: Some(reason.into()),
            customer_specific: false,
        }
    }

    pub fn customer_ambiguous(items: Vec<&'a Record>, reason: impl Into<String>) -> Self {
        Self {
            outcome: MatchOutcome::CustomerAmbiguous,
            customer_specific: true,
            ..Self::ambiguous(items, reason)
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn is_matched(&self) -> bool {
        self.outcome == MatchOutcome::Matched
    }

    pub fn first(&self) -> Option<&'a Record> {
        self.items.first().copied()
    }
}

/// 单个输出字段的计算错误 (字段中同时写入错误占位符)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub code: String,
    pub message: String,
}

/// 输出记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculatedRecord {
    /// 原始用量记录下标
    pub usage_index: usize,
    pub outcome: MatchOutcome,
    pub customer_specific: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub fields: Record,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl CalculatedRecord {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
