use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// 价格字段与用量字段的等值约束
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFieldPair {
    pub price_field: String,
    pub usage_field: String,
}

impl MatchFieldPair {
    pub fn new(price_field: impl Into<String>, usage_field: impl Into<String>) -> Self {
        Self {
            price_field: price_field.into(),
            usage_field: usage_field.into(),
        }
    }

    /// 两侧同名字段
    pub fn same(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::new(field.clone(), field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Flat,
    Hierarchical,
}

/// 未匹配 / 歧义匹配的处置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoMatchPolicy {
    #[default]
    Error,
    Skip,
    Include,
}

/// 层级匹配在中途失败时的处置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialMatchPolicy {
    BestMatch,
    #[default]
    NoMatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WildcardConfig {
    pub enabled: bool,
    pub value: String,
}

impl Default for WildcardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            value: "*".to_string(),
        }
    }
}

/// 客户专属定价: 两阶段匹配
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerPricingConfig {
    pub price_customer_field: String,
    pub usage_customer_field: String,
}

/// 匹配配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchConfig {
    /// 有序字段对: 决定组合键顺序与层级顺序
    pub pairs: Vec<MatchFieldPair>,
    #[serde(default)]
    pub mode: MatchMode,
    #[serde(default)]
    pub multi_match_allowed: bool,
    #[serde(default)]
    pub no_match_policy: NoMatchPolicy,
    #[serde(default)]
    pub partial_match_policy: PartialMatchPolicy,
    #[serde(default)]
    pub wildcard: Option<WildcardConfig>,
    #[serde(default)]
    pub customer_pricing: Option<CustomerPricingConfig>,
}

impl MatchConfig {
    pub fn flat(pairs: Vec<MatchFieldPair>) -> Self {
        Self {
            pairs,
            mode: MatchMode::Flat,
            multi_match_allowed: false,
            no_match_policy: NoMatchPolicy::default(),
            partial_match_policy: PartialMatchPolicy::default(),
            wildcard: None,
            customer_pricing: None,
        }
    }

    pub fn hierarchical(pairs: Vec<MatchFieldPair>) -> Self {
        Self {
            mode: MatchMode::Hierarchical,
            ..Self::flat(pairs)
        }
    }

    /// 生效的通配值 (未启用返回 None)
    pub fn wildcard_value(&self) -> Option<&str> {
        self.wildcard
            .as_ref()
            .filter(|w| w.enabled)
            .map(|w| w.value.as_str())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pairs.is_empty() {
            return Err(ConfigError::EmptyMatchPairs);
        }
        for pair in &self.pairs {
            if pair.price_field.trim().is_empty() || pair.usage_field.trim().is_empty() {
                return Err(ConfigError::EmptyFieldName("match field pair"));
            }
        }
        if let Some(w) = &self.wildcard {
            if w.enabled && w.value.is_empty() {
                return Err(ConfigError::EmptyWildcard);
            }
        }
        if let Some(c) = &self.customer_pricing {
            if c.price_customer_field.trim().is_empty() || c.usage_customer_field.trim().is_empty() {
                return Err(ConfigError::EmptyFieldName("customer pricing config"));
            }
        }
        Ok(())
    }
}
