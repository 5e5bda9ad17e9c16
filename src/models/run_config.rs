use super::calculation::{CalculationConfig, OutputConfig};
use super::match_config::MatchConfig;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// 块处理异常时的策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    /// 立即终止整次运行, 已完成的块照常返回
    StopAll,
    /// 丢弃整块结果, 继续下一块
    SkipBatch,
    /// 逐条隔离失败记录, 其余记录照常输出
    #[default]
    ProcessIndividual,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

/// 批处理选项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOptions {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub strategy: ErrorStrategy,
    /// 是否收集诊断
    #[serde(default)]
    pub diagnostics: bool,
    /// 使用 rayon 并行处理各块 (输出顺序不变)
    #[serde(default)]
    pub parallel: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            strategy: ErrorStrategy::default(),
            diagnostics: false,
            parallel: false,
        }
    }
}

impl BatchOptions {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    pub fn with_parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize);
        }
        Ok(())
    }
}

/// 一次运行的全部业务配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(rename = "match")]
    pub matching: MatchConfig,
    pub calculation: CalculationConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl RunConfig {
    pub fn new(matching: MatchConfig, calculation: CalculationConfig, output: OutputConfig) -> Self {
        Self {
            matching,
            calculation,
            output,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.matching.validate()?;
        self.calculation.validate()?;
        self.output.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_chunk_size_rejected() {
        let options = BatchOptions::default().with_chunk_size(0);
        assert_eq!(options.validate(), Err(ConfigError::InvalidChunkSize));
    }

    #[test]
    fn test_run_config_from_json() {
        let config: RunConfig = serde_json::from_value(serde_json::json!({
            "match": {"pairs": [{"price_field": "product", "usage_field": "product"}]},
            "calculation": {"quantity_field": "qty", "sell_price_field": "sell"}
        }))
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.output.auto_field_prefix, "input_");
    }
}
