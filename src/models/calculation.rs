use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

pub const COST_AMOUNT_FIELD: &str = "calc_cost_amount";
pub const SELL_AMOUNT_FIELD: &str = "calc_sell_amount";

/// 金额舍入方式
///
/// 线上格式 `{"direction": "up", "decimal_places": 2}`。
/// 经 `RoundingSpec` 编解码: 内部标签枚举会缓冲字段, 与 serde_json 高精度数字不兼容。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RoundingSpec", into = "RoundingSpec")]
pub enum RoundingMode {
    #[default]
    None,
    Up { decimal_places: u32 },
    Down { decimal_places: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum RoundingDirection {
    None,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RoundingSpec {
    direction: RoundingDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    decimal_places: Option<u32>,
}

impl TryFrom<RoundingSpec> for RoundingMode {
    type Error = String;

    fn try_from(spec: RoundingSpec) -> Result<Self, Self::Error> {
        match (spec.direction, spec.decimal_places) {
            (RoundingDirection::None, _) => Ok(RoundingMode::None),
            (RoundingDirection::Up, Some(decimal_places)) => Ok(RoundingMode::Up { decimal_places }),
            (RoundingDirection::Down, Some(decimal_places)) => Ok(RoundingMode::Down { decimal_places }),
            (_, None) => Err("missing field `decimal_places`".to_string()),
        }
    }
}

impl From<RoundingMode> for RoundingSpec {
    fn from(mode: RoundingMode) -> Self {
        let (direction, decimal_places) = match mode {
            RoundingMode::None => (RoundingDirection::None, None),
            RoundingMode::Up { decimal_places } => (RoundingDirection::Up, Some(decimal_places)),
            RoundingMode::Down { decimal_places } => (RoundingDirection::Down, Some(decimal_places)),
        };
        Self {
            direction,
            decimal_places,
        }
    }
}

/// 金额计算配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculationConfig {
    /// 用量侧数量字段
    pub quantity_field: String,
    /// 价格侧成本单价字段
    #[serde(default)]
    pub cost_price_field: Option<String>,
    /// 价格侧销售单价字段
    #[serde(default)]
    pub sell_price_field: Option<String>,
    #[serde(default)]
    pub rounding: RoundingMode,
}

impl CalculationConfig {
    pub fn new(quantity_field: impl Into<String>) -> Self {
        Self {
            quantity_field: quantity_field.into(),
            cost_price_field: None,
            sell_price_field: None,
            rounding: RoundingMode::None,
        }
    }

    pub fn with_cost(mut self, field: impl Into<String>) -> Self {
        self.cost_price_field = Some(field.into());
        self
    }

    pub fn with_sell(mut self, field: impl Into<String>) -> Self {
        self.sell_price_field = Some(field.into());
        self
    }

    pub fn with_rounding(mut self, rounding: RoundingMode) -> Self {
        self.rounding = rounding;
        self
    }

    /// 公式别名 `unitPrice` 指向的价格字段 (优先销售价)
    pub fn primary_price_field(&self) -> Option<&str> {
        self.sell_price_field
            .as_deref()
            .or(self.cost_price_field.as_deref())
    }

    /// (单价字段, 金额输出字段) 列表, 成本在前
    pub fn amount_targets(&self) -> Vec<(&str, &'static str)> {
        let mut targets = Vec::with_capacity(2);
        if let Some(f) = self.cost_price_field.as_deref() {
            targets.push((f, COST_AMOUNT_FIELD));
        }
        if let Some(f) = self.sell_price_field.as_deref() {
            targets.push((f, SELL_AMOUNT_FIELD));
        }
        targets
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quantity_field.trim().is_empty() {
            return Err(ConfigError::MissingQuantityField);
        }
        let has_price = [&self.cost_price_field, &self.sell_price_field]
            .iter()
            .any(|f| f.as_deref().is_some_and(|s| !s.trim().is_empty()));
        if !has_price {
            return Err(ConfigError::MissingPriceField);
        }
        match self.rounding {
            RoundingMode::Up { decimal_places } | RoundingMode::Down { decimal_places }
                if decimal_places > 3 =>
            {
                Err(ConfigError::InvalidDecimalPlaces(decimal_places))
            }
            _ => Ok(()),
        }
    }
}

/// 单个输出字段定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum OutputFieldSpec {
    CopyFromUsage {
        field: String,
        #[serde(default)]
        output_name: Option<String>,
    },
    CopyFromPrice {
        field: String,
        #[serde(default)]
        output_name: Option<String>,
    },
    Calculated {
        formula: String,
        output_name: String,
    },
}

impl OutputFieldSpec {
    pub fn usage(field: impl Into<String>) -> Self {
        OutputFieldSpec::CopyFromUsage {
            field: field.into(),
            output_name: None,
        }
    }

    pub fn price(field: impl Into<String>) -> Self {
        OutputFieldSpec::CopyFromPrice {
            field: field.into(),
            output_name: None,
        }
    }

    pub fn calculated(formula: impl Into<String>, output_name: impl Into<String>) -> Self {
        OutputFieldSpec::Calculated {
            formula: formula.into(),
            output_name: output_name.into(),
        }
    }

    /// 输出字段名
    pub fn output_name(&self) -> &str {
        match self {
            OutputFieldSpec::CopyFromUsage { field, output_name }
            | OutputFieldSpec::CopyFromPrice { field, output_name } => {
                output_name.as_deref().unwrap_or(field)
            }
            OutputFieldSpec::Calculated { output_name, .. } => output_name,
        }
    }
}

fn default_auto_prefix() -> String {
    "input_".to_string()
}

/// 输出配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub fields: Vec<OutputFieldSpec>,
    /// 自动附带全部匹配字段
    #[serde(default)]
    pub include_match_fields: bool,
    /// 自动附带全部计算输入字段 (数量与单价)
    #[serde(default)]
    pub include_calculation_fields: bool,
    #[serde(default = "default_auto_prefix")]
    pub auto_field_prefix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            include_match_fields: false,
            include_calculation_fields: false,
            auto_field_prefix: default_auto_prefix(),
        }
    }
}

impl OutputConfig {
    pub fn with_fields(fields: Vec<OutputFieldSpec>) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (idx, spec) in self.fields.iter().enumerate() {
            match spec {
                OutputFieldSpec::Calculated { output_name, .. } if output_name.trim().is_empty() => {
                    return Err(ConfigError::EmptyOutputName(idx));
                }
                OutputFieldSpec::CopyFromUsage { field, .. }
                | OutputFieldSpec::CopyFromPrice { field, .. }
                    if field.trim().is_empty() =>
                {
                    return Err(ConfigError::EmptyFieldName("output field"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculation_validation() {
        assert_eq!(
            CalculationConfig::new("").with_sell("sell").validate(),
            Err(ConfigError::MissingQuantityField)
        );
        assert_eq!(
            CalculationConfig::new("qty").validate(),
            Err(ConfigError::MissingPriceField)
        );
        assert_eq!(
            CalculationConfig::new("qty")
                .with_sell("sell")
                .with_rounding(RoundingMode::Up { decimal_places: 4 })
                .validate(),
            Err(ConfigError::InvalidDecimalPlaces(4))
        );
        assert!(CalculationConfig::new("qty").with_cost("cost").validate().is_ok());
    }

    #[test]
    fn test_amount_targets_order() {
        let config = CalculationConfig::new("qty").with_sell("sell").with_cost("cost");
        assert_eq!(
            config.amount_targets(),
            vec![("cost", COST_AMOUNT_FIELD), ("sell", SELL_AMOUNT_FIELD)]
        );
        assert_eq!(config.primary_price_field(), Some("sell"));
    }

    #[test]
    fn test_rounding_deserialize() {
        let rounding: RoundingMode =
            serde_json::from_str(r#"{"direction":"up","decimal_places":2}"#).unwrap();
        assert_eq!(rounding, RoundingMode::Up { decimal_places: 2 });
        let none: RoundingMode = serde_json::from_str(r#"{"direction":"none"}"#).unwrap();
        assert_eq!(none, RoundingMode::None);
        assert!(serde_json::from_str::<RoundingMode>(r#"{"direction":"down"}"#).is_err());

        let config: CalculationConfig = serde_json::from_str(
            r#"{"quantity_field":"qty","rounding":{"direction":"down","decimal_places":3}}"#,
        )
        .unwrap();
        assert_eq!(config.rounding, RoundingMode::Down { decimal_places: 3 });
        assert_eq!(
            serde_json::to_value(config.rounding).unwrap(),
            serde_json::json!({"direction": "down", "decimal_places": 3})
        );
    }

    #[test]
    fn test_output_spec_names() {
        assert_eq!(OutputFieldSpec::usage("qty").output_name(), "qty");
        assert_eq!(
            OutputFieldSpec::calculated("usage * 2", "double").output_name(),
            "double"
        );
        let empty = OutputConfig::with_fields(vec![OutputFieldSpec::calculated("1", " ")]);
        assert_eq!(empty.validate(), Err(ConfigError::EmptyOutputName(0)));
    }
}
