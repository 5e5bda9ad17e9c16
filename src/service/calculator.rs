use crate::error::{ConfigError, EngineError, Result};
use crate::formula::{evaluate_traced, EvalContext, EvalTrace, Expr, FormulaCache};
use crate::models::{
    round_to, CalculatedRecord, CalculationConfig, Diagnostics, Direction, FieldError,
    FormulaEvaluation, MatchConfig, MatchResult, OutputConfig, OutputFieldSpec, Record,
    RoundingMode, Value,
};
use bigdecimal::BigDecimal;
use std::sync::Arc;

/// 公式字段出错时写入的占位符前缀
pub const ERROR_MARKER: &str = "#ERROR";

/// 输出记录计算服务
pub struct RecordCalculator<'c> {
    match_config: &'c MatchConfig,
    calculation: &'c CalculationConfig,
    output: &'c OutputConfig,
    /// 与 output.fields 一一对应, 仅公式字段有值
    formulas: Vec<Option<Arc<Expr>>>,
}

impl<'c> RecordCalculator<'c> {
    /// 校验配置并预编译全部公式 (语法错误属于输入错误)
    pub fn new(
        match_config: &'c MatchConfig,
        calculation: &'c CalculationConfig,
        output: &'c OutputConfig,
        cache: &FormulaCache,
    ) -> std::result::Result<Self, ConfigError> {
        calculation.validate()?;
        output.validate()?;

        let formulas = output
            .fields
            .iter()
            .map(|spec| match spec {
                OutputFieldSpec::Calculated { formula, output_name } => cache
                    .get_or_compile(formula)
                    .map(Some)
                    .map_err(|error| ConfigError::InvalidFormula {
                        output: output_name.clone(),
                        error,
                    }),
                _ => Ok(None),
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            match_config,
            calculation,
            output,
            formulas,
        })
    }

    /// 按匹配结果生成输出: 多重匹配时每个价格项一条 (目录顺序), 未匹配时价格为空
    pub fn calculate_all(
        &self,
        usage_index: usize,
        usage: &Record,
        result: &MatchResult<'_>,
        mut diagnostics: Option<&mut Diagnostics>,
    ) -> Result<Vec<CalculatedRecord>> {
        if !result.is_matched() || result.items.is_empty() {
            return Ok(vec![self.calculate(usage_index, usage, None, result, diagnostics)?]);
        }
        result
            .items
            .iter()
            .map(|price| {
                self.calculate(usage_index, usage, Some(*price), result, diagnostics.as_deref_mut())
            })
            .collect()
    }

    /// 计算单条输出记录
    pub fn calculate(
        &self,
        usage_index: usize,
        usage: &Record,
        price: Option<&Record>,
        result: &MatchResult<'_>,
        mut diagnostics: Option<&mut Diagnostics>,
    ) -> Result<CalculatedRecord> {
        let mut fields = Record::new();
        let mut errors = Vec::new();

        for (spec, formula) in self.output.fields.iter().zip(&self.formulas) {
            match (spec, formula) {
                (OutputFieldSpec::CopyFromUsage { field, .. }, _) => {
                    fields.insert(spec.output_name(), lookup(Some(usage), field));
                }
                (OutputFieldSpec::CopyFromPrice { field, .. }, _) => {
                    fields.insert(spec.output_name(), lookup(price, field));
                }
                (OutputFieldSpec::Calculated { formula: source, output_name }, Some(expr)) => {
                    let value = self.evaluate_field(
                        usage_index,
                        usage,
                        price,
                        source,
                        output_name,
                        expr,
                        diagnostics.as_deref_mut(),
                    );
                    match value {
                        Ok(v) => fields.insert(output_name.as_str(), v),
                        Err(e) => {
                            // 只污染这一个字段, 其余字段照常输出
                            fields.insert(output_name.as_str(), format!("{}: {}", ERROR_MARKER, e));
                            errors.push(FieldError {
                                field: output_name.clone(),
                                code: e.code().to_string(),
                                message: e.to_string(),
                            });
                        }
                    }
                }
                (OutputFieldSpec::Calculated { .. }, None) => {}
            }
        }

        self.include_auto_fields(&mut fields, usage, price);

        for (price_field, amount_field) in self.calculation.amount_targets() {
            let amount = self.amount(usage_index, usage, price, price_field)?;
            fields.insert(amount_field, amount);
        }

        Ok(CalculatedRecord {
            usage_index,
            outcome: result.outcome,
            customer_specific: result.customer_specific && price.is_some(),
            reason: result.reason.clone(),
            fields,
            errors,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_field(
        &self,
        usage_index: usize,
        usage: &Record,
        price: Option<&Record>,
        source: &str,
        output_name: &str,
        expr: &Expr,
        diagnostics: Option<&mut Diagnostics>,
    ) -> std::result::Result<Value, crate::formula::FormulaError> {
        let ctx = EvalContext::new(usage, price).with_aliases(
            Some(self.calculation.quantity_field.as_str()),
            self.calculation.primary_price_field(),
        );

        let Some(diag) = diagnostics else {
            return evaluate_traced(expr, &ctx, None);
        };

        let mut trace = EvalTrace::default();
        let value = evaluate_traced(expr, &ctx, Some(&mut trace));
        diag.record_formula(FormulaEvaluation {
            usage_index,
            output_name: output_name.to_string(),
            formula: source.to_string(),
            variables: trace.variables,
            steps: trace.steps,
            result: value.as_ref().ok().cloned(),
            error: value.as_ref().err().map(|e| e.to_string()),
        });
        value
    }

    fn include_auto_fields(&self, fields: &mut Record, usage: &Record, price: Option<&Record>) {
        let prefix = &self.output.auto_field_prefix;

        if self.output.include_match_fields {
            for pair in &self.match_config.pairs {
                fields.insert(
                    format!("{}{}", prefix, pair.usage_field),
                    lookup(Some(usage), &pair.usage_field),
                );
            }
            if let Some(cp) = &self.match_config.customer_pricing {
                fields.insert(
                    format!("{}{}", prefix, cp.usage_customer_field),
                    lookup(Some(usage), &cp.usage_customer_field),
                );
            }
        }

        if self.output.include_calculation_fields {
            let quantity = &self.calculation.quantity_field;
            fields.insert(format!("{}{}", prefix, quantity), lookup(Some(usage), quantity));
            for (price_field, _) in self.calculation.amount_targets() {
                fields.insert(format!("{}{}", prefix, price_field), lookup(price, price_field));
            }
        }
    }

    /// 标准金额 = 数量 × 单价, 最后按配置舍入; 与用户公式无关
    fn amount(
        &self,
        usage_index: usize,
        usage: &Record,
        price: Option<&Record>,
        price_field: &str,
    ) -> Result<Value> {
        let unit_price = match price.and_then(|p| p.get_ci(price_field)) {
            None | Some(Value::Null) => return Ok(Value::Null),
            Some(v) => decimal_input(usage_index, price_field, v, "price")?,
        };

        let quantity_field = &self.calculation.quantity_field;
        let quantity = match usage.get_ci(quantity_field) {
            None | Some(Value::Null) => {
                return Err(EngineError::Calculation {
                    usage_index,
                    field: quantity_field.clone(),
                    message: "quantity is missing".to_string(),
                });
            }
            Some(v) => decimal_input(usage_index, quantity_field, v, "quantity")?,
        };

        Ok(Value::Number(apply_rounding(quantity * unit_price, self.calculation.rounding)))
    }
}

fn decimal_input(usage_index: usize, field: &str, value: &Value, what: &str) -> Result<BigDecimal> {
    let number = match value {
        Value::Bool(_) => None,
        v => v.to_decimal(),
    };
    number.ok_or_else(|| EngineError::Calculation {
        usage_index,
        field: field.to_string(),
        message: format!("{} '{}' is not numeric", what, value),
    })
}

fn lookup(record: Option<&Record>, field: &str) -> Value {
    record
        .and_then(|r| r.get_ci(field))
        .cloned()
        .unwrap_or_default()
}

pub fn apply_rounding(amount: BigDecimal, rounding: RoundingMode) -> BigDecimal {
    match rounding {
        RoundingMode::None => amount,
        RoundingMode::Up { decimal_places } => round_to(&amount, decimal_places as i64, Direction::Ceiling),
        RoundingMode::Down { decimal_places } => round_to(&amount, decimal_places as i64, Direction::Floor),
    }
}
