use thiserror::Error;

/// 公式错误: 编译期 (语法 / 标识符 / 函数) 与求值期 (字段 / 除零 / 类型)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{function}' expects {expected} argument(s), got {got}")]
    Arity {
        function: &'static str,
        expected: &'static str,
        got: usize,
    },

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("type mismatch: {0}")]
    TypeMismatch(String),
}

impl FormulaError {
    pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
        FormulaError::Syntax {
            position,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            FormulaError::Syntax { .. } => "formula_syntax",
            FormulaError::UnknownIdentifier(_) => "formula_unknown_identifier",
            FormulaError::UnknownFunction(_) => "formula_unknown_function",
            FormulaError::Arity { .. } => "formula_arity",
            FormulaError::UnknownField(_) => "unknown_field",
            FormulaError::DivisionByZero => "division_by_zero",
            FormulaError::TypeMismatch(_) => "type_mismatch",
        }
    }

    /// 编译期错误 (配置问题, 非数据问题)
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            FormulaError::Syntax { .. }
                | FormulaError::UnknownIdentifier(_)
                | FormulaError::UnknownFunction(_)
                | FormulaError::Arity { .. }
        )
    }

    pub fn suggestions(&self) -> Vec<String> {
        let hints: &[&str] = match self {
            FormulaError::UnknownIdentifier(_) => &[
                "reference fields as price.<field> or usage.<field>",
                "the shorthands 'usage' and 'unitPrice' refer to the configured quantity and price fields",
            ],
            FormulaError::UnknownFunction(_) => {
                &["available functions: min, max, round, floor, ceil, abs, isNull, ifNull, isNumber"]
            }
            FormulaError::UnknownField(_) => {
                &["wrap optional fields with ifNull(field, default)"]
            }
            FormulaError::DivisionByZero => &["guard the divisor, e.g. x != 0 ? y / x : 0"],
            _ => &[],
        };
        hints.iter().map(|s| s.to_string()).collect()
    }
}
