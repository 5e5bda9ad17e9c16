use super::ast::{Alias, BinaryOp, Expr, Function, Namespace, UnaryOp};
use super::error::FormulaError;
use crate::models::{canonical, round_to, Direction, Record, Value};
use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use std::cmp::Ordering;

/// 求值上下文: 两个命名空间 + 别名解析所需的字段名
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub usage: &'a Record,
    /// 未匹配 (Include 策略) 时为 None, price.* 解析为 null
    pub price: Option<&'a Record>,
    pub quantity_field: Option<&'a str>,
    pub price_field: Option<&'a str>,
}

impl<'a> EvalContext<'a> {
    pub fn new(usage: &'a Record, price: Option<&'a Record>) -> Self {
        Self {
            usage,
            price,
            quantity_field: None,
            price_field: None,
        }
    }

    pub fn with_aliases(mut self, quantity_field: Option<&'a str>, price_field: Option<&'a str>) -> Self {
        self.quantity_field = quantity_field;
        self.price_field = price_field;
        self
    }
}

/// 求值轨迹 (仅在挂载诊断时收集)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvalTrace {
    pub variables: Vec<(String, Value)>,
    pub steps: Vec<String>,
}

/// 对语法树求值; 单次遍历, 无副作用
pub fn evaluate(expr: &Expr, ctx: &EvalContext<'_>) -> Result<Value, FormulaError> {
    Evaluator { ctx, trace: None }.eval(expr)
}

/// 带轨迹的求值
pub fn evaluate_traced(
    expr: &Expr,
    ctx: &EvalContext<'_>,
    trace: Option<&mut EvalTrace>,
) -> Result<Value, FormulaError> {
    Evaluator { ctx, trace }.eval(expr)
}

struct Evaluator<'c, 'a, 't> {
    ctx: &'c EvalContext<'a>,
    trace: Option<&'t mut EvalTrace>,
}

impl Evaluator<'_, '_, '_> {
    fn eval(&mut self, expr: &Expr) -> Result<Value, FormulaError> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Field { namespace, path } => self.field(*namespace, path),
            Expr::Alias(alias) => self.alias(*alias),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                let result = match op {
                    UnaryOp::Neg => {
                        let n = number(&value, "-")?;
                        Value::Number(-n)
                    }
                    UnaryOp::Not => Value::Bool(!truthy(&value)),
                };
                Ok(result)
            }
            Expr::Binary { op: BinaryOp::And, left, right } => {
                let l = self.eval(left)?;
                let result = truthy(&l) && truthy(&self.eval(right)?);
                Ok(Value::Bool(result))
            }
            Expr::Binary { op: BinaryOp::Or, left, right } => {
                let l = self.eval(left)?;
                let result = truthy(&l) || truthy(&self.eval(right)?);
                Ok(Value::Bool(result))
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                let result = binary(*op, &l, &r)?;
                self.step(|| format!("{} {} {} = {}", show(&l), op.symbol(), show(&r), show(&result)));
                Ok(result)
            }
            Expr::Conditional { condition, then, otherwise } => {
                if truthy(&self.eval(condition)?) {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Call { function, args } => {
                let result = self.call(*function, args)?;
                self.step(|| format!("{}(..) = {}", function.name(), show(&result)));
                Ok(result)
            }
        }
    }

    fn step(&mut self, describe: impl FnOnce() -> String) {
        if let Some(trace) = self.trace.as_deref_mut() {
            trace.steps.push(describe());
        }
    }

    fn variable(&mut self, name: String, value: &Value) {
        if let Some(trace) = self.trace.as_deref_mut() {
            trace.variables.push((name, value.clone()));
        }
    }

    fn field(&mut self, namespace: Namespace, path: &[String]) -> Result<Value, FormulaError> {
        let name = format!("{}.{}", namespace.as_str(), path.join("."));
        let record = match namespace {
            Namespace::Usage => self.ctx.usage,
            Namespace::Price => match self.ctx.price {
                Some(price) => price,
                None => {
                    self.variable(name, &Value::Null);
                    return Ok(Value::Null);
                }
            },
        };
        let value = record
            .get_path_ci(path)
            .cloned()
            .ok_or_else(|| FormulaError::UnknownField(name.clone()))?;
        self.variable(name, &value);
        Ok(value)
    }

    fn alias(&mut self, alias: Alias) -> Result<Value, FormulaError> {
        let (namespace, field, shorthand) = match alias {
            Alias::Quantity => (Namespace::Usage, self.ctx.quantity_field, "usage"),
            Alias::UnitPrice => (Namespace::Price, self.ctx.price_field, "unitPrice"),
        };
        let field = field.ok_or_else(|| FormulaError::UnknownField(shorthand.to_string()))?;
        self.field(namespace, &[field.to_string()])
    }

    /// isNull / ifNull 的参数: 未知字段视为 null
    fn lenient(&mut self, expr: &Expr) -> Result<Value, FormulaError> {
        match self.eval(expr) {
            Err(FormulaError::UnknownField(_)) => Ok(Value::Null),
            other => other,
        }
    }

    fn call(&mut self, function: Function, args: &[Expr]) -> Result<Value, FormulaError> {
        let name = function.name();
        match function {
            Function::IsNull => Ok(Value::Bool(self.lenient(&args[0])?.is_null())),
            Function::IfNull => {
                let value = self.lenient(&args[0])?;
                if value.is_null() {
                    self.eval(&args[1])
                } else {
                    Ok(value)
                }
            }
            Function::IsNumber => {
                let value = self.eval(&args[0])?;
                let numeric = !matches!(value, Value::Bool(_)) && value.to_decimal().is_some();
                Ok(Value::Bool(numeric))
            }
            Function::Min | Function::Max => {
                let mut best: Option<BigDecimal> = None;
                for arg in args {
                    let n = number(&self.eval(arg)?, name)?;
                    best = Some(match best {
                        None => n,
                        Some(b) if function == Function::Min => b.min(n),
                        Some(b) => b.max(n),
                    });
                }
                best.map(Value::Number)
                    .ok_or_else(|| FormulaError::TypeMismatch(format!("{} of no values", name)))
            }
            Function::Round => {
                let n = number(&self.eval(&args[0])?, name)?;
                let places = match args.get(1) {
                    Some(arg) => number(&self.eval(arg)?, name)?
                        .to_i64()
                        .filter(|p| (0..=18).contains(p))
                        .ok_or_else(|| {
                            FormulaError::TypeMismatch("round() digits must be an integer in 0..=18".into())
                        })?,
                    None => 0,
                };
                Ok(Value::Number(round_to(&n, places, Direction::HalfAwayFromZero)))
            }
            Function::Floor => {
                let n = number(&self.eval(&args[0])?, name)?;
                Ok(Value::Number(round_to(&n, 0, Direction::Floor)))
            }
            Function::Ceil => {
                let n = number(&self.eval(&args[0])?, name)?;
                Ok(Value::Number(round_to(&n, 0, Direction::Ceiling)))
            }
            Function::Abs => {
                let n = number(&self.eval(&args[0])?, name)?;
                Ok(Value::Number(n.abs()))
            }
        }
    }
}

fn show(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{:?}", s),
        other => other.to_string(),
    }
}

/// 真值: null / false / 0 / 空串 / 空集合为假
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => !n.is_zero(),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(record) => !record.is_empty(),
    }
}

/// 数值操作数 (数字或数字字符串)
fn number(value: &Value, op: &str) -> Result<BigDecimal, FormulaError> {
    let number = match value {
        Value::Bool(_) => None,
        v => v.to_decimal(),
    };
    number.ok_or_else(|| {
        FormulaError::TypeMismatch(format!(
            "'{}' requires a number, got {} ({})",
            op,
            value.type_name(),
            show(value)
        ))
    })
}

fn numeric_pair(l: &Value, r: &Value) -> Option<(BigDecimal, BigDecimal)> {
    let as_number = |v: &Value| match v {
        Value::Bool(_) => None,
        v => v.to_decimal(),
    };
    Some((as_number(l)?, as_number(r)?))
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, FormulaError> {
    match op {
        BinaryOp::Add => {
            if let Some((a, b)) = numeric_pair(l, r) {
                return Ok(Value::Number(a + b));
            }
            let concatenable = |v: &Value| matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_));
            let has_string = matches!(l, Value::String(_)) || matches!(r, Value::String(_));
            if has_string && concatenable(l) && concatenable(r) {
                return Ok(Value::String(format!("{}{}", l, r)));
            }
            Err(mismatch(op, l, r))
        }
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            let (a, b) = numeric_pair(l, r).ok_or_else(|| mismatch(op, l, r))?;
            let result = match op {
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div if b.is_zero() => return Err(FormulaError::DivisionByZero),
                BinaryOp::Div => canonical(&(a / b)),
                BinaryOp::Rem if b.is_zero() => return Err(FormulaError::DivisionByZero),
                _ => a % b,
            };
            Ok(Value::Number(result))
        }
        BinaryOp::Eq => Ok(Value::Bool(values_equal(l, r))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(l, r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(l, r).ok_or_else(|| mismatch(op, l, r))?;
            let result = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::And | BinaryOp::Or => Ok(Value::Bool(match op {
            BinaryOp::And => truthy(l) && truthy(r),
            _ => truthy(l) || truthy(r),
        })),
    }
}

fn mismatch(op: BinaryOp, l: &Value, r: &Value) -> FormulaError {
    FormulaError::TypeMismatch(format!(
        "cannot apply '{}' to {} ({}) and {} ({})",
        op.symbol(),
        l.type_name(),
        show(l),
        r.type_name(),
        show(r)
    ))
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Number(_), _) | (_, Value::Number(_)) => match numeric_pair(l, r) {
            Some((a, b)) => a == b,
            None => false,
        },
        (a, b) => a == b,
    }
}

fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::String(a), Value::String(b)) => match numeric_pair(l, r) {
            Some((x, y)) => Some(x.cmp(&y)),
            None => Some(a.cmp(b)),
        },
        _ => numeric_pair(l, r).map(|(a, b)| a.cmp(&b)),
    }
}
