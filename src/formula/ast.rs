use crate::models::Value;
use std::fmt;

/// 字段命名空间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Price,
    Usage,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Price => "price",
            Namespace::Usage => "usage",
        }
    }
}

/// 简写别名, 求值时按计算配置解析
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alias {
    /// `usage` -> usage.<数量字段>
    Quantity,
    /// `unitPrice` -> price.<单价字段>
    UnitPrice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

/// 白名单函数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Min,
    Max,
    Round,
    Floor,
    Ceil,
    Abs,
    IsNull,
    IfNull,
    IsNumber,
}

impl Function {
    pub fn lookup(name: &str) -> Option<Self> {
        let f = match name {
            "min" => Function::Min,
            "max" => Function::Max,
            "round" => Function::Round,
            "floor" => Function::Floor,
            "ceil" => Function::Ceil,
            "abs" => Function::Abs,
            "isNull" => Function::IsNull,
            "ifNull" => Function::IfNull,
            "isNumber" => Function::IsNumber,
            _ => return None,
        };
        Some(f)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Min => "min",
            Function::Max => "max",
            Function::Round => "round",
            Function::Floor => "floor",
            Function::Ceil => "ceil",
            Function::Abs => "abs",
            Function::IsNull => "isNull",
            Function::IfNull => "ifNull",
            Function::IsNumber => "isNumber",
        }
    }

    /// 参数个数范围 (闭区间) 与说明
    pub fn arity(&self) -> (usize, Option<usize>, &'static str) {
        match self {
            Function::Min | Function::Max => (1, None, "at least 1"),
            Function::Round => (1, Some(2), "1 or 2"),
            Function::Floor | Function::Ceil | Function::Abs => (1, Some(1), "1"),
            Function::IsNull | Function::IsNumber => (1, Some(1), "1"),
            Function::IfNull => (2, Some(2), "2"),
        }
    }
}

/// 公式语法树 (编译后不可变)
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Field { namespace: Namespace, path: Vec<String> },
    Alias(Alias),
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Conditional { condition: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
    Call { function: Function, args: Vec<Expr> },
}

impl Expr {
    /// 语法树高度 (叶子为 1)
    pub fn depth(&self) -> usize {
        match self {
            Expr::Literal(_) | Expr::Field { .. } | Expr::Alias(_) => 1,
            Expr::Unary { operand, .. } => 1 + operand.depth(),
            Expr::Binary { left, right, .. } => 1 + left.depth().max(right.depth()),
            Expr::Conditional { condition, then, otherwise } => {
                1 + condition.depth().max(then.depth()).max(otherwise.depth())
            }
            Expr::Call { args, .. } => 1 + args.iter().map(Expr::depth).max().unwrap_or(0),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Value::String(s)) => write!(f, "{:?}", s),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Field { namespace, path } => write!(f, "{}.{}", namespace.as_str(), path.join(".")),
            Expr::Alias(Alias::Quantity) => write!(f, "usage"),
            Expr::Alias(Alias::UnitPrice) => write!(f, "unitPrice"),
            Expr::Unary { op: UnaryOp::Neg, operand } => write!(f, "-{}", operand),
            Expr::Unary { op: UnaryOp::Not, operand } => write!(f, "!{}", operand),
            Expr::Binary { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Conditional { condition, then, otherwise } => {
                write!(f, "({} ? {} : {})", condition, then, otherwise)
            }
            Expr::Call { function, args } => {
                write!(f, "{}(", function.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}
