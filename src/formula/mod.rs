//! 内嵌公式语言
//!
//! 封闭语法: 字面量、`price.<field>` / `usage.<field>` 字段访问、一元/二元运算、三元表达式、
//! 白名单函数调用。不执行任何宿主代码。

pub mod ast;
pub mod cache;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;

pub use ast::Expr;
pub use cache::FormulaCache;
pub use error::FormulaError;
pub use eval::{evaluate, evaluate_traced, EvalContext, EvalTrace};
pub use parser::compile;
