//! 递归下降解析器
//!
//! 优先级 (低到高): `?:`, `||`, `&&`, `== !=`, `< <= > >=`, `+ -`, `* / %`, 一元 `- !`。

use super::ast::{Alias, BinaryOp, Expr, Function, Namespace, UnaryOp};
use super::error::FormulaError;
use super::lexer::{tokenize, Token, TokenKind};
use crate::models::Value;

/// 括号 / 一元 / 三元的最大嵌套层数
pub const MAX_NESTING: usize = 64;
/// 语法树最大高度 (含长运算链)
pub const MAX_DEPTH: usize = 256;

/// 编译公式文本为语法树 (纯函数, 可缓存)
pub fn compile(source: &str) -> Result<Expr, FormulaError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        nesting: 0,
    };
    if parser.peek() == &TokenKind::Eof {
        return Err(FormulaError::syntax(0, "empty formula"));
    }
    let expr = parser.ternary()?;
    match parser.peek() {
        TokenKind::Eof => Ok(expr),
        other => Err(FormulaError::syntax(
            parser.position(),
            format!("unexpected token {:?}", other),
        )),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn position(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].position
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    fn expect(&mut self, expected: TokenKind, what: &str) -> Result<(), FormulaError> {
        if self.peek() == &expected {
            self.advance();
            Ok(())
        } else {
            Err(FormulaError::syntax(
                self.position(),
                format!("expected {}, found {:?}", what, self.peek()),
            ))
        }
    }

    fn too_deep(&self) -> FormulaError {
        FormulaError::syntax(self.position(), "formula nested too deeply")
    }

    /// 递归入口计数; 超限返回语法错误而不是耗尽栈
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T, FormulaError>) -> Result<T, FormulaError> {
        if self.nesting >= MAX_NESTING {
            return Err(self.too_deep());
        }
        self.nesting += 1;
        let result = parse(self);
        self.nesting -= 1;
        result
    }

    fn ternary(&mut self) -> Result<Expr, FormulaError> {
        self.nested(Self::conditional)
    }

    fn conditional(&mut self) -> Result<Expr, FormulaError> {
        let condition = self.or()?;
        if self.peek() != &TokenKind::Question {
            return Ok(condition);
        }
        self.advance();
        let then = self.ternary()?;
        self.expect(TokenKind::Colon, "':'")?;
        let otherwise = self.ternary()?;
        Ok(Expr::Conditional {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, FormulaError>,
        ops: &[(TokenKind, BinaryOp)],
    ) -> Result<Expr, FormulaError> {
        let mut left = next(self)?;
        let mut height = None;
        'outer: loop {
            for (token, op) in ops {
                if self.peek() == token {
                    self.advance();
                    let right = next(self)?;
                    let h = 1 + height.unwrap_or_else(|| left.depth()).max(right.depth());
                    if h > MAX_DEPTH {
                        return Err(self.too_deep());
                    }
                    height = Some(h);
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn or(&mut self) -> Result<Expr, FormulaError> {
        self.binary_level(Self::and, &[(TokenKind::OrOr, BinaryOp::Or)])
    }

    fn and(&mut self) -> Result<Expr, FormulaError> {
        self.binary_level(Self::equality, &[(TokenKind::AndAnd, BinaryOp::And)])
    }

    fn equality(&mut self) -> Result<Expr, FormulaError> {
        self.binary_level(
            Self::comparison,
            &[(TokenKind::EqEq, BinaryOp::Eq), (TokenKind::NotEq, BinaryOp::Ne)],
        )
    }

    fn comparison(&mut self) -> Result<Expr, FormulaError> {
        self.binary_level(
            Self::additive,
            &[
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::Le, BinaryOp::Le),
                (TokenKind::Gt, BinaryOp::Gt),
                (TokenKind::Ge, BinaryOp::Ge),
            ],
        )
    }

    fn additive(&mut self) -> Result<Expr, FormulaError> {
        self.binary_level(
            Self::multiplicative,
            &[(TokenKind::Plus, BinaryOp::Add), (TokenKind::Minus, BinaryOp::Sub)],
        )
    }

    fn multiplicative(&mut self) -> Result<Expr, FormulaError> {
        self.binary_level(
            Self::unary,
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Rem),
            ],
        )
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        let op = match self.peek() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.primary(),
        };
        self.advance();
        let operand = self.nested(Self::unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        let position = self.position();
        match self.advance() {
            TokenKind::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::String(s))),
            TokenKind::LParen => {
                let inner = self.ternary()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Ident(name) => self.identifier(name),
            TokenKind::Eof => Err(FormulaError::syntax(position, "unexpected end of formula")),
            other => Err(FormulaError::syntax(position, format!("unexpected token {:?}", other))),
        }
    }

    fn identifier(&mut self, name: String) -> Result<Expr, FormulaError> {
        if self.peek() == &TokenKind::LParen {
            return self.call(name);
        }

        let accessor = matches!(self.peek(), TokenKind::Dot | TokenKind::LBracket);
        match name.as_str() {
            "true" => Ok(Expr::Literal(Value::Bool(true))),
            "false" => Ok(Expr::Literal(Value::Bool(false))),
            "null" => Ok(Expr::Literal(Value::Null)),
            "price" if accessor => self.field_path(Namespace::Price),
            "usage" if accessor => self.field_path(Namespace::Usage),
            "usage" => Ok(Expr::Alias(Alias::Quantity)),
            "unitPrice" => Ok(Expr::Alias(Alias::UnitPrice)),
            _ => Err(FormulaError::UnknownIdentifier(name)),
        }
    }

    fn field_path(&mut self, namespace: Namespace) -> Result<Expr, FormulaError> {
        let mut path = Vec::new();
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    self.advance();
                    let position = self.position();
                    match self.advance() {
                        TokenKind::Ident(segment) => path.push(segment),
                        other => {
                            return Err(FormulaError::syntax(
                                position,
                                format!("expected field name, found {:?}", other),
                            ));
                        }
                    }
                }
                TokenKind::LBracket => {
                    self.advance();
                    let position = self.position();
                    match self.advance() {
                        TokenKind::Str(segment) => path.push(segment),
                        other => {
                            return Err(FormulaError::syntax(
                                position,
                                format!("expected quoted field name, found {:?}", other),
                            ));
                        }
                    }
                    self.expect(TokenKind::RBracket, "']'")?;
                }
                _ => break,
            }
        }
        Ok(Expr::Field { namespace, path })
    }

    fn call(&mut self, name: String) -> Result<Expr, FormulaError> {
        let function = Function::lookup(&name).ok_or(FormulaError::UnknownFunction(name))?;
        self.expect(TokenKind::LParen, "'('")?;

        let mut args = Vec::new();
        if self.peek() != &TokenKind::RParen {
            loop {
                args.push(self.ternary()?);
                if self.peek() == &TokenKind::Comma {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RParen, "')'")?;

        let (min, max, expected) = function.arity();
        if args.len() < min || max.is_some_and(|m| args.len() > m) {
            return Err(FormulaError::Arity {
                function: function.name(),
                expected,
                got: args.len(),
            });
        }
        Ok(Expr::Call { function, args })
    }
}
