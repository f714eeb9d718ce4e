//! Wide dialect: arithmetic expressions and assignment statements.
//!
//! The parser is deliberately permissive. It builds nodes for attribute
//! access, arbitrary subscripts and calls, and records reserved statement
//! keywords as [`Stmt::Forbidden`], leaving rejection to the sandbox pass.

use super::condition::CmpOp;
use super::lexer::{tokenize, Mode, Pos, Tok, Token};
use super::ExprError;
use crate::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
        }
    }

    fn augmented(op: &str) -> Option<Self> {
        Some(match op {
            "+=" => BinOp::Add,
            "-=" => BinOp::Sub,
            "*=" => BinOp::Mul,
            "/=" => BinOp::Div,
            "//=" => BinOp::FloorDiv,
            "%=" => BinOp::Mod,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Name(String),
    Attribute {
        value: Box<Expr>,
        attr: String,
        pos: Pos,
    },
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
        pos: Pos,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        pos: Pos,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Bool {
        op: BoolOp,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        rest: Vec<(CmpOp, Expr)>,
    },
    IfElse {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    /// `target = value` or, with `op`, `target op= value`.
    Assign {
        target: Expr,
        op: Option<BinOp>,
        value: Expr,
        pos: Pos,
    },
    /// A statement introduced by a reserved keyword; its body is skipped.
    Forbidden { keyword: String, pos: Pos },
}

/// A parsed sequence of statements.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub body: Vec<Stmt>,
}

impl Script {
    /// The expression, when the script is exactly one expression statement.
    pub fn as_expression(&self) -> Option<&Expr> {
        match self.body.as_slice() {
            [Stmt::Expr(e)] => Some(e),
            _ => None,
        }
    }

    pub fn has_assignments(&self) -> bool {
        self.body.iter().any(|s| matches!(s, Stmt::Assign { .. }))
    }
}

pub fn parse(src: &str) -> Result<Script, ExprError> {
    let mut parser = Parser {
        tokens: tokenize(src, Mode::Script)?,
        idx: 0,
    };
    let mut body = Vec::new();
    loop {
        parser.skip_separators();
        if parser.peek().tok == Tok::Eof {
            break;
        }
        body.push(parser.statement()?);
        let next = parser.peek();
        match next.tok {
            Tok::Eof | Tok::Newline | Tok::Op(";") => {}
            ref other => {
                return Err(ExprError::syntax(
                    format!("unexpected {}", other.describe()),
                    next.pos,
                ))
            }
        }
    }
    if body.is_empty() {
        return Err(ExprError::syntax("empty expression", Pos { line: 1, col: 1 }));
    }
    Ok(Script { body })
}

struct Parser {
    tokens: Vec<Token>,
    idx: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.idx.min(self.tokens.len() - 1)]
    }

    fn peek_tok(&self) -> &Tok {
        &self.peek().tok
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.idx < self.tokens.len() - 1 {
            self.idx += 1;
        }
        tok
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek_tok(), Tok::Op(o) if *o == op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), ExprError> {
        let token = self.advance();
        match token.tok {
            Tok::Op(o) if o == op => Ok(()),
            other => Err(ExprError::syntax(
                format!("expected '{op}' but found {}", other.describe()),
                token.pos,
            )),
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek_tok(), Tok::Newline | Tok::Op(";")) {
            self.advance();
        }
    }

    // ---- statements ----

    fn statement(&mut self) -> Result<Stmt, ExprError> {
        if let Tok::Reserved(kw) = self.peek_tok().clone() {
            let pos = self.advance().pos;
            let mut depth = 0usize;
            loop {
                match self.peek_tok() {
                    Tok::Eof => break,
                    Tok::Newline | Tok::Op(";") if depth == 0 => break,
                    Tok::Op("(") | Tok::Op("[") => depth += 1,
                    Tok::Op(")") | Tok::Op("]") => depth = depth.saturating_sub(1),
                    _ => {}
                }
                self.advance();
            }
            return Ok(Stmt::Forbidden { keyword: kw, pos });
        }

        let pos = self.peek().pos;
        let expr = self.expression()?;
        let op = match *self.peek_tok() {
            Tok::Op("=") => None,
            Tok::Op(o) => match BinOp::augmented(o) {
                Some(op) => Some(op),
                None => return Ok(Stmt::Expr(expr)),
            },
            _ => return Ok(Stmt::Expr(expr)),
        };
        self.advance();
        let value = self.expression()?;
        Ok(Stmt::Assign {
            target: expr,
            op,
            value,
            pos,
        })
    }

    // ---- expressions, lowest precedence first ----

    fn expression(&mut self) -> Result<Expr, ExprError> {
        let body = self.or_expr()?;
        if *self.peek_tok() != Tok::If {
            return Ok(body);
        }
        self.advance();
        let test = self.or_expr()?;
        let token = self.advance();
        if token.tok != Tok::Else {
            return Err(ExprError::syntax(
                format!("expected 'else' but found {}", token.tok.describe()),
                token.pos,
            ));
        }
        let orelse = self.expression()?;
        Ok(Expr::IfElse {
            test: Box::new(test),
            body: Box::new(body),
            orelse: Box::new(orelse),
        })
    }

    fn or_expr(&mut self) -> Result<Expr, ExprError> {
        let mut values = vec![self.and_expr()?];
        while *self.peek_tok() == Tok::Or {
            self.advance();
            values.push(self.and_expr()?);
        }
        Ok(bool_node(BoolOp::Or, values))
    }

    fn and_expr(&mut self) -> Result<Expr, ExprError> {
        let mut values = vec![self.not_expr()?];
        while *self.peek_tok() == Tok::And {
            self.advance();
            values.push(self.not_expr()?);
        }
        Ok(bool_node(BoolOp::And, values))
    }

    fn not_expr(&mut self) -> Result<Expr, ExprError> {
        if *self.peek_tok() == Tok::Not {
            self.advance();
            let operand = self.not_expr()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.arith()?;
        let mut rest = Vec::new();
        loop {
            let followed_by_in =
                self.tokens.get(self.idx + 1).map(|t| &t.tok) == Some(&Tok::In);
            let op = match self.peek_tok().clone() {
                Tok::Op(sym) => match CmpOp::from_symbol(sym) {
                    Some(op) => op,
                    None => break,
                },
                Tok::In => CmpOp::In,
                Tok::Not if followed_by_in => {
                    self.advance();
                    CmpOp::NotIn
                }
                _ => break,
            };
            self.advance();
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                rest,
            })
        }
    }

    fn arith(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek_tok() {
                Tok::Op("+") => BinOp::Add,
                Tok::Op("-") => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.term()?;
            left = binary(op, left, right);
        }
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek_tok() {
                Tok::Op("*") => BinOp::Mul,
                Tok::Op("/") => BinOp::Div,
                Tok::Op("//") => BinOp::FloorDiv,
                Tok::Op("%") => BinOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.factor()?;
            left = binary(op, left, right);
        }
    }

    fn factor(&mut self) -> Result<Expr, ExprError> {
        let op = match self.peek_tok() {
            Tok::Op("-") => UnaryOp::Neg,
            Tok::Op("+") => UnaryOp::Plus,
            _ => return self.power(),
        };
        self.advance();
        let operand = self.factor()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> Result<Expr, ExprError> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            // Right associative, and binds tighter than a unary minus on its left.
            let exponent = self.factor()?;
            return Ok(binary(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.atom()?;
        loop {
            let pos = self.peek().pos;
            if self.eat_op("(") {
                let args = self.sequence(")")?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    pos,
                };
            } else if self.eat_op("[") {
                let index = self.expression()?;
                self.expect_op("]")?;
                expr = Expr::Subscript {
                    value: Box::new(expr),
                    index: Box::new(index),
                    pos,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma separated expressions up to `close`, trailing comma allowed.
    fn sequence(&mut self, close: &str) -> Result<Vec<Expr>, ExprError> {
        let mut items = Vec::new();
        loop {
            if self.eat_op(close) {
                return Ok(items);
            }
            items.push(self.expression()?);
            if let Tok::Reserved(kw) = self.peek_tok() {
                return Err(ExprError::disallowed(
                    format!("'{kw}' inside an expression"),
                    self.peek().pos,
                ));
            }
            if !self.eat_op(",") {
                self.expect_op(close)?;
                return Ok(items);
            }
        }
    }

    fn atom(&mut self) -> Result<Expr, ExprError> {
        let token = self.advance();
        let expr = match token.tok {
            Tok::Int(i) => Expr::Literal(Value::Int(i)),
            Tok::Float(f) => Expr::Literal(Value::Float(f)),
            Tok::Str(s) => Expr::Literal(Value::Str(s)),
            Tok::True => Expr::Literal(Value::Bool(true)),
            Tok::False => Expr::Literal(Value::Bool(false)),
            Tok::NoneLit => Expr::Literal(Value::None),
            Tok::Ident(name) => dotted(&name, token.pos),
            Tok::Op("(") => {
                if self.eat_op(")") {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.expression()?;
                if self.eat_op(")") {
                    return Ok(first);
                }
                self.expect_op(",")?;
                let mut items = vec![first];
                items.extend(self.sequence(")")?);
                Expr::Tuple(items)
            }
            Tok::Op("[") => Expr::List(self.sequence("]")?),
            Tok::Reserved(kw) => {
                return Err(ExprError::disallowed(
                    format!("'{kw}' inside an expression"),
                    token.pos,
                ))
            }
            other => {
                return Err(ExprError::syntax(
                    format!("unexpected {}", other.describe()),
                    token.pos,
                ))
            }
        };
        Ok(expr)
    }
}

/// `a.b.c` becomes nested attribute nodes over the name `a`.
fn dotted(path: &str, pos: Pos) -> Expr {
    let mut segments = path.split('.');
    let mut expr = Expr::Name(segments.next().unwrap_or_default().to_string());
    for attr in segments {
        expr = Expr::Attribute {
            value: Box::new(expr),
            attr: attr.to_string(),
            pos,
        };
    }
    expr
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn bool_node(op: BoolOp, mut values: Vec<Expr>) -> Expr {
    if values.len() == 1 {
        values.remove(0)
    } else {
        Expr::Bool { op, values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(src: &str) -> Expr {
        parse(src)
            .unwrap()
            .as_expression()
            .cloned()
            .expect("single expression")
    }

    fn name(n: &str) -> Box<Expr> {
        Box::new(Expr::Name(n.into()))
    }

    fn int(i: i64) -> Box<Expr> {
        Box::new(Expr::Literal(Value::Int(i)))
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(
            expr("units + 2 * 3"),
            Expr::Binary {
                op: BinOp::Add,
                left: name("units"),
                right: Box::new(Expr::Binary {
                    op: BinOp::Mul,
                    left: int(2),
                    right: int(3)
                })
            }
        );
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        assert_eq!(
            expr("-2 ** 2"),
            Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(Expr::Binary {
                    op: BinOp::Pow,
                    left: int(2),
                    right: int(2)
                })
            }
        );
    }

    #[test]
    fn test_ternary() {
        assert!(matches!(expr("10 if point else 5"), Expr::IfElse { .. }));
    }

    #[test]
    fn test_chained_comparison_and_not_in() {
        match expr("1 < x <= 3") {
            Expr::Compare { rest, .. } => assert_eq!(rest.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        match expr("point not in (4, 10)") {
            Expr::Compare { rest, .. } => {
                assert_eq!(rest[0].0, CmpOp::NotIn);
                assert!(matches!(rest[0].1, Expr::Tuple(ref items) if items.len() == 2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parenthesized_is_not_tuple() {
        assert_eq!(expr("(units)"), Expr::Name("units".into()));
        assert!(matches!(expr("(6,)"), Expr::Tuple(ref v) if v.len() == 1));
    }

    #[test]
    fn test_statements_split_on_semicolon_and_newline() {
        let script = parse("a = 1; b += 2\nc").unwrap();
        assert_eq!(script.body.len(), 3);
        assert!(matches!(script.body[1], Stmt::Assign { op: Some(BinOp::Add), .. }));
        assert!(script.has_assignments());
        assert!(script.as_expression().is_none());
    }

    #[test]
    fn test_dotted_name_becomes_attribute() {
        assert!(matches!(expr("bets.place_6"), Expr::Attribute { ref attr, .. } if attr == "place_6"));
    }

    #[test]
    fn test_reserved_statement_is_recorded_not_rejected() {
        let script = parse("import os; x = 1").unwrap();
        assert!(matches!(script.body[0], Stmt::Forbidden { ref keyword, .. } if keyword == "import"));
        assert_eq!(script.body.len(), 2);
    }

    #[test]
    fn test_reserved_in_expression_position() {
        assert!(matches!(parse("x = lambda"), Err(ExprError::Disallowed { .. })));
        assert!(matches!(
            parse("[x for x in y]"),
            Err(ExprError::Disallowed { .. })
        ));
    }

    #[test]
    fn test_syntax_error_position() {
        match parse("a = (1 +") {
            Err(ExprError::Syntax { line, col, .. }) => assert_eq!((line, col), (1, 9)),
            other => panic!("expected syntax error, got {other:?}"),
        }
        assert!(matches!(parse(""), Err(ExprError::Syntax { .. })));
    }
}
