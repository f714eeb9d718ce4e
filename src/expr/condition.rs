//! Condition dialect: boolean guards over snapshot paths.
//!
//! ```text
//! or   := and (OR and)*
//! and  := not (AND not)*
//! not  := NOT* cmp
//! cmp  := term (op term)?        op in < > <= >= == !=
//! term := literal | dotted-ident | '(' or ')'
//! ```

use std::cmp::Ordering;

use super::lexer::{tokenize, Mode, Tok, Token};
use super::{ExprError, Lookup};
use crate::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    In,
    NotIn,
}

impl CmpOp {
    pub fn from_symbol(op: &str) -> Option<Self> {
        Some(match op {
            "<" => CmpOp::Lt,
            ">" => CmpOp::Gt,
            "<=" => CmpOp::Le,
            ">=" => CmpOp::Ge,
            "==" => CmpOp::Eq,
            "!=" => CmpOp::Ne,
            _ => return None,
        })
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Gt => ">",
            CmpOp::Le => "<=",
            CmpOp::Ge => ">=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
        }
    }

    /// Apply the comparison. `None` means the operand types do not support it.
    pub fn test(&self, left: &Value, right: &Value) -> Option<bool> {
        match self {
            CmpOp::Eq => Some(left.loose_eq(right)),
            CmpOp::Ne => Some(!left.loose_eq(right)),
            CmpOp::Lt => left.compare(right).map(|o| o == Ordering::Less),
            CmpOp::Gt => left.compare(right).map(|o| o == Ordering::Greater),
            CmpOp::Le => left.compare(right).map(|o| o != Ordering::Greater),
            CmpOp::Ge => left.compare(right).map(|o| o != Ordering::Less),
            CmpOp::In => contains(right, left),
            CmpOp::NotIn => contains(right, left).map(|b| !b),
        }
    }
}

fn contains(container: &Value, item: &Value) -> Option<bool> {
    match (container, item) {
        (Value::List(items), _) => Some(items.iter().any(|v| v.loose_eq(item))),
        (Value::Str(hay), Value::Str(needle)) => Some(hay.contains(needle.as_str())),
        (Value::Map(map), Value::Str(key)) => Some(map.contains_key(key)),
        _ => None,
    }
}

/// Parsed guard expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Literal(Value),
    Path(String),
    Not(Box<Condition>),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Compare {
        op: CmpOp,
        left: Box<Condition>,
        right: Box<Condition>,
    },
}

impl Condition {
    /// Evaluate against a scope. Unknown paths propagate; comparisons across
    /// incompatible types are simply false. A path outside a comparison
    /// evaluates to its truthiness.
    pub fn eval(&self, scope: &dyn Lookup) -> Result<Value, ExprError> {
        match self {
            Condition::Literal(v) => Ok(v.clone()),
            Condition::Path(path) => Ok(Value::Bool(scope.lookup(path)?.truthy())),
            Condition::Not(inner) => Ok(Value::Bool(!inner.eval(scope)?.truthy())),
            Condition::And(parts) => {
                for part in parts {
                    if !part.eval(scope)?.truthy() {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Condition::Or(parts) => {
                for part in parts {
                    if part.eval(scope)?.truthy() {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Condition::Compare { op, left, right } => {
                let l = left.operand(scope)?;
                let r = right.operand(scope)?;
                Ok(Value::Bool(op.test(&l, &r).unwrap_or(false)))
            }
        }
    }

    /// Comparison operands keep the raw value a path resolves to.
    fn operand(&self, scope: &dyn Lookup) -> Result<Value, ExprError> {
        match self {
            Condition::Path(path) => scope.lookup(path),
            other => other.eval(scope),
        }
    }
}

/// Parse condition text. Blank input is the constant `TRUE`.
pub fn parse(src: &str) -> Result<Condition, ExprError> {
    if src.trim().is_empty() {
        return Ok(Condition::Literal(Value::Bool(true)));
    }
    let mut parser = Parser {
        tokens: tokenize(src, Mode::Condition)?,
        idx: 0,
    };
    let cond = parser.or_expr()?;
    let tail = parser.peek();
    if tail.tok != Tok::Eof {
        return Err(ExprError::syntax(
            format!("unexpected {}", tail.tok.describe()),
            tail.pos,
        ));
    }
    Ok(cond)
}

struct Parser {
    tokens: Vec<Token>,
    idx: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with Eof.
        &self.tokens[self.idx.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.idx < self.tokens.len() - 1 {
            self.idx += 1;
        }
        tok
    }

    fn or_expr(&mut self) -> Result<Condition, ExprError> {
        let mut parts = vec![self.and_expr()?];
        while self.peek().tok == Tok::Or {
            self.advance();
            parts.push(self.and_expr()?);
        }
        Ok(collapse(parts, Condition::Or))
    }

    fn and_expr(&mut self) -> Result<Condition, ExprError> {
        let mut parts = vec![self.not_expr()?];
        while self.peek().tok == Tok::And {
            self.advance();
            parts.push(self.not_expr()?);
        }
        Ok(collapse(parts, Condition::And))
    }

    fn not_expr(&mut self) -> Result<Condition, ExprError> {
        let mut negations = 0;
        while self.peek().tok == Tok::Not {
            self.advance();
            negations += 1;
        }
        let mut cond = self.cmp_expr()?;
        for _ in 0..negations {
            cond = Condition::Not(Box::new(cond));
        }
        Ok(cond)
    }

    fn cmp_expr(&mut self) -> Result<Condition, ExprError> {
        let left = self.term()?;
        let op = match self.peek().tok {
            Tok::Op(sym) => CmpOp::from_symbol(sym),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let right = self.term()?;
                Ok(Condition::Compare {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            None => Ok(left),
        }
    }

    fn term(&mut self) -> Result<Condition, ExprError> {
        let token = self.advance();
        let cond = match token.tok {
            Tok::Int(i) => Condition::Literal(Value::Int(i)),
            Tok::Float(f) => Condition::Literal(Value::Float(f)),
            Tok::Str(s) => Condition::Literal(Value::Str(s)),
            Tok::True => Condition::Literal(Value::Bool(true)),
            Tok::False => Condition::Literal(Value::Bool(false)),
            Tok::NoneLit => Condition::Literal(Value::None),
            Tok::Ident(path) => Condition::Path(path),
            Tok::Op("(") => {
                let inner = self.or_expr()?;
                let close = self.advance();
                if close.tok != Tok::Op(")") {
                    return Err(ExprError::syntax(
                        format!("expected ')' but found {}", close.tok.describe()),
                        close.pos,
                    ));
                }
                inner
            }
            other => {
                return Err(ExprError::syntax(
                    format!("unexpected {}", other.describe()),
                    token.pos,
                ))
            }
        };
        Ok(cond)
    }
}

fn collapse(mut parts: Vec<Condition>, wrap: fn(Vec<Condition>) -> Condition) -> Condition {
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        wrap(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Snapshot, VarMap};

    // ---- helpers ----

    fn scope() -> Snapshot {
        let mut vars = VarMap::new();
        vars.insert("units".into(), Value::Int(5));
        vars.insert("label".into(), Value::Str("press".into()));
        vars.insert("empty".into(), Value::Str(String::new()));
        Snapshot {
            point: Some(6),
            rolls_since_point: 3,
            vars,
            ..Default::default()
        }
    }

    fn eval(src: &str) -> Result<Value, ExprError> {
        parse(src)?.eval(&scope())
    }

    // ---- tests ----

    #[test]
    fn test_empty_is_true() {
        assert_eq!(parse("").unwrap(), Condition::Literal(Value::Bool(true)));
        assert_eq!(parse("   ").unwrap(), Condition::Literal(Value::Bool(true)));
    }

    #[test]
    fn test_precedence_and_binds_tighter_than_or() {
        assert_eq!(eval("TRUE OR FALSE AND FALSE").unwrap(), Value::Bool(true));
        assert_eq!(eval("(TRUE OR FALSE) AND FALSE").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_not_stacks() {
        assert_eq!(eval("NOT NOT TRUE").unwrap(), Value::Bool(true));
        assert_eq!(eval("not point == 6").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval("rolls_since_point == 3").unwrap(), Value::Bool(true));
        assert_eq!(eval("units >= 5.0").unwrap(), Value::Bool(true));
        assert_eq!(eval("label != 'press'").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_type_mismatch_is_false_not_error() {
        assert_eq!(eval("label > 3").unwrap(), Value::Bool(false));
        assert_eq!(eval("label == 3").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_bare_identifier_is_truthiness() {
        assert_eq!(eval("units").unwrap(), Value::Bool(true));
        assert_eq!(eval("empty").unwrap(), Value::Bool(false));
        assert_eq!(eval("NOT units").unwrap(), Value::Bool(false));
        assert_eq!(eval("empty OR FALSE").unwrap(), Value::Bool(false));
        assert_eq!(eval("label AND units").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_comparison_operands_keep_raw_values() {
        assert_eq!(eval("units == 5").unwrap(), Value::Bool(true));
        assert_eq!(eval("(units) > 4").unwrap(), Value::Bool(true));
        assert_eq!(eval("label == 'press'").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_unknown_path_propagates() {
        assert_eq!(
            eval("bets.8 > 0").unwrap_err(),
            ExprError::UnknownPath {
                path: "bets.8".into()
            }
        );
    }

    #[test]
    fn test_short_circuit_skips_unknown_path() {
        assert_eq!(eval("FALSE AND missing.path").unwrap(), Value::Bool(false));
        assert_eq!(eval("TRUE OR missing").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_chained_comparison_is_syntax_error() {
        assert!(matches!(parse("1 < 2 < 3"), Err(ExprError::Syntax { .. })));
    }

    #[test]
    fn test_unbalanced_paren_is_syntax_error() {
        match parse("(TRUE AND FALSE") {
            Err(ExprError::Syntax { line, col, .. }) => assert_eq!((line, col), (1, 16)),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_membership_not_in_condition_grammar() {
        assert!(parse("point in (6, 8)").is_err());
    }

    #[test]
    fn test_cmp_op_membership() {
        let list = Value::List(vec![Value::Int(6), Value::Int(8)]);
        assert_eq!(CmpOp::In.test(&Value::Int(8), &list), Some(true));
        assert_eq!(CmpOp::NotIn.test(&Value::Int(5), &list), Some(true));
        assert_eq!(CmpOp::In.test(&Value::Int(5), &Value::Int(5)), None);
    }
}
