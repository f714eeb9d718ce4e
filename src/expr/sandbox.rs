//! Static validation of wide-dialect scripts.
//!
//! Runs once at compile time, before any evaluation. Every node kind is
//! matched explicitly so a new AST variant cannot slip through unchecked.

use super::script::{Expr, Script, Stmt, UnaryOp};
use super::ExprError;
use crate::types::Value;

/// Pure functions callable from expressions.
pub const ALLOWED_CALLS: &[&str] = &["min", "max", "abs", "round", "int", "float", "floor", "ceil"];

pub fn validate(script: &Script) -> Result<(), ExprError> {
    for stmt in &script.body {
        match stmt {
            Stmt::Expr(expr) => check(expr)?,
            Stmt::Assign {
                target, value, pos, ..
            } => {
                if !matches!(target, Expr::Name(_)) {
                    return Err(ExprError::disallowed("assignment to a non-name target", *pos));
                }
                check(value)?;
            }
            Stmt::Forbidden { keyword, pos } => {
                return Err(ExprError::disallowed(format!("'{keyword}' statement"), *pos));
            }
        }
    }
    Ok(())
}

fn check(expr: &Expr) -> Result<(), ExprError> {
    match expr {
        Expr::Literal(_) | Expr::Name(_) => Ok(()),
        Expr::Attribute { attr, pos, .. } => Err(ExprError::disallowed(
            format!("attribute access '.{attr}'"),
            *pos,
        )),
        Expr::Subscript { value, index, pos } => {
            if !is_literal_key(index) {
                return Err(ExprError::disallowed("subscript with a non-literal key", *pos));
            }
            check(value)
        }
        Expr::Call { func, args, pos } => match func.as_ref() {
            Expr::Name(name) if ALLOWED_CALLS.contains(&name.as_str()) => {
                args.iter().try_for_each(check)
            }
            Expr::Name(name) => Err(ExprError::disallowed(format!("call to '{name}'"), *pos)),
            _ => Err(ExprError::disallowed("call of a computed value", *pos)),
        },
        Expr::Tuple(items) | Expr::List(items) => items.iter().try_for_each(check),
        Expr::Unary { operand, .. } => check(operand),
        Expr::Binary { left, right, .. } => {
            check(left)?;
            check(right)
        }
        Expr::Bool { values, .. } => values.iter().try_for_each(check),
        Expr::Compare { left, rest } => {
            check(left)?;
            rest.iter().try_for_each(|(_, e)| check(e))
        }
        Expr::IfElse { test, body, orelse } => {
            check(test)?;
            check(body)?;
            check(orelse)
        }
    }
}

fn is_literal_key(index: &Expr) -> bool {
    match index {
        Expr::Literal(Value::Int(_) | Value::Str(_)) => true,
        Expr::Unary {
            op: UnaryOp::Neg,
            operand,
        } => matches!(operand.as_ref(), Expr::Literal(Value::Int(_))),
        _ => false,
    }
}
