//! Tree-walking evaluator for validated wide-dialect scripts.
//!
//! Numbers follow the usual scripting conventions: `/` always yields a float,
//! `//` and `%` floor toward negative infinity, `round` is half-to-even and
//! `int` truncates. Integer overflow and division by zero are errors.

use super::condition::CmpOp;
use super::script::{BinOp, BoolOp, Expr, Script, Stmt, UnaryOp};
use super::{ExprError, Lookup};
use crate::types::{Value, VarMap};

/// Result of executing a script.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecOutcome {
    /// Value of the last expression statement, if any.
    pub value: Option<Value>,
    /// Assignments in execution order.
    pub assigned: Vec<(String, Value)>,
}

/// Live variables layered over a read-only base scope.
pub struct Overlay<'a> {
    pub vars: &'a VarMap,
    pub base: &'a dyn Lookup,
}

impl Lookup for Overlay<'_> {
    fn lookup(&self, path: &str) -> Result<Value, ExprError> {
        match self.vars.get(path) {
            Some(v) => Ok(v.clone()),
            None => self.base.lookup(path),
        }
    }
}

/// Run every statement in order, writing assignments into `vars`.
pub fn exec(script: &Script, vars: &mut VarMap, base: &dyn Lookup) -> Result<ExecOutcome, ExprError> {
    let mut outcome = ExecOutcome::default();
    for stmt in &script.body {
        match stmt {
            Stmt::Expr(expr) => {
                let scope = Overlay { vars: &*vars, base };
                outcome.value = Some(eval(expr, &scope)?);
            }
            Stmt::Assign {
                target, op, value, pos,
            } => {
                let Expr::Name(name) = target else {
                    return Err(ExprError::disallowed("assignment to a non-name target", *pos));
                };
                let scope = Overlay { vars: &*vars, base };
                let rhs = eval(value, &scope)?;
                let new_value = match op {
                    None => rhs,
                    Some(op) => binary(*op, lookup_name(name, &scope)?, rhs)?,
                };
                vars.insert(name.clone(), new_value.clone());
                outcome.assigned.push((name.clone(), new_value));
            }
            Stmt::Forbidden { keyword, pos } => {
                return Err(ExprError::disallowed(format!("'{keyword}' statement"), *pos));
            }
        }
    }
    Ok(outcome)
}

pub fn eval(expr: &Expr, scope: &dyn Lookup) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Name(name) => lookup_name(name, scope),
        Expr::Attribute { attr, pos, .. } => Err(ExprError::disallowed(
            format!("attribute access '.{attr}'"),
            *pos,
        )),
        Expr::Tuple(items) | Expr::List(items) => items
            .iter()
            .map(|e| eval(e, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Expr::Subscript { value, index, .. } => subscript(eval(value, scope)?, eval(index, scope)?),
        Expr::Call { func, args, pos } => {
            let Expr::Name(name) = func.as_ref() else {
                return Err(ExprError::disallowed("call of a computed value", *pos));
            };
            let args = args
                .iter()
                .map(|e| eval(e, scope))
                .collect::<Result<Vec<_>, _>>()?;
            call(name, args)
        }
        Expr::Unary { op, operand } => unary(*op, eval(operand, scope)?),
        Expr::Binary { op, left, right } => binary(*op, eval(left, scope)?, eval(right, scope)?),
        Expr::Bool { op, values } => {
            let mut last = Value::None;
            for e in values {
                last = eval(e, scope)?;
                let stop = match op {
                    BoolOp::And => !last.truthy(),
                    BoolOp::Or => last.truthy(),
                };
                if stop {
                    break;
                }
            }
            Ok(last)
        }
        Expr::Compare { left, rest } => {
            let mut lhs = eval(left, scope)?;
            for (op, e) in rest {
                let rhs = eval(e, scope)?;
                if !compare(*op, &lhs, &rhs)? {
                    return Ok(Value::Bool(false));
                }
                lhs = rhs;
            }
            Ok(Value::Bool(true))
        }
        Expr::IfElse { test, body, orelse } => {
            if eval(test, scope)?.truthy() {
                eval(body, scope)
            } else {
                eval(orelse, scope)
            }
        }
    }
}

fn lookup_name(name: &str, scope: &dyn Lookup) -> Result<Value, ExprError> {
    scope.lookup(name).map_err(|_| ExprError::UnknownVariable {
        name: name.to_string(),
    })
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool, ExprError> {
    op.test(lhs, rhs).ok_or_else(|| {
        ExprError::Evaluation(format!(
            "'{}' not supported between '{}' and '{}'",
            op.symbol(),
            lhs.type_name(),
            rhs.type_name()
        ))
    })
}

fn subscript(container: Value, index: Value) -> Result<Value, ExprError> {
    let out_of_range = || ExprError::Evaluation(format!("index {index} out of range"));
    match (&container, &index) {
        (Value::List(items), Value::Int(i)) => {
            let idx = normalize_index(*i, items.len()).ok_or_else(out_of_range)?;
            Ok(items[idx].clone())
        }
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = normalize_index(*i, chars.len()).ok_or_else(out_of_range)?;
            Ok(Value::Str(chars[idx].to_string()))
        }
        (Value::Map(map), Value::Str(key)) => map
            .get(key)
            .cloned()
            .ok_or_else(|| ExprError::Evaluation(format!("key '{key}' not found"))),
        _ => Err(ExprError::Evaluation(format!(
            "'{}' is not subscriptable by '{}'",
            container.type_name(),
            index.type_name()
        ))),
    }
}

fn normalize_index(i: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let idx = if i < 0 { len + i } else { i };
    (0..len).contains(&idx).then_some(idx as usize)
}

// ---------------------------------------------------------------------------
// Arithmetic
// ---------------------------------------------------------------------------

enum Num {
    I(i64),
    F(f64),
}

fn num(v: &Value) -> Option<Num> {
    match v {
        Value::Bool(b) => Some(Num::I(i64::from(*b))),
        Value::Int(i) => Some(Num::I(*i)),
        Value::Float(f) => Some(Num::F(*f)),
        _ => None,
    }
}

fn overflow() -> ExprError {
    ExprError::Evaluation("integer overflow".into())
}

fn zero_division() -> ExprError {
    ExprError::Evaluation("division by zero".into())
}

fn unary(op: UnaryOp, v: Value) -> Result<Value, ExprError> {
    if op == UnaryOp::Not {
        return Ok(Value::Bool(!v.truthy()));
    }
    match (op, num(&v)) {
        (UnaryOp::Plus, Some(Num::I(i))) => Ok(Value::Int(i)),
        (UnaryOp::Plus, Some(Num::F(f))) => Ok(Value::Float(f)),
        (UnaryOp::Neg, Some(Num::I(i))) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
        (UnaryOp::Neg, Some(Num::F(f))) => Ok(Value::Float(-f)),
        _ => Err(ExprError::Evaluation(format!(
            "bad operand type for unary operator: '{}'",
            v.type_name()
        ))),
    }
}

pub(crate) fn binary(op: BinOp, l: Value, r: Value) -> Result<Value, ExprError> {
    match (op, &l, &r) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{a}{b}"))),
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            return Ok(Value::List(a.iter().chain(b).cloned().collect()))
        }
        _ => {}
    }
    match (num(&l), num(&r)) {
        (Some(Num::I(a)), Some(Num::I(b))) => int_op(op, a, b),
        (Some(a), Some(b)) => float_op(op, as_float(a), as_float(b)),
        _ => Err(ExprError::Evaluation(format!(
            "unsupported operand types for {}: '{}' and '{}'",
            op.symbol(),
            l.type_name(),
            r.type_name()
        ))),
    }
}

fn as_float(n: Num) -> f64 {
    match n {
        Num::I(i) => i as f64,
        Num::F(f) => f,
    }
}

fn int_op(op: BinOp, a: i64, b: i64) -> Result<Value, ExprError> {
    let v = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::Div => return float_op(op, a as f64, b as f64),
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(zero_division());
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(zero_division());
            }
            let r = a.checked_rem(b).ok_or_else(overflow)?;
            if r != 0 && ((r < 0) != (b < 0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if b < 0 {
                return float_op(op, a as f64, b as f64);
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
    };
    Ok(Value::Int(v))
}

fn float_op(op: BinOp, a: f64, b: f64) -> Result<Value, ExprError> {
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(zero_division());
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(zero_division());
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(zero_division());
            }
            a - b * (a / b).floor()
        }
        BinOp::Pow => a.powf(b),
    };
    if v.is_nan() {
        return Err(ExprError::Evaluation(format!(
            "{} produced an undefined result",
            op.symbol()
        )));
    }
    Ok(Value::Float(v))
}

// ---------------------------------------------------------------------------
// Builtins
// ---------------------------------------------------------------------------

fn to_int(x: f64) -> Result<i64, ExprError> {
    if !x.is_finite() || x < i64::MIN as f64 || x > i64::MAX as f64 {
        return Err(ExprError::Evaluation(format!("cannot convert {x} to int")));
    }
    Ok(x as i64)
}

fn arity(name: &str, args: &[Value], allowed: std::ops::RangeInclusive<usize>) -> Result<(), ExprError> {
    if allowed.contains(&args.len()) {
        Ok(())
    } else {
        Err(ExprError::Evaluation(format!(
            "{name}() takes {} argument(s), got {}",
            if allowed.start() == allowed.end() {
                allowed.start().to_string()
            } else {
                format!("{} to {}", allowed.start(), allowed.end())
            },
            args.len()
        )))
    }
}

fn numeric_arg(name: &str, v: &Value) -> Result<Num, ExprError> {
    num(v).ok_or_else(|| {
        ExprError::Evaluation(format!("{name}() expects a number, got '{}'", v.type_name()))
    })
}

fn call(name: &str, mut args: Vec<Value>) -> Result<Value, ExprError> {
    match name {
        "min" | "max" => {
            let items = if args.len() == 1 {
                match args.remove(0) {
                    Value::List(items) => items,
                    single => {
                        return Err(ExprError::Evaluation(format!(
                            "'{}' object is not iterable",
                            single.type_name()
                        )))
                    }
                }
            } else {
                args
            };
            let mut iter = items.into_iter();
            let mut best = iter
                .next()
                .ok_or_else(|| ExprError::Evaluation(format!("{name}() arg is an empty sequence")))?;
            let want = if name == "min" { CmpOp::Lt } else { CmpOp::Gt };
            for item in iter {
                if compare(want, &item, &best)? {
                    best = item;
                }
            }
            Ok(best)
        }
        "abs" => {
            arity(name, &args, 1..=1)?;
            match numeric_arg(name, &args[0])? {
                Num::I(i) => i.checked_abs().map(Value::Int).ok_or_else(overflow),
                Num::F(f) => Ok(Value::Float(f.abs())),
            }
        }
        "round" => {
            arity(name, &args, 1..=2)?;
            let digits = match args.get(1) {
                None | Some(Value::None) => None,
                Some(Value::Int(d)) => Some(*d),
                Some(other) => {
                    return Err(ExprError::Evaluation(format!(
                        "round() digits must be an int, got '{}'",
                        other.type_name()
                    )))
                }
            };
            match (numeric_arg(name, &args[0])?, digits) {
                (Num::I(i), None) => Ok(Value::Int(i)),
                (Num::F(f), None) => Ok(Value::Int(to_int(f.round_ties_even())?)),
                (Num::I(i), Some(d)) if d >= 0 => Ok(Value::Int(i)),
                (n, Some(d)) => {
                    let exp = i32::try_from(d).map_err(|_| overflow())?;
                    let factor = 10f64.powi(exp);
                    let x = as_float(n);
                    Ok(Value::Float((x * factor).round_ties_even() / factor))
                }
            }
        }
        "int" => {
            arity(name, &args, 1..=1)?;
            match args.remove(0) {
                Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                    ExprError::Evaluation(format!("invalid literal for int(): '{s}'"))
                }),
                other => match numeric_arg(name, &other)? {
                    Num::I(i) => Ok(Value::Int(i)),
                    Num::F(f) => Ok(Value::Int(to_int(f.trunc())?)),
                },
            }
        }
        "float" => {
            arity(name, &args, 1..=1)?;
            match args.remove(0) {
                Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                    ExprError::Evaluation(format!("could not convert string to float: '{s}'"))
                }),
                other => Ok(Value::Float(as_float(numeric_arg(name, &other)?))),
            }
        }
        "floor" | "ceil" => {
            arity(name, &args, 1..=1)?;
            match numeric_arg(name, &args[0])? {
                Num::I(i) => Ok(Value::Int(i)),
                Num::F(f) if name == "floor" => Ok(Value::Int(to_int(f.floor())?)),
                Num::F(f) => Ok(Value::Int(to_int(f.ceil())?)),
            }
        }
        other => Err(ExprError::Evaluation(format!("'{other}' is not callable"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{sandbox, script};

    // ---- helpers ----

    fn vars() -> VarMap {
        let mut v = VarMap::new();
        v.insert("units".into(), Value::Int(5));
        v.insert("bankroll".into(), Value::Float(300.0));
        v.insert("point".into(), Value::Int(6));
        v
    }

    fn run(src: &str) -> Result<Value, ExprError> {
        let parsed = script::parse(src)?;
        sandbox::validate(&parsed)?;
        let base = vars();
        let expr = parsed.as_expression().expect("single expression");
        eval(expr, &base)
    }

    // ---- arithmetic ----

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(run("units * 2 + 1").unwrap(), Value::Int(11));
        assert_eq!(run("2 ** 10").unwrap(), Value::Int(1024));
        assert_eq!(run("-7 // 2").unwrap(), Value::Int(-4));
        assert_eq!(run("-7 % 3").unwrap(), Value::Int(2));
        assert_eq!(run("7 % -3").unwrap(), Value::Int(-2));
    }

    #[test]
    fn test_true_division_is_float() {
        assert_eq!(run("units / 2").unwrap(), Value::Float(2.5));
        assert_eq!(run("4 / 2").unwrap(), Value::Float(2.0));
    }

    #[test]
    fn test_division_by_zero_is_error() {
        assert!(matches!(run("units / 0"), Err(ExprError::Evaluation(_))));
        assert!(matches!(run("units // 0"), Err(ExprError::Evaluation(_))));
        assert!(matches!(run("units % 0.0"), Err(ExprError::Evaluation(_))));
    }

    #[test]
    fn test_overflow_is_error() {
        assert!(matches!(run("9223372036854775807 + 1"), Err(ExprError::Evaluation(_))));
    }

    #[test]
    fn test_type_error() {
        assert!(matches!(run("'a' - 1"), Err(ExprError::Evaluation(_))));
        assert_eq!(run("'a' + 'b'").unwrap(), Value::Str("ab".into()));
    }

    // ---- logic ----

    #[test]
    fn test_ternary_and_membership() {
        assert_eq!(run("10 if point in (6, 8) else 5").unwrap(), Value::Int(10));
        assert_eq!(run("point not in [4, 10]").unwrap(), Value::Bool(true));
        assert_eq!(run("'ss' in 'press'").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_chained_comparison() {
        assert_eq!(run("1 < units <= 5").unwrap(), Value::Bool(true));
        assert_eq!(run("1 < units < 5").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_ordering_type_mismatch_is_error() {
        assert!(matches!(run("'a' < 1"), Err(ExprError::Evaluation(_))));
    }

    #[test]
    fn test_bool_ops_return_operands() {
        assert_eq!(run("0 or units").unwrap(), Value::Int(5));
        assert_eq!(run("units and 0").unwrap(), Value::Int(0));
        assert_eq!(run("not units").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_short_circuit_skips_unknown_name() {
        assert_eq!(run("True or missing").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_unknown_variable_message() {
        let err = run("missing + 1").unwrap_err();
        assert_eq!(err.to_string(), "unknown variable 'missing'");
    }

    // ---- builtins ----

    #[test]
    fn test_round_is_half_to_even() {
        assert_eq!(run("round(2.5)").unwrap(), Value::Int(2));
        assert_eq!(run("round(3.5)").unwrap(), Value::Int(4));
        assert_eq!(run("round(7)").unwrap(), Value::Int(7));
        assert_eq!(run("round(2.25, 1)").unwrap(), Value::Float(2.2));
    }

    #[test]
    fn test_int_float_floor_ceil() {
        assert_eq!(run("int(-2.7)").unwrap(), Value::Int(-2));
        assert_eq!(run("int('12')").unwrap(), Value::Int(12));
        assert_eq!(run("float(units)").unwrap(), Value::Float(5.0));
        assert_eq!(run("floor(-2.5)").unwrap(), Value::Int(-3));
        assert_eq!(run("ceil(2.1)").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_min_max_abs() {
        assert_eq!(run("max(units, 10)").unwrap(), Value::Int(10));
        assert_eq!(run("min([3, 1, 2])").unwrap(), Value::Int(1));
        assert_eq!(run("max(1, 2.5)").unwrap(), Value::Float(2.5));
        assert_eq!(run("abs(-3)").unwrap(), Value::Int(3));
        assert!(run("max()").is_err());
    }

    #[test]
    fn test_literal_subscripts() {
        assert_eq!(run("[4, 5, 6][-1]").unwrap(), Value::Int(6));
        assert!(run("[4, 5, 6][3]").is_err());
    }

    // ---- statements ----

    #[test]
    fn test_exec_assignments_and_augmented() {
        let parsed = script::parse("units += 5; bet = units * 2\nflag = bet > 10").unwrap();
        sandbox::validate(&parsed).unwrap();
        let mut live = vars();
        let base = VarMap::new();
        let out = exec(&parsed, &mut live, &base).unwrap();
        assert_eq!(live["units"], Value::Int(10));
        assert_eq!(live["bet"], Value::Int(20));
        assert_eq!(live["flag"], Value::Bool(true));
        assert_eq!(
            out.assigned.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            vec!["units", "bet", "flag"]
        );
        assert!(out.value.is_none());
    }

    #[test]
    fn test_exec_reads_base_scope_under_live_vars() {
        let parsed = script::parse("doubled = point * 2").unwrap();
        let mut live = VarMap::new();
        let base = vars();
        exec(&parsed, &mut live, &base).unwrap();
        assert_eq!(live["doubled"], Value::Int(12));
    }

    #[test]
    fn test_augmented_on_missing_name_fails() {
        let parsed = script::parse("nope += 1").unwrap();
        let mut live = VarMap::new();
        let base = VarMap::new();
        assert_eq!(
            exec(&parsed, &mut live, &base).unwrap_err(),
            ExprError::UnknownVariable { name: "nope".into() }
        );
        assert!(live.is_empty());
    }
}
