//! Sandboxed expression language.
//!
//! Two dialects share one tokenizer:
//! - the **condition** dialect ([`compile`] / [`evaluate`]) used for rule
//!   guards: boolean logic and a single comparison over snapshot paths;
//! - the **wide** dialect ([`compile_script`], [`eval_value`], [`exec`]) used
//!   for amounts and "do" statements: arithmetic, ternaries, membership,
//!   whitelisted pure calls and assignments.
//!
//! Both are parsed into tagged ASTs and cached process-wide by source text.
//! Wide scripts are validated by [`sandbox`] before they are cached, so an
//! `Arc<Script>` handed out by this module is always safe to run.

pub mod condition;
pub mod interp;
pub mod lexer;
pub mod sandbox;
pub mod script;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use crate::types::{Value, VarMap};
pub use condition::{CmpOp, Condition};
pub use interp::ExecOutcome;
pub use lexer::Pos;
pub use script::Script;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("Syntax error at line {line}, column {col}: {message}")]
    Syntax {
        message: String,
        line: usize,
        col: usize,
    },

    #[error("unknown variable '{name}'")]
    UnknownVariable { name: String },

    #[error("unknown path '{path}'")]
    UnknownPath { path: String },

    #[error("Disallowed construct at line {line}, column {col}: {construct}")]
    Disallowed {
        construct: String,
        line: usize,
        col: usize,
    },

    #[error("Evaluation error: {0}")]
    Evaluation(String),
}

impl ExprError {
    pub(crate) fn syntax(message: impl Into<String>, pos: Pos) -> Self {
        ExprError::Syntax {
            message: message.into(),
            line: pos.line,
            col: pos.col,
        }
    }

    pub(crate) fn disallowed(construct: impl Into<String>, pos: Pos) -> Self {
        ExprError::Disallowed {
            construct: construct.into(),
            line: pos.line,
            col: pos.col,
        }
    }

    /// Errors raised while resolving names rather than while parsing or computing.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            ExprError::UnknownVariable { .. } | ExprError::UnknownPath { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Name resolution
// ---------------------------------------------------------------------------

/// Read-only name/path resolution used by both evaluators.
pub trait Lookup {
    fn lookup(&self, path: &str) -> Result<Value, ExprError>;
}

impl Lookup for VarMap {
    fn lookup(&self, path: &str) -> Result<Value, ExprError> {
        self.get(path)
            .cloned()
            .ok_or_else(|| ExprError::UnknownVariable {
                name: path.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Compile cache
// ---------------------------------------------------------------------------

/// Source-text keyed cache of compiled ASTs.
///
/// Lookups and insertions take the lock briefly; compilation itself runs
/// outside it. Failed compilations are not cached.
pub struct ExprCache<T> {
    entries: Mutex<HashMap<String, Arc<T>>>,
}

impl<T> Default for ExprCache<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> ExprCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compile(
        &self,
        src: &str,
        compile: impl FnOnce(&str) -> Result<T, ExprError>,
    ) -> Result<Arc<T>, ExprError> {
        let key = src.trim();
        if let Some(hit) = self.lock().get(key) {
            return Ok(Arc::clone(hit));
        }
        let compiled = Arc::new(compile(key)?);
        let mut entries = self.lock();
        Ok(Arc::clone(entries.entry(key.to_string()).or_insert(compiled)))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<T>>> {
        // A panic mid-insert cannot leave the map inconsistent.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn condition_cache() -> &'static ExprCache<Condition> {
    static CACHE: OnceLock<ExprCache<Condition>> = OnceLock::new();
    CACHE.get_or_init(ExprCache::new)
}

fn script_cache() -> &'static ExprCache<Script> {
    static CACHE: OnceLock<ExprCache<Script>> = OnceLock::new();
    CACHE.get_or_init(ExprCache::new)
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Compile condition text. Blank text is the constant `TRUE`.
pub fn compile(src: &str) -> Result<Arc<Condition>, ExprError> {
    condition_cache().get_or_compile(src, condition::parse)
}

/// Compile and validate wide-dialect text.
pub fn compile_script(src: &str) -> Result<Arc<Script>, ExprError> {
    script_cache().get_or_compile(src, |text| {
        let parsed = script::parse(text)?;
        sandbox::validate(&parsed)?;
        Ok(parsed)
    })
}

/// Evaluate a compiled condition against a scope.
pub fn evaluate(cond: &Condition, scope: &dyn Lookup) -> Result<Value, ExprError> {
    cond.eval(scope)
}

/// Evaluate a single wide-dialect expression.
pub fn eval_value(src: &str, scope: &dyn Lookup) -> Result<Value, ExprError> {
    let compiled = compile_script(src)?;
    eval_compiled(&compiled, scope)
}

/// Evaluate an already compiled single-expression script.
pub fn eval_compiled(compiled: &Script, scope: &dyn Lookup) -> Result<Value, ExprError> {
    match compiled.as_expression() {
        Some(expr) => interp::eval(expr, scope),
        None => Err(ExprError::syntax(
            "expected a single expression, found statements",
            Pos { line: 1, col: 1 },
        )),
    }
}

/// Evaluate to a number. Booleans count as 0/1.
pub fn eval_num(src: &str, scope: &dyn Lookup) -> Result<f64, ExprError> {
    let value = eval_value(src, scope)?;
    value.as_f64().ok_or_else(|| {
        ExprError::Evaluation(format!(
            "expected a number, got '{}' ({value})",
            value.type_name()
        ))
    })
}

/// Evaluate to a boolean. String results are read as yes/no words.
pub fn eval_bool(src: &str, scope: &dyn Lookup) -> Result<bool, ExprError> {
    match eval_value(src, scope)? {
        Value::Str(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" | "y" => Ok(true),
            "false" | "f" | "0" | "no" | "n" | "" => Ok(false),
            _ => Err(ExprError::Evaluation(format!(
                "cannot interpret '{s}' as a boolean"
            ))),
        },
        other => Ok(other.truthy()),
    }
}

/// Compile and run statements against a mutable variable namespace.
pub fn exec(src: &str, vars: &mut VarMap, base: &dyn Lookup) -> Result<ExecOutcome, ExprError> {
    let compiled = compile_script(src)?;
    interp::exec(&compiled, vars, base)
}
