//! Rule expression language
//!
//! The `rule` string of a validation rule is a small boolean/arithmetic
//! expression over named columns. It is parsed once when the configuration
//! is compiled and evaluated per row (field and row rules) or once per
//! catalog/package (aggregate rules). Nothing outside the grammar can run.
//!
//! ```text
//! value > 0 and value <= 100
//! fecha_fin >= fecha_inicio or fecha_fin is null
//! matches(rut, '^[0-9]+-[0-9kK]$')
//! count() > 0 and sum(monto) == sum(ventas.monto)
//! ```

mod eval;
mod lexer;
mod parser;
mod value;

pub use value::Value;

use regex::Regex;
use std::fmt;
use thiserror::Error;

/// Compile-time problems with a rule expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("empty expression")]
    Empty,

    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("invalid number '{text}' at position {pos}")]
    InvalidNumber { text: String, pos: usize },

    #[error("unterminated string starting at position {0}")]
    UnterminatedString(usize),

    #[error("unterminated `identifier` starting at position {0}")]
    UnterminatedIdentifier(usize),

    #[error("unexpected {found} at position {pos}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: String,
        pos: usize,
    },

    #[error("unexpected end of expression, expected {0}")]
    UnexpectedEnd(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{name}' expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: &'static str,
        got: usize,
    },

    #[error("aggregate '{0}' takes a column name, not an expression")]
    AggregateTarget(String),

    #[error("invalid regex '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },
}

/// Problems evaluating a parsed expression against data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("aggregate '{0}' is not available in this context")]
    AggregateUnavailable(String),

    #[error("invalid regex: {0}")]
    Regex(String),
}

/// Aggregate functions. Their meaning is supplied by the [`Scope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFn {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    CountDistinct,
}

impl AggregateFn {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFn::Count => "count",
            AggregateFn::Sum => "sum",
            AggregateFn::Avg => "avg",
            AggregateFn::Min => "min",
            AggregateFn::Max => "max",
            AggregateFn::CountDistinct => "count_distinct",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "count" => Some(AggregateFn::Count),
            "sum" => Some(AggregateFn::Sum),
            "avg" => Some(AggregateFn::Avg),
            "min" => Some(AggregateFn::Min),
            "max" => Some(AggregateFn::Max),
            "count_distinct" => Some(AggregateFn::CountDistinct),
            _ => None,
        }
    }
}

/// Where identifiers and aggregates get their values.
pub trait Scope {
    /// Value of a (possibly dotted) name such as `monto` or `ventas.monto`.
    fn variable(&self, name: &str) -> Result<Value, EvalError>;

    /// Aggregate over a column, or over rows when `target` is `None`.
    fn aggregate(&self, func: AggregateFn, target: Option<&str>) -> Result<Value, EvalError> {
        let _ = target;
        Err(EvalError::AggregateUnavailable(func.as_str().to_string()))
    }
}

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScalarFn {
    Len,
    Lower,
    Upper,
    Trim,
    Abs,
    Round,
    Coalesce,
    IsNull,
}

impl ScalarFn {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "len" | "length" => Some(ScalarFn::Len),
            "lower" => Some(ScalarFn::Lower),
            "upper" => Some(ScalarFn::Upper),
            "trim" => Some(ScalarFn::Trim),
            "abs" => Some(ScalarFn::Abs),
            "round" => Some(ScalarFn::Round),
            "coalesce" => Some(ScalarFn::Coalesce),
            "is_null" | "isnull" => Some(ScalarFn::IsNull),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ScalarFn::Len => "len",
            ScalarFn::Lower => "lower",
            ScalarFn::Upper => "upper",
            ScalarFn::Trim => "trim",
            ScalarFn::Abs => "abs",
            ScalarFn::Round => "round",
            ScalarFn::Coalesce => "coalesce",
            ScalarFn::IsNull => "is_null",
        }
    }

    /// Accepted argument counts, inclusive.
    fn arity(&self) -> (usize, usize, &'static str) {
        match self {
            ScalarFn::Round => (1, 2, "1 or 2"),
            ScalarFn::Coalesce => (1, usize::MAX, "at least 1"),
            _ => (1, 1, "1"),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Pattern {
    Compiled(Regex),
    Dynamic(Box<Expr>),
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Value),
    Variable(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Call {
        func: ScalarFn,
        args: Vec<Expr>,
    },
    Matches {
        subject: Box<Expr>,
        pattern: Pattern,
    },
    Aggregate {
        func: AggregateFn,
        target: Option<String>,
    },
}

// ============================================================================
// Expression
// ============================================================================

/// A parsed rule expression. Equality is by source text.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let root = parser::parse(source)?;
        Ok(Self {
            source: source.trim().to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, scope: &dyn Scope) -> Result<Value, EvalError> {
        eval::evaluate(&self.root, scope)
    }

    /// Evaluate as a predicate: `true` passes, `false` or null fails.
    pub fn check(&self, scope: &dyn Scope) -> Result<bool, EvalError> {
        match self.evaluate(scope)? {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(EvalError::Type(format!(
                "rule must evaluate to a boolean, got {}",
                other.type_name()
            ))),
        }
    }

    /// Whether any aggregate function appears in the expression.
    pub fn uses_aggregates(&self) -> bool {
        fn walk(expr: &Expr) -> bool {
            match expr {
                Expr::Aggregate { .. } => true,
                Expr::Literal(_) | Expr::Variable(_) => false,
                Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } => walk(expr),
                Expr::Binary { left, right, .. } => walk(left) || walk(right),
                Expr::Call { args, .. } => args.iter().any(walk),
                Expr::Matches { subject, pattern } => {
                    walk(subject)
                        || match pattern {
                            Pattern::Compiled(_) => false,
                            Pattern::Dynamic(p) => walk(p),
                        }
                }
            }
        }
        walk(&self.root)
    }

    /// Row-level identifiers read by the expression, in order of appearance.
    /// Aggregate targets are not included.
    pub fn variables(&self) -> Vec<&str> {
        fn walk<'e>(expr: &'e Expr, out: &mut Vec<&'e str>) {
            match expr {
                Expr::Variable(name) => {
                    if !out.contains(&name.as_str()) {
                        out.push(name);
                    }
                }
                Expr::Literal(_) | Expr::Aggregate { .. } => {}
                Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } => walk(expr, out),
                Expr::Binary { left, right, .. } => {
                    walk(left, out);
                    walk(right, out);
                }
                Expr::Call { args, .. } => args.iter().for_each(|a| walk(a, out)),
                Expr::Matches { subject, pattern } => {
                    walk(subject, out);
                    if let Pattern::Dynamic(p) = pattern {
                        walk(p, out);
                    }
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &mut out);
        out
    }
}

impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapScope(HashMap<&'static str, Value>);

    impl Scope for MapScope {
        fn variable(&self, name: &str) -> Result<Value, EvalError> {
            self.0
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::UnknownVariable(name.to_string()))
        }
    }

    fn scope(pairs: &[(&'static str, Value)]) -> MapScope {
        MapScope(pairs.iter().cloned().collect())
    }

    #[test]
    fn test_check_requires_boolean() {
        let s = scope(&[("x", Value::Integer(3))]);
        assert!(Expression::parse("x > 2").unwrap().check(&s).unwrap());
        assert!(!Expression::parse("x > 5").unwrap().check(&s).unwrap());
        assert!(matches!(
            Expression::parse("x + 1").unwrap().check(&s),
            Err(EvalError::Type(_))
        ));
    }

    #[test]
    fn test_null_result_fails_check() {
        let s = scope(&[("x", Value::Null)]);
        assert!(!Expression::parse("x > 2").unwrap().check(&s).unwrap());
        assert!(Expression::parse("x is null").unwrap().check(&s).unwrap());
    }

    #[test]
    fn test_aggregates_need_scope_support() {
        let s = scope(&[]);
        let expr = Expression::parse("count() > 0").unwrap();
        assert!(expr.uses_aggregates());
        assert_eq!(
            expr.check(&s).unwrap_err(),
            EvalError::AggregateUnavailable("count".into())
        );
    }

    #[test]
    fn test_equality_is_by_source() {
        let a = Expression::parse("  x > 1 ").unwrap();
        let b = Expression::parse("x > 1").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.source(), "x > 1");
    }

    #[test]
    fn test_variables_lists_row_identifiers_once() {
        let e = Expression::parse("monto > 0 and (monto < tope or matches(rut, '^1')) and sum(monto) > 0")
            .unwrap();
        assert_eq!(e.variables(), vec!["monto", "tope", "rut"]);
        assert!(Expression::parse("count() > 1").unwrap().variables().is_empty());
    }
}
