//! Tree-walking evaluator.
//!
//! Null handling follows SQL: ordering comparisons and arithmetic with null
//! yield null, `and`/`or` use three-valued logic, `==` treats two nulls as
//! equal.

use super::{BinaryOp, EvalError, Expr, Pattern, ScalarFn, Scope, UnaryOp, Value};
use chrono::Duration;
use regex::Regex;
use std::cmp::Ordering;

pub(crate) fn evaluate(expr: &Expr, scope: &dyn Scope) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Variable(name) => scope.variable(name),
        Expr::Unary { op, expr } => unary(*op, evaluate(expr, scope)?),
        Expr::Binary { op, left, right } => match op {
            BinaryOp::And => logical_and(left, right, scope),
            BinaryOp::Or => logical_or(left, right, scope),
            _ => binary(*op, evaluate(left, scope)?, evaluate(right, scope)?),
        },
        Expr::IsNull { expr, negated } => {
            let is_null = evaluate(expr, scope)?.is_null();
            Ok(Value::Bool(is_null != *negated))
        }
        Expr::Call { func, args } => call(*func, args, scope),
        Expr::Matches { subject, pattern } => {
            let subject = evaluate(subject, scope)?;
            if subject.is_null() {
                return Ok(Value::Null);
            }
            let text = subject.to_string();
            match pattern {
                Pattern::Compiled(re) => Ok(Value::Bool(re.is_match(&text))),
                Pattern::Dynamic(p) => match evaluate(p, scope)? {
                    Value::Null => Ok(Value::Null),
                    Value::Text(p) => {
                        let re = Regex::new(&p).map_err(|e| EvalError::Regex(e.to_string()))?;
                        Ok(Value::Bool(re.is_match(&text)))
                    }
                    other => Err(EvalError::Type(format!(
                        "matches() pattern must be text, got {}",
                        other.type_name()
                    ))),
                },
            }
        }
        Expr::Aggregate { func, target } => scope.aggregate(*func, target.as_deref()),
    }
}

fn as_bool(value: &Value, context: &str) -> Result<Option<bool>, EvalError> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        other => Err(EvalError::Type(format!(
            "'{}' expects a boolean, got {}",
            context,
            other.type_name()
        ))),
    }
}

fn logical_and(left: &Expr, right: &Expr, scope: &dyn Scope) -> Result<Value, EvalError> {
    let l = as_bool(&evaluate(left, scope)?, "and")?;
    if l == Some(false) {
        return Ok(Value::Bool(false));
    }
    let r = as_bool(&evaluate(right, scope)?, "and")?;
    Ok(match (l, r) {
        (_, Some(false)) => Value::Bool(false),
        (Some(true), Some(true)) => Value::Bool(true),
        _ => Value::Null,
    })
}

fn logical_or(left: &Expr, right: &Expr, scope: &dyn Scope) -> Result<Value, EvalError> {
    let l = as_bool(&evaluate(left, scope)?, "or")?;
    if l == Some(true) {
        return Ok(Value::Bool(true));
    }
    let r = as_bool(&evaluate(right, scope)?, "or")?;
    Ok(match (l, r) {
        (_, Some(true)) => Value::Bool(true),
        (Some(false), Some(false)) => Value::Bool(false),
        _ => Value::Null,
    })
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, EvalError> {
    match (op, value) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, Value::Integer(i)) => Ok(i
            .checked_neg()
            .map(Value::Integer)
            .unwrap_or(Value::Decimal(-(i as f64)))),
        (UnaryOp::Neg, Value::Decimal(d)) => Ok(Value::Decimal(-d)),
        (UnaryOp::Not, other) => Err(EvalError::Type(format!(
            "'not' expects a boolean, got {}",
            other.type_name()
        ))),
        (UnaryOp::Neg, other) => Err(EvalError::Type(format!(
            "cannot negate {}",
            other.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Eq | BinaryOp::Ne => {
            let equal = match (&left, &right) {
                (Value::Null, Value::Null) => true,
                (Value::Null, _) | (_, Value::Null) => false,
                _ => left.compare(&right) == Some(Ordering::Equal),
            };
            Ok(Value::Bool(if op == BinaryOp::Eq { equal } else { !equal }))
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Null);
            }
            let ord = left.compare(&right).ok_or_else(|| {
                EvalError::Type(format!(
                    "cannot compare {} with {}",
                    left.type_name(),
                    right.type_name()
                ))
            })?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        _ => arithmetic(op, left, right),
    }
}

fn arithmetic(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    match (op, &left, &right) {
        (BinaryOp::Add, Value::Text(a), Value::Text(b)) => {
            return Ok(Value::Text(format!("{}{}", a, b)))
        }
        (BinaryOp::Add, Value::Date(d), Value::Integer(n))
        | (BinaryOp::Add, Value::Integer(n), Value::Date(d)) => return shift_date(*d, *n),
        (BinaryOp::Sub, Value::Date(d), Value::Integer(n)) => {
            return shift_date(*d, n.checked_neg().unwrap_or(i64::MAX))
        }
        (BinaryOp::Sub, Value::Date(a), Value::Date(b)) => {
            return Ok(Value::Integer((*a - *b).num_days()))
        }
        _ => {}
    }

    if let (Value::Integer(a), Value::Integer(b)) = (&left, &right) {
        let (a, b) = (*a, *b);
        let exact = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Rem => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                a.checked_rem(b)
            }
            _ => None,
        };
        if let Some(v) = exact {
            return Ok(Value::Integer(v));
        }
    }

    let (a, b) = match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(EvalError::Type(format!(
                "cannot apply arithmetic to {} and {}",
                left.type_name(),
                right.type_name()
            )))
        }
    };

    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => return Err(EvalError::DivisionByZero),
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        other => {
            return Err(EvalError::Type(format!(
                "operator {:?} is not arithmetic",
                other
            )))
        }
    };
    Ok(Value::Decimal(result))
}

fn shift_date(date: chrono::NaiveDate, days: i64) -> Result<Value, EvalError> {
    Duration::try_days(days)
        .and_then(|d| date.checked_add_signed(d))
        .map(Value::Date)
        .ok_or_else(|| EvalError::Type(format!("date {} shifted by {} days is out of range", date, days)))
}

fn call(func: ScalarFn, args: &[Expr], scope: &dyn Scope) -> Result<Value, EvalError> {
    if func == ScalarFn::Coalesce {
        for arg in args {
            let v = evaluate(arg, scope)?;
            if !v.is_null() {
                return Ok(v);
            }
        }
        return Ok(Value::Null);
    }

    let values = args
        .iter()
        .map(|a| evaluate(a, scope))
        .collect::<Result<Vec<_>, _>>()?;
    let first = values.first().cloned().unwrap_or(Value::Null);

    if func == ScalarFn::IsNull {
        return Ok(Value::Bool(first.is_null()));
    }
    if first.is_null() {
        return Ok(Value::Null);
    }

    match func {
        ScalarFn::Len => Ok(Value::Integer(first.to_string().chars().count() as i64)),
        ScalarFn::Lower | ScalarFn::Upper | ScalarFn::Trim => {
            let Value::Text(s) = first else {
                return Err(EvalError::Type(format!(
                    "{}() expects text, got {}",
                    func.as_str(),
                    first.type_name()
                )));
            };
            Ok(Value::Text(match func {
                ScalarFn::Lower => s.to_lowercase(),
                ScalarFn::Upper => s.to_uppercase(),
                _ => s.trim().to_string(),
            }))
        }
        ScalarFn::Abs => match first {
            Value::Integer(i) => Ok(i
                .checked_abs()
                .map(Value::Integer)
                .unwrap_or(Value::Decimal((i as f64).abs()))),
            Value::Decimal(d) => Ok(Value::Decimal(d.abs())),
            other => Err(EvalError::Type(format!(
                "abs() expects a number, got {}",
                other.type_name()
            ))),
        },
        ScalarFn::Round => {
            let digits = match values.get(1) {
                None => 0,
                Some(Value::Integer(n)) => *n,
                Some(other) => {
                    return Err(EvalError::Type(format!(
                        "round() digits must be an integer, got {}",
                        other.type_name()
                    )))
                }
            };
            match first {
                Value::Integer(i) => Ok(Value::Integer(i)),
                Value::Decimal(d) => {
                    let factor = 10f64.powi(digits.clamp(-15, 15) as i32);
                    Ok(Value::Decimal((d * factor).round() / factor))
                }
                other => Err(EvalError::Type(format!(
                    "round() expects a number, got {}",
                    other.type_name()
                ))),
            }
        }
        ScalarFn::Coalesce | ScalarFn::IsNull => Ok(first),
    }
}
