//! Evaluation scopes binding rule identifiers to coerced data.

use sage_schema::{AggregateFn, EvalError, Scope, Value};
use std::cmp::Ordering;
use std::collections::HashSet;

/// A catalog's rows after type coercion.
///
/// Columns follow the declared field order. A field whose column is absent
/// from the file, or whose cell failed coercion, holds null.
#[derive(Debug, Clone, Default)]
pub struct CoercedTable {
    pub catalog: String,
    pub columns: Vec<String>,
    pub rows: Vec<CoercedRow>,
}

#[derive(Debug, Clone)]
pub struct CoercedRow {
    pub line: u64,
    pub values: Vec<Value>,
    /// Columns whose cell failed coercion on this row.
    pub type_errors: Vec<usize>,
}

impl CoercedTable {
    pub fn new(catalog: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            catalog: catalog.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Column index by exact name, then case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name).or_else(|| {
            self.columns
                .iter()
                .position(|c| c.eq_ignore_ascii_case(name))
        })
    }

    fn column_values(&self, name: &str) -> Result<impl Iterator<Item = &Value>, EvalError> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| EvalError::UnknownVariable(name.to_string()))?;
        Ok(self.rows.iter().map(move |r| &r.values[idx]))
    }

    fn aggregate(&self, func: AggregateFn, target: Option<&str>) -> Result<Value, EvalError> {
        match target {
            None if func == AggregateFn::Count => Ok(Value::Integer(self.rows.len() as i64)),
            None => Err(EvalError::Type(format!(
                "{}() needs a column argument",
                func.as_str()
            ))),
            Some(column) => aggregate_values(func, self.column_values(column)?),
        }
    }
}

/// Fold a column with an aggregate function. Nulls are ignored.
pub fn aggregate_values<'a>(
    func: AggregateFn,
    values: impl Iterator<Item = &'a Value>,
) -> Result<Value, EvalError> {
    let values: Vec<&Value> = values.filter(|v| !v.is_null()).collect();

    match func {
        AggregateFn::Count => Ok(Value::Integer(values.len() as i64)),
        AggregateFn::CountDistinct => {
            let distinct: HashSet<String> = values.iter().map(|v| v.distinct_key()).collect();
            Ok(Value::Integer(distinct.len() as i64))
        }
        AggregateFn::Sum | AggregateFn::Avg => {
            let mut int_sum: Option<i64> = Some(0);
            let mut float_sum = 0.0;
            for v in &values {
                let Some(f) = v.as_f64() else {
                    return Err(EvalError::Type(format!(
                        "{}() over {} values",
                        func.as_str(),
                        v.type_name()
                    )));
                };
                float_sum += f;
                int_sum = match (int_sum, v) {
                    (Some(acc), Value::Integer(i)) => acc.checked_add(*i),
                    _ => None,
                };
            }
            if func == AggregateFn::Avg {
                return Ok(if values.is_empty() {
                    Value::Null
                } else {
                    Value::Decimal(float_sum / values.len() as f64)
                });
            }
            Ok(match int_sum {
                Some(i) => Value::Integer(i),
                None => Value::Decimal(float_sum),
            })
        }
        AggregateFn::Min | AggregateFn::Max => {
            let wanted = if func == AggregateFn::Min {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let mut best: Option<&Value> = None;
            for v in values {
                best = match best {
                    None => Some(v),
                    Some(b) => match v.compare(b) {
                        Some(ord) if ord == wanted => Some(v),
                        Some(_) => Some(b),
                        None => {
                            return Err(EvalError::Type(format!(
                                "{}() over mixed {} and {} values",
                                func.as_str(),
                                b.type_name(),
                                v.type_name()
                            )))
                        }
                    },
                };
            }
            Ok(best.cloned().unwrap_or(Value::Null))
        }
    }
}

/// Row rules: identifiers are the row's columns.
pub struct RowScope<'a> {
    pub table: &'a CoercedTable,
    pub row: &'a CoercedRow,
}

impl Scope for RowScope<'_> {
    fn variable(&self, name: &str) -> Result<Value, EvalError> {
        self.table
            .column_index(name)
            .map(|idx| self.row.values[idx].clone())
            .ok_or_else(|| EvalError::UnknownVariable(name.to_string()))
    }
}

/// Field rules: `value` is the cell, other identifiers fall back to the row.
pub struct FieldScope<'a> {
    pub value: &'a Value,
    pub row: RowScope<'a>,
}

impl Scope for FieldScope<'_> {
    fn variable(&self, name: &str) -> Result<Value, EvalError> {
        if name == "value" {
            return Ok(self.value.clone());
        }
        self.row.variable(name)
    }
}

/// Catalog rules: aggregates over one table.
pub struct CatalogScope<'a> {
    pub table: &'a CoercedTable,
}

impl Scope for CatalogScope<'_> {
    fn variable(&self, name: &str) -> Result<Value, EvalError> {
        Err(EvalError::UnknownVariable(format!(
            "{} (catalog rules only see aggregates)",
            name
        )))
    }

    fn aggregate(&self, func: AggregateFn, target: Option<&str>) -> Result<Value, EvalError> {
        self.table.aggregate(func, target)
    }
}

/// Package rules: aggregates over `catalog.field`, `count(catalog)` for rows.
pub struct PackageScope<'a> {
    /// `(catalog key, table)` in package order.
    pub tables: Vec<(&'a str, &'a CoercedTable)>,
}

impl PackageScope<'_> {
    fn table(&self, key: &str) -> Option<&CoercedTable> {
        self.tables
            .iter()
            .find(|(k, t)| *k == key || t.catalog == key)
            .map(|(_, t)| *t)
    }
}

impl Scope for PackageScope<'_> {
    fn variable(&self, name: &str) -> Result<Value, EvalError> {
        Err(EvalError::UnknownVariable(format!(
            "{} (package rules only see aggregates)",
            name
        )))
    }

    fn aggregate(&self, func: AggregateFn, target: Option<&str>) -> Result<Value, EvalError> {
        let Some(target) = target else {
            if func == AggregateFn::Count {
                let total: usize = self.tables.iter().map(|(_, t)| t.rows.len()).sum();
                return Ok(Value::Integer(total as i64));
            }
            return Err(EvalError::Type(format!(
                "{}() needs a catalog.field argument",
                func.as_str()
            )));
        };

        match target.split_once('.') {
            Some((catalog, column)) => {
                let table = self
                    .table(catalog)
                    .ok_or_else(|| EvalError::UnknownVariable(catalog.to_string()))?;
                table.aggregate(func, Some(column))
            }
            None if func == AggregateFn::Count => self
                .table(target)
                .map(|t| Value::Integer(t.rows.len() as i64))
                .ok_or_else(|| EvalError::UnknownVariable(target.to_string())),
            None => Err(EvalError::Type(format!(
                "{}({}) must name a catalog.field",
                func.as_str(),
                target
            ))),
        }
    }
}
