//! Violation accumulation with per-rule caps.

use sage_schema::Severity;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Default cap on individual violations kept per (catalog, field, rule).
pub const MAX_ERRORS_PER_RULE: usize = 10;

/// One failed coercion or rule. Never thrown; collected into the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    #[serde(serialize_with = "serialize_severity")]
    pub severity: Severity,
    pub catalog: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub rule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub message: String,
}

fn serialize_severity<S: serde::Serializer>(sev: &Severity, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(sev.as_str())
}

impl Violation {
    pub fn new(
        severity: Severity,
        catalog: impl Into<String>,
        rule: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            catalog: catalog.into(),
            field: None,
            rule: rule.into(),
            line: None,
            value: None,
            message: message.into(),
        }
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn line(mut self, line: u64) -> Self {
        self.line = Some(line);
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.catalog)?;
        if let Some(field) = &self.field {
            write!(f, ".{}", field)?;
        }
        if let Some(line) = self.line {
            write!(f, " line {}", line)?;
        }
        write!(f, " ({}): {}", self.rule, self.message)
    }
}

/// Outcome of validating one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    /// Every error-severity failure, including suppressed ones.
    pub errors: usize,
    /// Every warning-severity failure, including suppressed ones.
    pub warnings: usize,
    /// Informational `message` results; counted in neither total.
    pub messages: usize,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_success(&self) -> bool {
        self.errors == 0
    }
}

type GroupKey = (String, Option<String>, String);

/// Per-invocation accumulator. Lives only for one validate call.
#[derive(Debug)]
pub struct Ledger {
    max_per_rule: usize,
    seen: HashMap<GroupKey, usize>,
    /// Group keys in first-seen order, so notices come out deterministically.
    order: Vec<GroupKey>,
    report: ValidationReport,
}

impl Ledger {
    pub fn new(max_per_rule: usize) -> Self {
        Self {
            max_per_rule,
            seen: HashMap::new(),
            order: Vec::new(),
            report: ValidationReport::default(),
        }
    }

    pub fn record(&mut self, violation: Violation) {
        match violation.severity {
            Severity::Error => self.report.errors += 1,
            Severity::Warning => self.report.warnings += 1,
            Severity::Message => self.report.messages += 1,
        }

        let key = (
            violation.catalog.clone(),
            violation.field.clone(),
            violation.rule.clone(),
        );
        let count = self.seen.entry(key.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.order.push(key);
        }
        if *count <= self.max_per_rule {
            self.report.violations.push(violation);
        }
    }

    pub fn errors(&self) -> usize {
        self.report.errors
    }

    /// Close the ledger, appending one notice per capped group.
    pub fn finish(mut self) -> ValidationReport {
        for key in &self.order {
            let total = self.seen.get(key).copied().unwrap_or(0);
            if total <= self.max_per_rule {
                continue;
            }
            let (catalog, field, rule) = key.clone();
            let suppressed = total - self.max_per_rule;
            self.report.violations.push(Violation {
                severity: Severity::Warning,
                catalog,
                field,
                rule,
                line: None,
                value: None,
                message: format!(
                    "{} violations, {} more suppressed (reporting truncated)",
                    total, suppressed
                ),
            });
        }
        self.report
    }
}
