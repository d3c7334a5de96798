//! Error types for schema compilation.

use crate::expr::ExpressionError;
use std::fmt;
use thiserror::Error;

/// Schema error type
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Invalid severity: '{0}'. Expected: error, warning, or message")]
    InvalidSeverity(String),

    #[error("Invalid field type: '{0}'. Expected: text, decimal, integer, date, or boolean")]
    InvalidFieldType(String),

    #[error("Invalid file type: '{0}'. Expected: CSV, EXCEL, or ZIP")]
    InvalidFileType(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Structure(#[from] SchemaStructureError),

    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, SchemaError>;

/// One structural problem in a configuration, with where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureIssue {
    /// Dotted location, e.g. `catalogs.ventas.fields[2]` or `packages.mensual`
    pub location: String,
    pub message: String,
}

impl StructureIssue {
    pub fn new(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for StructureIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// A configuration that cannot be compiled.
///
/// Carries every issue found, not only the first one. The config author
/// fixes them all in one pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct SchemaStructureError {
    issues: Vec<StructureIssue>,
}

impl SchemaStructureError {
    pub fn new(issues: Vec<StructureIssue>) -> Self {
        Self { issues }
    }

    pub fn issues(&self) -> &[StructureIssue] {
        &self.issues
    }

    /// True when any issue location or message mentions `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.location.contains(needle) || issue.message.contains(needle))
    }
}

impl fmt::Display for SchemaStructureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "configuration has {} structural error(s)",
            self.issues.len()
        )?;
        for issue in &self.issues {
            write!(f, "\n  - {}", issue)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_error_lists_every_issue() {
        let err = SchemaStructureError::new(vec![
            StructureIssue::new("metadata", "missing required key(s): author"),
            StructureIssue::new("packages.p", "references unknown catalog 'b'"),
        ]);
        let text = err.to_string();
        assert!(text.starts_with("configuration has 2 structural error(s)"));
        assert!(text.contains("metadata: missing required key(s): author"));
        assert!(err.mentions("'b'"));
        assert!(!err.mentions("zzz"));
    }
}
