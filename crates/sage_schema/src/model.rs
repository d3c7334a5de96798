//! Compiled configuration model.
//!
//! Everything here is immutable after [`crate::compile`] builds it. No I/O.

use crate::error::SchemaError;
use crate::expr::Expression;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Enums
// ============================================================================

/// Outcome class of a rule violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Severity {
    #[default]
    Error,
    Warning,
    Message,
}

impl Severity {
    /// Parse a severity in any casing. The only place severities are normalized.
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Severity::Error),
            "warning" => Ok(Severity::Warning),
            "message" => Ok(Severity::Message),
            _ => Err(SchemaError::InvalidSeverity(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Message => "message",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::parse(s)
    }
}

/// Declared semantic type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Text,
    Decimal,
    Integer,
    Date,
    Boolean,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Decimal => "decimal",
            FieldType::Integer => "integer",
            FieldType::Date => "date",
            FieldType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(FieldType::Text),
            "decimal" => Ok(FieldType::Decimal),
            "integer" => Ok(FieldType::Integer),
            "date" => Ok(FieldType::Date),
            "boolean" => Ok(FieldType::Boolean),
            _ => Err(SchemaError::InvalidFieldType(s.to_string())),
        }
    }
}

/// Physical container of a catalog or package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Csv,
    Excel,
    Zip,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Csv => "CSV",
            FileType::Excel => "EXCEL",
            FileType::Zip => "ZIP",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FileType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CSV" => Ok(FileType::Csv),
            "EXCEL" | "XLSX" | "XLS" => Ok(FileType::Excel),
            "ZIP" => Ok(FileType::Zip),
            _ => Err(SchemaError::InvalidFileType(s.to_string())),
        }
    }
}

// ============================================================================
// Structures
// ============================================================================

/// A named predicate checked against a field, row, catalog or package.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRule {
    pub name: String,
    pub description: String,
    /// Parsed once at compile time.
    pub rule: Expression,
    pub severity: Severity,
}

/// One column in a catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub unique: bool,
    pub validation_rules: Vec<ValidationRule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileFormat {
    pub file_type: FileType,
    /// Only meaningful for CSV, where it is mandatory.
    pub delimiter: Option<char>,
    pub header: bool,
}

impl FileFormat {
    pub fn csv(delimiter: char) -> Self {
        Self {
            file_type: FileType::Csv,
            delimiter: Some(delimiter),
            header: true,
        }
    }

    pub fn of_type(file_type: FileType) -> Self {
        Self {
            file_type,
            delimiter: None,
            header: true,
        }
    }

    /// Delimiter as the single byte the CSV reader expects.
    pub fn delimiter_byte(&self) -> Option<u8> {
        self.delimiter
            .filter(|c| c.is_ascii())
            .map(|c| c as u8)
    }
}

/// The schema of one physical file.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    pub name: String,
    pub description: String,
    pub filename: String,
    pub file_format: FileFormat,
    /// Declared column order.
    pub fields: Vec<Field>,
    pub row_validation: Vec<ValidationRule>,
    pub catalog_validation: Vec<ValidationRule>,
}

impl Catalog {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A deliverable bundling one or more catalogs.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub name: String,
    pub description: String,
    pub file_format: FileFormat,
    /// Keys into [`SageConfig::catalogs`], in delivery order.
    pub catalogs: Vec<String>,
    pub package_validation: Vec<ValidationRule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: String,
}

/// A fully compiled configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SageConfig {
    pub metadata: Metadata,
    pub catalogs: BTreeMap<String, Catalog>,
    pub packages: BTreeMap<String, Package>,
}

impl SageConfig {
    pub fn catalog(&self, key: &str) -> Option<&Catalog> {
        self.catalogs.get(key)
    }

    /// Look a package up by key, falling back to its display name.
    pub fn package(&self, key_or_name: &str) -> Option<&Package> {
        self.packages.get(key_or_name).or_else(|| {
            self.packages
                .values()
                .find(|p| p.name.eq_ignore_ascii_case(key_or_name))
        })
    }

    /// Catalogs of a package as `(key, catalog)` pairs, in package order.
    ///
    /// Compilation guarantees every reference resolves.
    pub fn package_catalogs<'a>(&'a self, package: &'a Package) -> Vec<(&'a str, &'a Catalog)> {
        package
            .catalogs
            .iter()
            .filter_map(|key| self.catalogs.get(key).map(|c| (key.as_str(), c)))
            .collect()
    }
}

impl fmt::Display for SageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v{} by {} ({} catalog(s), {} package(s))",
            self.metadata.name,
            self.metadata.version,
            self.metadata.author,
            self.catalogs.len(),
            self.packages.len()
        )
    }
}
