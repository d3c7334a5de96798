//! Catalog and package validation.
//!
//! ```text
//! detect type ─▶ read cells ─▶ map columns ─▶ coerce ─▶ field rules
//!                                                      ─▶ row rules
//!                                                      ─▶ catalog rules
//!                                                      ─▶ package rules
//! ```
//!
//! Fatal problems (missing file, wrong type, unreadable archive) return a
//! [`FileProcessingError`]. Everything else becomes a [`Violation`].

use crate::coerce::coerce;
use crate::error::{FileProcessingError, Result};
use crate::filetype::detect_file_type;
use crate::ledger::{Ledger, ValidationReport, Violation, MAX_ERRORS_PER_RULE};
use crate::scope::{CatalogScope, CoercedRow, CoercedTable, FieldScope, PackageScope, RowScope};
use crate::table::{read_csv, read_excel, RawTable};
use sage_schema::{Catalog, FileType, SageConfig, Scope, Severity, ValidationRule, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Rule names used for violations the validator raises itself.
pub mod builtin {
    pub const TYPE: &str = "type";
    pub const REQUIRED: &str = "required";
    pub const UNIQUE: &str = "unique";
    pub const COLUMN_PRESENT: &str = "column_present";
    pub const FILE_PRESENT: &str = "file_present";
}

#[derive(Debug, Clone)]
pub struct ValidatorOptions {
    /// Individual violations kept per (catalog, field, rule).
    pub max_errors_per_rule: usize,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            max_errors_per_rule: MAX_ERRORS_PER_RULE,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContentValidator {
    options: ValidatorOptions,
}

/// Validate one file against a catalog with default options.
pub fn validate_catalog(path: &Path, catalog: &Catalog) -> Result<ValidationReport> {
    ContentValidator::default().validate_catalog(path, catalog)
}

/// Validate one delivery against a package with default options.
pub fn validate_package(path: &Path, config: &SageConfig, package: &str) -> Result<ValidationReport> {
    ContentValidator::default().validate_package(path, config, package)
}

impl ContentValidator {
    pub fn new(options: ValidatorOptions) -> Self {
        Self { options }
    }

    pub fn validate_catalog(&self, path: &Path, catalog: &Catalog) -> Result<ValidationReport> {
        let mut ledger = Ledger::new(self.options.max_errors_per_rule);
        self.check_catalog(path, catalog, &mut ledger)?;
        let report = ledger.finish();
        info!(
            file = %path.display(),
            catalog = %catalog.name,
            errors = report.errors,
            warnings = report.warnings,
            "catalog validated"
        );
        Ok(report)
    }

    /// Validate a delivery for `package` (key or display name).
    ///
    /// A ZIP package is unpacked and each catalog's file looked up by name.
    /// Otherwise the file itself is the package's single catalog.
    pub fn validate_package(
        &self,
        path: &Path,
        config: &SageConfig,
        package: &str,
    ) -> Result<ValidationReport> {
        let package = config
            .package(package)
            .ok_or_else(|| FileProcessingError::UnknownPackage(package.to_string()))?;
        let mut ledger = Ledger::new(self.options.max_errors_per_rule);
        let mut tables: Vec<(&str, CoercedTable)> = Vec::new();

        if package.file_format.file_type == FileType::Zip {
            let detected = detect_file_type(path)?;
            if detected != FileType::Zip {
                return Err(FileProcessingError::TypeMismatch {
                    path: path.to_path_buf(),
                    declared: FileType::Zip,
                    detected,
                });
            }
            let workdir = tempfile::tempdir().map_err(|e| FileProcessingError::io(path, e))?;
            extract_archive(path, workdir.path())?;

            for (key, catalog) in config.package_catalogs(package) {
                match find_member(workdir.path(), &catalog.filename) {
                    Some(member) => {
                        debug!(catalog = key, member = %member.display(), "validating archive member");
                        let table = self.check_catalog(&member, catalog, &mut ledger)?;
                        tables.push((key, table));
                    }
                    None => ledger.record(Violation::new(
                        Severity::Error,
                        &catalog.name,
                        builtin::FILE_PRESENT,
                        format!("'{}' not found in archive", catalog.filename),
                    )),
                }
            }
        } else {
            for (key, catalog) in config.package_catalogs(package) {
                let table = self.check_catalog(path, catalog, &mut ledger)?;
                tables.push((key, table));
            }
        }

        let scope = PackageScope {
            tables: tables.iter().map(|(k, t)| (*k, t)).collect(),
        };
        for rule in &package.package_validation {
            apply_rule(&mut ledger, RuleSite::new(&package.name), rule, &scope);
        }

        let report = ledger.finish();
        info!(
            file = %path.display(),
            package = %package.name,
            errors = report.errors,
            warnings = report.warnings,
            "package validated"
        );
        Ok(report)
    }

    fn check_catalog(
        &self,
        path: &Path,
        catalog: &Catalog,
        ledger: &mut Ledger,
    ) -> Result<CoercedTable> {
        let declared = catalog.file_format.file_type;
        let detected = detect_file_type(path)?;
        if detected != declared {
            return Err(FileProcessingError::TypeMismatch {
                path: path.to_path_buf(),
                declared,
                detected,
            });
        }

        let raw = match declared {
            FileType::Csv => read_csv(path, &catalog.file_format)?,
            FileType::Excel => read_excel(path, &catalog.file_format)?,
            FileType::Zip => {
                return Err(FileProcessingError::archive(
                    path,
                    "a catalog file cannot itself be an archive",
                ))
            }
        };

        let columns = resolve_columns(&raw, catalog, ledger);
        let table = coerce_rows(&raw, catalog, &columns, ledger);

        // Field rules over every row, then row rules, then catalog rules.
        for row in &table.rows {
            for (j, field) in catalog.fields.iter().enumerate() {
                if columns.fields[j].is_none() {
                    continue;
                }
                let value = &row.values[j];
                if value.is_null() {
                    continue;
                }
                let scope = FieldScope {
                    value,
                    row: RowScope { table: &table, row },
                };
                for rule in &field.validation_rules {
                    if reads_invalid_cell(&table, row, rule) {
                        continue;
                    }
                    let site = RuleSite::new(&catalog.name)
                        .field(&field.name)
                        .line(row.line)
                        .value(value);
                    apply_rule(ledger, site, rule, &scope);
                }
            }
        }

        for row in &table.rows {
            let scope = RowScope { table: &table, row };
            for rule in &catalog.row_validation {
                if reads_invalid_cell(&table, row, rule) {
                    continue;
                }
                apply_rule(ledger, RuleSite::new(&catalog.name).line(row.line), rule, &scope);
            }
        }

        let scope = CatalogScope { table: &table };
        for rule in &catalog.catalog_validation {
            apply_rule(ledger, RuleSite::new(&catalog.name), rule, &scope);
        }

        Ok(table)
    }
}

// ============================================================================
// Column mapping and coercion
// ============================================================================

struct ColumnMap {
    /// Source cell index per declared field; `None` when absent from the file.
    fields: Vec<Option<usize>>,
    /// Undeclared trailing columns of a headerless file, exposed as `column_<n>`.
    extras: Vec<usize>,
}

fn resolve_columns(raw: &RawTable, catalog: &Catalog, ledger: &mut Ledger) -> ColumnMap {
    if !catalog.file_format.header {
        let declared = catalog.fields.len();
        return ColumnMap {
            fields: (0..declared).map(Some).collect(),
            extras: (declared..raw.width()).collect(),
        };
    }

    let fields = catalog
        .fields
        .iter()
        .map(|field| {
            let wanted = field.name.trim().to_lowercase();
            let found = raw.header.iter().position(|h| h.to_lowercase() == wanted);
            if found.is_none() {
                ledger.record(
                    Violation::new(
                        Severity::Error,
                        &catalog.name,
                        builtin::COLUMN_PRESENT,
                        format!("column '{}' not found in header", field.name),
                    )
                    .field(&field.name),
                );
            }
            found
        })
        .collect();

    ColumnMap {
        fields,
        extras: Vec::new(),
    }
}

fn coerce_rows(
    raw: &RawTable,
    catalog: &Catalog,
    columns: &ColumnMap,
    ledger: &mut Ledger,
) -> CoercedTable {
    let mut names: Vec<String> = catalog.fields.iter().map(|f| f.name.clone()).collect();
    names.extend(columns.extras.iter().map(|i| format!("column_{}", i + 1)));
    let mut table = CoercedTable::new(&catalog.name, names);

    // field index -> distinct key -> first line
    let mut seen: Vec<HashMap<String, u64>> = vec![HashMap::new(); catalog.fields.len()];

    for row in &raw.rows {
        let mut values = Vec::with_capacity(table.columns.len());
        let mut type_errors = Vec::new();
        for (j, field) in catalog.fields.iter().enumerate() {
            let Some(idx) = columns.fields[j] else {
                values.push(Value::Null);
                continue;
            };
            let cell = row.cells.get(idx).map(String::as_str).unwrap_or("");
            let value = match coerce(cell, field.field_type) {
                Ok(v) => v,
                Err(reason) => {
                    ledger.record(
                        Violation::new(Severity::Error, &catalog.name, builtin::TYPE, reason)
                            .field(&field.name)
                            .line(row.line)
                            .value(cell),
                    );
                    type_errors.push(j);
                    values.push(Value::Null);
                    continue;
                }
            };

            if value.is_null() {
                if field.required {
                    ledger.record(
                        Violation::new(
                            Severity::Error,
                            &catalog.name,
                            builtin::REQUIRED,
                            format!("'{}' is required", field.name),
                        )
                        .field(&field.name)
                        .line(row.line),
                    );
                }
            } else if field.unique {
                let first = *seen[j].entry(value.distinct_key()).or_insert(row.line);
                if first != row.line {
                    ledger.record(
                        Violation::new(
                            Severity::Error,
                            &catalog.name,
                            builtin::UNIQUE,
                            format!("duplicate value (first seen on line {})", first),
                        )
                        .field(&field.name)
                        .line(row.line)
                        .value(cell),
                    );
                }
            }
            values.push(value);
        }
        for idx in &columns.extras {
            let cell = row.cells.get(*idx).map(String::as_str).unwrap_or("");
            values.push(coerce(cell, sage_schema::FieldType::Text).unwrap_or(Value::Null));
        }
        table.rows.push(CoercedRow {
            line: row.line,
            values,
            type_errors,
        });
    }

    table
}

// ============================================================================
// Rules
// ============================================================================

/// Where a rule was evaluated, for the violation it may produce.
struct RuleSite<'a> {
    catalog: &'a str,
    field: Option<&'a str>,
    line: Option<u64>,
    value: Option<&'a Value>,
}

impl<'a> RuleSite<'a> {
    fn new(catalog: &'a str) -> Self {
        Self {
            catalog,
            field: None,
            line: None,
            value: None,
        }
    }

    fn field(mut self, field: &'a str) -> Self {
        self.field = Some(field);
        self
    }

    fn line(mut self, line: u64) -> Self {
        self.line = Some(line);
        self
    }

    fn value(mut self, value: &'a Value) -> Self {
        self.value = Some(value);
        self
    }
}

/// `true` passes. `false`/null fails at the rule's severity; an evaluation
/// error is always an error.
/// Whether `rule` reads a cell of `row` that already has a type error.
/// Such a rule is skipped so one bad cell is reported once.
fn reads_invalid_cell(table: &CoercedTable, row: &CoercedRow, rule: &ValidationRule) -> bool {
    !row.type_errors.is_empty()
        && rule.rule.variables().into_iter().any(|name| {
            table
                .column_index(name)
                .is_some_and(|idx| row.type_errors.contains(&idx))
        })
}

fn apply_rule(ledger: &mut Ledger, site: RuleSite<'_>, rule: &ValidationRule, scope: &dyn Scope) {
    let (severity, message) = match rule.rule.check(scope) {
        Ok(true) => return,
        Ok(false) => {
            let message = if rule.description.is_empty() {
                format!("rule '{}' failed", rule.rule)
            } else {
                rule.description.clone()
            };
            (rule.severity, message)
        }
        Err(e) => (
            Severity::Error,
            format!("rule '{}' could not be evaluated: {}", rule.rule, e),
        ),
    };

    let mut violation = Violation::new(severity, site.catalog, &rule.name, message);
    violation.field = site.field.map(str::to_string);
    violation.line = site.line;
    violation.value = site.value.map(|v| v.to_string());
    ledger.record(violation);
}

// ============================================================================
// Archives
// ============================================================================

fn extract_archive(path: &Path, into: &Path) -> Result<()> {
    let file = std::fs::File::open(path).map_err(|e| FileProcessingError::io(path, e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| FileProcessingError::archive(path, e))?;
    archive
        .extract(into)
        .map_err(|e| FileProcessingError::archive(path, e))
}

/// Case-insensitive basename match anywhere in the extracted tree.
fn find_member(root: &Path, filename: &str) -> Option<PathBuf> {
    let wanted = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())?;
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .find(|e| e.file_name().to_string_lossy().to_lowercase() == wanted)
        .map(|e| e.into_path())
}
