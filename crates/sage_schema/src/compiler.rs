//! Structural validation of a raw configuration.
//!
//! The compiler walks the whole [`RawConfig`] and collects every problem it
//! finds before giving up, so a config author sees all mistakes at once.

use crate::error::{Result, SchemaStructureError, StructureIssue};
use crate::expr::Expression;
use crate::model::{
    Catalog, Field, FieldType, FileFormat, FileType, Metadata, Package, SageConfig, Severity,
    ValidationRule,
};
use crate::raw::{RawCatalog, RawConfig, RawField, RawFileFormat, RawPackage, RawRule, RawRuleBlock};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Parse YAML text and compile it.
pub fn compile_str(yaml: &str) -> Result<SageConfig> {
    let raw: RawConfig = serde_yaml::from_str(yaml)?;
    Ok(compile(raw)?)
}

/// Compile a raw configuration into an immutable [`SageConfig`].
pub fn compile(raw: RawConfig) -> std::result::Result<SageConfig, SchemaStructureError> {
    let mut issues = Issues::default();

    let missing: Vec<&str> = [
        ("metadata", raw.metadata.is_none()),
        ("catalogs", raw.catalogs.is_none()),
        ("packages", raw.packages.is_none()),
    ]
    .into_iter()
    .filter_map(|(key, absent)| absent.then_some(key))
    .collect();
    if !missing.is_empty() {
        issues.missing("<root>", &missing);
    }

    let metadata = raw.metadata.and_then(|m| {
        let missing = missing_keys(&[
            ("name", m.name.is_none()),
            ("description", m.description.is_none()),
            ("version", m.version.is_none()),
            ("author", m.author.is_none()),
        ]);
        if !missing.is_empty() {
            issues.missing("metadata", &missing);
            return None;
        }
        Some(Metadata {
            name: m.name.unwrap_or_default(),
            description: m.description.unwrap_or_default(),
            version: m.version.unwrap_or_default(),
            author: m.author.unwrap_or_default(),
        })
    });

    let raw_catalogs = raw.catalogs.unwrap_or_default();
    let raw_packages = raw.packages.unwrap_or_default();
    if missing.iter().all(|k| *k != "catalogs") && raw_catalogs.is_empty() {
        issues.push("catalogs", "at least one catalog is required");
    }
    if missing.iter().all(|k| *k != "packages") && raw_packages.is_empty() {
        issues.push("packages", "at least one package is required");
    }

    let mut catalogs = BTreeMap::new();
    // Declared types of every catalog key, including ones that failed to compile.
    let mut catalog_types: BTreeMap<String, Option<FileType>> = BTreeMap::new();
    for (key, rc) in raw_catalogs {
        let declared = rc
            .file_format
            .as_ref()
            .and_then(|f| f.file_type.as_deref())
            .and_then(|t| t.parse::<FileType>().ok());
        catalog_types.insert(key.clone(), declared);
        if let Some(catalog) = compile_catalog(&key, rc, &mut issues) {
            catalogs.insert(key, catalog);
        }
    }

    let mut packages = BTreeMap::new();
    for (key, rp) in raw_packages {
        if let Some(package) = compile_package(&key, rp, &catalog_types, &mut issues) {
            packages.insert(key, package);
        }
    }

    if !issues.is_empty() {
        debug!(issues = issues.0.len(), "configuration rejected");
        return Err(issues.into_error());
    }

    match metadata {
        Some(metadata) => {
            let config = SageConfig {
                metadata,
                catalogs,
                packages,
            };
            debug!(config = %config, "configuration compiled");
            Ok(config)
        }
        None => Err(SchemaStructureError::new(vec![StructureIssue::new(
            "metadata",
            "metadata block is missing",
        )])),
    }
}

// ============================================================================
// Issue accumulation
// ============================================================================

#[derive(Default)]
struct Issues(Vec<StructureIssue>);

impl Issues {
    fn push(&mut self, location: impl Into<String>, message: impl Into<String>) {
        self.0.push(StructureIssue::new(location, message));
    }

    fn missing(&mut self, location: &str, keys: &[&str]) {
        self.push(
            location,
            format!("missing required key(s): {}", keys.join(", ")),
        );
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn into_error(self) -> SchemaStructureError {
        SchemaStructureError::new(self.0)
    }
}

fn missing_keys<'a>(checks: &[(&'a str, bool)]) -> Vec<&'a str> {
    checks
        .iter()
        .filter_map(|(key, absent)| absent.then_some(*key))
        .collect()
}

// ============================================================================
// Catalogs
// ============================================================================

fn compile_catalog(key: &str, rc: RawCatalog, issues: &mut Issues) -> Option<Catalog> {
    let loc = format!("catalogs.{}", key);
    let missing = missing_keys(&[
        ("name", rc.name.is_none()),
        ("description", rc.description.is_none()),
        ("filename", rc.filename.is_none()),
        ("file_format", rc.file_format.is_none()),
        ("fields", rc.fields.is_none()),
    ]);
    if !missing.is_empty() {
        issues.missing(&loc, &missing);
    }

    let file_format = rc
        .file_format
        .and_then(|f| compile_catalog_format(&loc, f, issues));

    let fields = rc.fields.and_then(|raw_fields| {
        if raw_fields.is_empty() {
            issues.push(format!("{}.fields", loc), "at least one field is required");
            return None;
        }
        let before = issues.0.len();
        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(raw_fields.len());
        for (i, rf) in raw_fields.into_iter().enumerate() {
            let field_loc = format!("{}.fields[{}]", loc, i);
            if let Some(name) = rf.name.as_deref() {
                if !seen.insert(name.trim().to_lowercase()) {
                    issues.push(&field_loc, format!("duplicate field name '{}'", name));
                }
            }
            if let Some(field) = compile_field(&field_loc, rf, issues) {
                fields.push(field);
            }
        }
        (issues.0.len() == before).then_some(fields)
    });

    let row_validation = compile_rule_block(&format!("{}.row_validation", loc), rc.row_validation, issues);
    let catalog_validation = compile_rule_block(
        &format!("{}.catalog_validation", loc),
        rc.catalog_validation,
        issues,
    );

    Some(Catalog {
        name: rc.name?,
        description: rc.description?,
        filename: rc.filename?,
        file_format: file_format?,
        fields: fields?,
        row_validation: row_validation?,
        catalog_validation: catalog_validation?,
    })
}

fn parse_file_type(loc: &str, format: &RawFileFormat, issues: &mut Issues) -> Option<FileType> {
    let Some(text) = format.file_type.as_deref() else {
        issues.missing(&format!("{}.file_format", loc), &["type"]);
        return None;
    };
    match text.parse::<FileType>() {
        Ok(t) => Some(t),
        Err(e) => {
            issues.push(format!("{}.file_format.type", loc), e.to_string());
            None
        }
    }
}

fn compile_catalog_format(loc: &str, format: RawFileFormat, issues: &mut Issues) -> Option<FileFormat> {
    let file_type = parse_file_type(loc, &format, issues)?;
    let header = format.header.unwrap_or(true);

    match file_type {
        FileType::Zip => {
            issues.push(
                format!("{}.file_format.type", loc),
                "a catalog cannot be ZIP; declare ZIP on the package instead",
            );
            None
        }
        FileType::Csv => {
            let delimiter = match format.delimiter.as_deref() {
                None | Some("") => {
                    issues.push(
                        format!("{}.file_format", loc),
                        "CSV file_format requires a delimiter",
                    );
                    return None;
                }
                Some(d) => d,
            };
            let mut chars = delimiter.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii() => Some(FileFormat {
                    file_type,
                    delimiter: Some(c),
                    header,
                }),
                _ => {
                    issues.push(
                        format!("{}.file_format.delimiter", loc),
                        format!("delimiter must be a single ASCII character, got '{}'", delimiter),
                    );
                    None
                }
            }
        }
        FileType::Excel => Some(FileFormat {
            file_type,
            delimiter: None,
            header,
        }),
    }
}

fn compile_field(loc: &str, rf: RawField, issues: &mut Issues) -> Option<Field> {
    let missing = missing_keys(&[("name", rf.name.is_none()), ("type", rf.field_type.is_none())]);
    if !missing.is_empty() {
        issues.missing(loc, &missing);
    }

    let field_type = rf.field_type.as_deref().and_then(|t| match t.parse::<FieldType>() {
        Ok(ft) => Some(ft),
        Err(e) => {
            issues.push(format!("{}.type", loc), e.to_string());
            None
        }
    });

    let rules = compile_rules(
        &format!("{}.validation_rules", loc),
        rf.validation_rules.unwrap_or_default(),
        issues,
    );

    Some(Field {
        name: rf.name?,
        field_type: field_type?,
        required: rf.required.unwrap_or(false),
        unique: rf.unique.unwrap_or(false),
        validation_rules: rules?,
    })
}

// ============================================================================
// Rules
// ============================================================================

fn compile_rule_block(
    loc: &str,
    block: Option<RawRuleBlock>,
    issues: &mut Issues,
) -> Option<Vec<ValidationRule>> {
    compile_rules(loc, block.map(RawRuleBlock::into_rules).unwrap_or_default(), issues)
}

/// `None` when any rule failed; every failure is reported.
fn compile_rules(loc: &str, raw: Vec<RawRule>, issues: &mut Issues) -> Option<Vec<ValidationRule>> {
    let mut rules = Vec::with_capacity(raw.len());
    let mut ok = true;
    for (i, rr) in raw.into_iter().enumerate() {
        match compile_rule(&format!("{}[{}]", loc, i), rr, issues) {
            Some(rule) => rules.push(rule),
            None => ok = false,
        }
    }
    ok.then_some(rules)
}

fn compile_rule(loc: &str, rr: RawRule, issues: &mut Issues) -> Option<ValidationRule> {
    let missing = missing_keys(&[("name", rr.name.is_none()), ("rule", rr.rule.is_none())]);
    if !missing.is_empty() {
        issues.missing(loc, &missing);
    }

    let severity = match rr.severity.as_deref() {
        None => Some(Severity::Error),
        Some(s) => match Severity::parse(s) {
            Ok(sev) => Some(sev),
            Err(e) => {
                issues.push(format!("{}.severity", loc), e.to_string());
                None
            }
        },
    };

    let expression = rr.rule.as_deref().and_then(|text| match Expression::parse(text) {
        Ok(expr) => Some(expr),
        Err(e) => {
            issues.push(format!("{}.rule", loc), e.to_string());
            None
        }
    });

    Some(ValidationRule {
        name: rr.name?,
        description: rr.description.unwrap_or_default(),
        rule: expression?,
        severity: severity?,
    })
}

// ============================================================================
// Packages
// ============================================================================

fn compile_package(
    key: &str,
    rp: RawPackage,
    catalog_types: &BTreeMap<String, Option<FileType>>,
    issues: &mut Issues,
) -> Option<Package> {
    let loc = format!("packages.{}", key);
    let missing = missing_keys(&[
        ("name", rp.name.is_none()),
        ("description", rp.description.is_none()),
        ("file_format", rp.file_format.is_none()),
        ("catalogs", rp.catalogs.is_none()),
    ]);
    if !missing.is_empty() {
        issues.missing(&loc, &missing);
    }

    let file_format = rp.file_format.as_ref().and_then(|f| {
        parse_file_type(&loc, f, issues).map(|file_type| FileFormat {
            file_type,
            delimiter: None,
            header: f.header.unwrap_or(true),
        })
    });

    let refs = rp.catalogs.and_then(|refs| {
        if refs.is_empty() {
            issues.push(format!("{}.catalogs", loc), "a package must reference at least one catalog");
            return None;
        }
        let mut ok = true;
        for name in &refs {
            if !catalog_types.contains_key(name) {
                issues.push(
                    format!("{}.catalogs", loc),
                    format!("references unknown catalog '{}'", name),
                );
                ok = false;
            }
        }
        ok.then_some(refs)
    });

    if let (Some(format), Some(refs)) = (&file_format, &refs) {
        let declared = format.file_type;
        if refs.len() > 1 && declared != FileType::Zip {
            issues.push(
                format!("{}.file_format.type", loc),
                format!(
                    "a package with {} catalogs must be ZIP, not {}",
                    refs.len(),
                    declared
                ),
            );
        } else if refs.len() == 1 && declared != FileType::Zip {
            if let Some(Some(catalog_type)) = catalog_types.get(&refs[0]) {
                if *catalog_type != declared {
                    issues.push(
                        format!("{}.file_format.type", loc),
                        format!(
                            "package type {} does not match catalog '{}' type {}",
                            declared, refs[0], catalog_type
                        ),
                    );
                }
            }
        }
    }

    let package_validation = compile_rule_block(
        &format!("{}.package_validation", loc),
        rp.package_validation,
        issues,
    );

    Some(Package {
        name: rp.name?,
        description: rp.description?,
        file_format: file_format?,
        catalogs: refs?,
        package_validation: package_validation?,
    })
}
