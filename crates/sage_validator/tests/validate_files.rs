//! End-to-end validation of files on disk.

use sage_schema::{compile_str, FileType, SageConfig, Severity};
use sage_validator::{
    detect_encoding, validate_catalog, validate_package, ContentValidator, FileProcessingError,
    TextEncoding, ValidatorOptions,
};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn write(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn zip(&self, name: &str, members: &[(&str, &str)]) -> PathBuf {
        let path = self.dir.path().join(name);
        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
        for (member, body) in members {
            writer
                .start_file(*member, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        path
    }
}

fn config(yaml: &str) -> SageConfig {
    compile_str(yaml).unwrap()
}

const SINGLE: &str = r#"
metadata: {name: e2e, description: e2e, version: "1", author: qa}
catalogs:
  registros:
    name: registros
    description: three columns
    filename: registros.csv
    file_format: {type: CSV, delimiter: ",", header: true}
    fields:
      - {name: cantidad, type: integer}
      - {name: nombre, type: text}
      - {name: fecha, type: date}
packages:
  diario:
    name: Diario
    description: daily
    file_format: {type: CSV}
    catalogs: [registros]
"#;

#[test]
fn test_three_column_csv_reports_physical_line() {
    let env = TestEnv::new();
    let cfg = config(SINGLE);
    let path = env.write(
        "registros.csv",
        b"cantidad,nombre,fecha\n\
          1,Ana,2024-01-01\n\
          2,Luis,2024-01-02\n\
          tres,Eva,2024-01-03\n\
          4,Juan,2024-01-04\n\
          5,Rosa,2024-01-05\n",
    );

    let report = validate_package(&path, &cfg, "diario").unwrap();
    assert_eq!(report.errors, 1);
    assert_eq!(report.warnings, 0);
    assert_eq!(report.violations.len(), 1);

    let violation = &report.violations[0];
    assert_eq!(violation.line, Some(4));
    assert_eq!(violation.field.as_deref(), Some("cantidad"));
    assert_eq!(violation.value.as_deref(), Some("tres"));
}

#[test]
fn test_bom_file_has_clean_header() {
    let env = TestEnv::new();
    let cfg = config(SINGLE);
    let bytes = b"\xEF\xBB\xBFcantidad,nombre,fecha\n1,Ana,2024-01-01\n";
    assert_eq!(detect_encoding(bytes), TextEncoding::Utf8Bom);

    let path = env.write("registros.csv", bytes);
    let report = validate_catalog(&path, cfg.catalog("registros").unwrap()).unwrap();
    // A BOM glued to "cantidad" would surface as a missing column.
    assert!(report.violations.is_empty(), "{:?}", report.violations);
}

#[test]
fn test_fifteen_coercion_failures_are_capped() {
    let env = TestEnv::new();
    let cfg = config(SINGLE);
    let mut body = String::from("cantidad,nombre,fecha\n");
    for i in 0..15 {
        body.push_str(&format!("x{},n,2024-01-01\n", i));
    }
    let path = env.write("registros.csv", body.as_bytes());

    let report = validate_catalog(&path, cfg.catalog("registros").unwrap()).unwrap();
    assert_eq!(report.errors, 15);

    let for_field: Vec<_> = report
        .violations
        .iter()
        .filter(|v| v.field.as_deref() == Some("cantidad"))
        .collect();
    assert_eq!(for_field.len(), 11);
    let individual = for_field
        .iter()
        .filter(|v| v.severity == Severity::Error)
        .count();
    assert_eq!(individual, 10);
    let notice = for_field.last().unwrap();
    assert_eq!(notice.severity, Severity::Warning);
    assert_eq!(
        notice.message,
        "15 violations, 5 more suppressed (reporting truncated)"
    );
    // The notice is not a counted warning.
    assert_eq!(report.warnings, 0);
}

#[test]
fn test_cap_is_configurable() {
    let env = TestEnv::new();
    let cfg = config(SINGLE);
    let path = env.write(
        "registros.csv",
        b"cantidad,nombre,fecha\na,n,x\nb,n,y\nc,n,z\n",
    );
    let validator = ContentValidator::new(ValidatorOptions {
        max_errors_per_rule: 1,
    });
    let report = validator
        .validate_catalog(&path, cfg.catalog("registros").unwrap())
        .unwrap();
    assert_eq!(report.errors, 6);
    // one kept + one notice, for each of the two fields
    assert_eq!(report.violations.len(), 4);
}

#[test]
fn test_declared_type_must_match_content() {
    let env = TestEnv::new();
    let cfg = config(SINGLE);
    let path = env.zip("registros.csv", &[("registros.csv", "cantidad\n1\n")]);

    match validate_package(&path, &cfg, "diario") {
        Err(FileProcessingError::TypeMismatch {
            declared, detected, ..
        }) => {
            assert_eq!(declared, FileType::Csv);
            assert_eq!(detected, FileType::Zip);
        }
        other => panic!("expected type mismatch, got {:?}", other),
    }
}

#[test]
fn test_missing_file_is_fatal() {
    let env = TestEnv::new();
    let cfg = config(SINGLE);
    let missing = env.dir.path().join("nope.csv");
    assert!(matches!(
        validate_package(&missing, &cfg, "diario"),
        Err(FileProcessingError::NotFound(_))
    ));
}

const BUNDLE: &str = r#"
metadata: {name: bundle, description: zip delivery, version: "3", author: qa}
catalogs:
  cabecera:
    name: cabecera
    description: header rows
    filename: Cabecera.CSV
    file_format: {type: CSV, delimiter: ";", header: true}
    fields:
      - {name: folio, type: integer, unique: true}
      - {name: total, type: decimal}
  detalle:
    name: detalle
    description: detail rows
    filename: detalle.csv
    file_format: {type: CSV, delimiter: ";", header: true}
    fields:
      - {name: folio, type: integer}
      - {name: monto, type: decimal}
  anexo:
    name: anexo
    description: optional attachment
    filename: anexo.csv
    file_format: {type: CSV, delimiter: ";"}
    fields:
      - {name: nota, type: text}
packages:
  mensual:
    name: Mensual
    description: monthly
    file_format: {type: ZIP}
    catalogs: [cabecera, detalle, anexo]
    package_validation:
      - name: totales_cuadran
        rule: "sum(cabecera.total) == sum(detalle.monto)"
        severity: warning
      - name: hay_detalle
        rule: "count(detalle) >= count(cabecera)"
"#;

#[test]
fn test_zip_package_members_and_package_rules() {
    let env = TestEnv::new();
    let cfg = config(BUNDLE);
    let path = env.zip(
        "entrega.zip",
        &[
            ("datos/cabecera.csv", "folio;total\n1;10,5\n2;4\n"),
            ("datos/detalle.csv", "folio;monto\n1;10,5\n2;3\n"),
        ],
    );

    let report = validate_package(&path, &cfg, "mensual").unwrap();
    let rules: Vec<&str> = report.violations.iter().map(|v| v.rule.as_str()).collect();
    assert_eq!(rules, vec!["file_present", "totales_cuadran"]);
    assert_eq!(report.errors, 1);
    assert_eq!(report.warnings, 1);
    assert_eq!(report.violations[0].catalog, "anexo");
    assert_eq!(report.violations[1].catalog, "Mensual");
}

#[test]
fn test_zip_package_rejects_plain_file() {
    let env = TestEnv::new();
    let cfg = config(BUNDLE);
    let path = env.write("entrega.zip", b"folio;total\n");
    assert!(matches!(
        validate_package(&path, &cfg, "mensual"),
        Err(FileProcessingError::TypeMismatch { .. })
    ));
}
