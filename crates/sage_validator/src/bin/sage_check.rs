//! sage-check: compile a databox configuration and optionally validate a file.
//!
//! ```text
//! sage-check config.yaml
//! sage-check config.yaml --file entrega.zip --package mensual
//! ```
//!
//! Prints a JSON document on stdout. Exit code 0 when the file (if any) has
//! no errors, 1 when it has errors, 2 when the config or file is unusable.

use anyhow::{Context, Result};
use clap::Parser;
use sage_logging::{init_logging, LogConfig, LogLevel};
use sage_schema::compile_str;
use sage_validator::{ContentValidator, ValidationReport, ValidatorOptions, MAX_ERRORS_PER_RULE};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "sage-check", about = "Check a SAGE configuration and delivery file")]
struct Args {
    /// YAML configuration to compile
    config: PathBuf,

    /// File to validate against the configuration
    #[arg(long, requires = "package")]
    file: Option<PathBuf>,

    /// Package key or name the file is delivered for
    #[arg(long)]
    package: Option<String>,

    /// Individual violations kept per rule before suppressing
    #[arg(long, default_value_t = MAX_ERRORS_PER_RULE)]
    max_errors_per_rule: usize,

    /// DEBUG, INFO, WARNING or ERROR
    #[arg(long, default_value = "WARNING")]
    log_level: LogLevel,
}

#[derive(Serialize)]
struct Output {
    config: String,
    catalogs: Vec<String>,
    packages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<ValidationReport>,
}

#[derive(Serialize)]
struct Failure {
    error: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(LogConfig {
        app_name: "sage-check",
        level: args.log_level,
        log_file: None,
    }) {
        eprintln!("Failed to initialize logging: {:#}", e);
    }

    match run(&args) {
        Ok(output) => {
            let failed = output.report.as_ref().is_some_and(|r| !r.is_success());
            print_json(&output);
            if failed {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            print_json(&Failure {
                error: format!("{:#}", e),
            });
            ExitCode::from(2)
        }
    }
}

fn run(args: &Args) -> Result<Output> {
    let yaml = std::fs::read_to_string(&args.config)
        .with_context(|| format!("Failed to read {}", args.config.display()))?;
    let config = compile_str(&yaml).context("Configuration does not compile")?;

    let report = match (&args.file, &args.package) {
        (Some(file), Some(package)) => {
            let validator = ContentValidator::new(ValidatorOptions {
                max_errors_per_rule: args.max_errors_per_rule,
            });
            Some(
                validator
                    .validate_package(file, &config, package)
                    .with_context(|| format!("Cannot validate {}", file.display()))?,
            )
        }
        _ => None,
    };

    Ok(Output {
        config: config.to_string(),
        catalogs: config.catalogs.keys().cloned().collect(),
        packages: config.packages.keys().cloned().collect(),
        report,
    })
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}
