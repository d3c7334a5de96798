//! SAGE Validator - content validation of delivered files
//!
//! Takes a file on disk plus a compiled [`sage_schema::Catalog`] or package
//! and returns a [`ValidationReport`]: error and warning totals and the
//! individual violations, capped per rule.
//!
//! # Example
//!
//! ```rust,ignore
//! use sage_validator::{ContentValidator, ValidatorOptions};
//!
//! let config = sage_schema::compile_str(&yaml)?;
//! let validator = ContentValidator::new(ValidatorOptions::default());
//! let report = validator.validate_package(path, &config, "mensual")?;
//! if report.is_success() {
//!     println!("{} warning(s)", report.warnings);
//! }
//! ```

pub mod coerce;
pub mod encoding;
pub mod error;
pub mod filetype;
pub mod ledger;
pub mod scope;
pub mod table;
pub mod validator;

pub use encoding::{detect_encoding, TextEncoding};
pub use error::{FileProcessingError, Result};
pub use filetype::detect_file_type;
pub use ledger::{Ledger, ValidationReport, Violation, MAX_ERRORS_PER_RULE};
pub use validator::{validate_catalog, validate_package, ContentValidator, ValidatorOptions};
