//! SAGE Schema - declarative validation configuration
//!
//! A databox is bound to one YAML configuration describing the files it
//! accepts. This crate turns that text into an immutable [`SageConfig`].
//!
//! # Layers
//!
//! ```text
//! YAML text ──serde──▶ RawConfig ──compile──▶ SageConfig
//!                       (all Option)           (validated, rules parsed)
//! ```
//!
//! - **model**: typed values (`Severity`, `Field`, `Catalog`, `Package`, ...)
//! - **raw**: permissive serde mirror of the YAML, also used to re-serialize
//! - **compiler**: structural checks, accumulating every issue found
//! - **expr**: the small rule language used by `validation_rules`

pub mod compiler;
pub mod error;
pub mod expr;
pub mod model;
pub mod raw;

pub use compiler::{compile, compile_str};
pub use error::{Result, SchemaError, SchemaStructureError, StructureIssue};
pub use expr::{AggregateFn, EvalError, Expression, ExpressionError, Scope, Value};
pub use model::{
    Catalog, Field, FieldType, FileFormat, FileType, Metadata, Package, SageConfig, Severity,
    ValidationRule,
};
pub use raw::RawConfig;
