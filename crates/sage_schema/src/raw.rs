//! Permissive serde mirror of the YAML configuration.
//!
//! Every key is optional here so that the compiler, not serde, decides what
//! is missing and can report all of it at once. The same types serialize a
//! compiled [`SageConfig`] back to YAML.

use crate::model::{Catalog, Field, FileFormat, Package, SageConfig, ValidationRule};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RawMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalogs: Option<BTreeMap<String, RawCatalog>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages: Option<BTreeMap<String, RawPackage>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMetadata {
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCatalog {
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_format: Option<RawFileFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<RawField>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_validation: Option<RawRuleBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_validation: Option<RawRuleBlock>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPackage {
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_format: Option<RawFileFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalogs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_validation: Option<RawRuleBlock>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawFileFormat {
    #[serde(
        rename = "type",
        default,
        deserialize_with = "scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub file_type: Option<String>,
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawField {
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        rename = "type",
        default,
        deserialize_with = "scalar_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub field_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_rules: Option<Vec<RawRule>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRule {
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(default, deserialize_with = "scalar_string", skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

/// `row_validation`, `catalog_validation` and `package_validation` accept
/// either a bare list of rules or a block with a `validation_rules` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawRuleBlock {
    List(Vec<RawRule>),
    Block {
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        validation_rules: Vec<RawRule>,
    },
}

impl RawRuleBlock {
    pub fn into_rules(self) -> Vec<RawRule> {
        match self {
            RawRuleBlock::List(rules) => rules,
            RawRuleBlock::Block {
                validation_rules, ..
            } => validation_rules,
        }
    }
}

/// Accept YAML scalars of any kind as text (`version: 1.0` is a float in YAML).
fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(serde_yaml::Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a scalar value, found {:?}",
            other
        ))),
    }
}

// ============================================================================
// Compiled → raw (re-serialization)
// ============================================================================

impl From<&ValidationRule> for RawRule {
    fn from(rule: &ValidationRule) -> Self {
        Self {
            name: Some(rule.name.clone()),
            description: Some(rule.description.clone()),
            rule: Some(rule.rule.source().to_string()),
            severity: Some(rule.severity.as_str().to_string()),
        }
    }
}

fn rule_block(rules: &[ValidationRule]) -> Option<RawRuleBlock> {
    if rules.is_empty() {
        None
    } else {
        Some(RawRuleBlock::List(rules.iter().map(RawRule::from).collect()))
    }
}

impl From<&FileFormat> for RawFileFormat {
    fn from(format: &FileFormat) -> Self {
        Self {
            file_type: Some(format.file_type.as_str().to_string()),
            delimiter: format.delimiter.map(|c| c.to_string()),
            header: Some(format.header),
        }
    }
}

impl From<&Field> for RawField {
    fn from(field: &Field) -> Self {
        Self {
            name: Some(field.name.clone()),
            field_type: Some(field.field_type.as_str().to_string()),
            required: Some(field.required),
            unique: Some(field.unique),
            validation_rules: if field.validation_rules.is_empty() {
                None
            } else {
                Some(field.validation_rules.iter().map(RawRule::from).collect())
            },
        }
    }
}

impl From<&Catalog> for RawCatalog {
    fn from(catalog: &Catalog) -> Self {
        Self {
            name: Some(catalog.name.clone()),
            description: Some(catalog.description.clone()),
            filename: Some(catalog.filename.clone()),
            file_format: Some(RawFileFormat::from(&catalog.file_format)),
            fields: Some(catalog.fields.iter().map(RawField::from).collect()),
            row_validation: rule_block(&catalog.row_validation),
            catalog_validation: rule_block(&catalog.catalog_validation),
        }
    }
}

impl From<&Package> for RawPackage {
    fn from(package: &Package) -> Self {
        Self {
            name: Some(package.name.clone()),
            description: Some(package.description.clone()),
            file_format: Some(RawFileFormat::from(&package.file_format)),
            catalogs: Some(package.catalogs.clone()),
            package_validation: rule_block(&package.package_validation),
        }
    }
}

impl From<&SageConfig> for RawConfig {
    fn from(config: &SageConfig) -> Self {
        Self {
            metadata: Some(RawMetadata {
                name: Some(config.metadata.name.clone()),
                description: Some(config.metadata.description.clone()),
                version: Some(config.metadata.version.clone()),
                author: Some(config.metadata.author.clone()),
            }),
            catalogs: Some(
                config
                    .catalogs
                    .iter()
                    .map(|(key, c)| (key.clone(), RawCatalog::from(c)))
                    .collect(),
            ),
            packages: Some(
                config
                    .packages
                    .iter()
                    .map(|(key, p)| (key.clone(), RawPackage::from(p)))
                    .collect(),
            ),
        }
    }
}

impl SageConfig {
    /// Render back to YAML; compiling the output yields an equal config.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&RawConfig::from(self))
    }
}
