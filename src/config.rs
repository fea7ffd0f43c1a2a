//! Engine configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};

/// Depth bound of the default "fetch everything" expand closure.
pub const DEFAULT_EXPAND_DEPTH: usize = 5;

/// How attribute names without an explicit remote name are rendered by the
/// protocol translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NameCase {
    /// `firstName` becomes `FirstName`.
    #[default]
    Pascal,
    /// Names are used verbatim.
    AsIs,
}

impl NameCase {
    /// Applies the convention to a local field name.
    pub fn apply(self, name: &str) -> String {
        match self {
            NameCase::AsIs => name.to_owned(),
            NameCase::Pascal => {
                let mut chars = name.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        }
    }
}

/// Builder settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Depth of the closure walk used when no select list is given.
    pub expand_depth: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            expand_depth: DEFAULT_EXPAND_DEPTH,
        }
    }
}

/// Protocol translator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Attribute naming convention.
    pub name_case: NameCase,
    /// Lambda variables are named `{lambda_prefix}{depth}`.
    pub lambda_prefix: String,
    /// Prefix of the well-known query keys.
    pub param_prefix: String,
    /// Lowercase both sides of substring tests.
    pub case_insensitive_contains: bool,
    /// Namespace prepended to type names that are not qualified.
    pub type_namespace: Option<String>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            name_case: NameCase::Pascal,
            lambda_prefix: "f".to_owned(),
            param_prefix: "$".to_owned(),
            case_insensitive_contains: true,
            type_namespace: None,
        }
    }
}

impl ProtocolConfig {
    /// Qualifies a type name with the configured namespace unless it
    /// already contains a dot.
    pub fn qualify(&self, type_name: &str) -> String {
        match &self.type_namespace {
            Some(ns) if !type_name.contains('.') => format!("{ns}.{type_name}"),
            _ => type_name.to_owned(),
        }
    }
}

/// Top-level configuration shared by the builder and the translators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Builder settings.
    pub builder: BuilderConfig,
    /// Protocol translator settings.
    pub protocol: ProtocolConfig,
}

impl EngineConfig {
    /// Configuration that keeps local names in the protocol output.
    pub fn verbatim_names() -> Self {
        let mut config = Self::default();
        config.protocol.name_case = NameCase::AsIs;
        config
    }

    /// Parses a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| QueryError::Config(err.to_string()))
    }

    /// Reads a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| QueryError::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn pascal_case_uppercases_first_letter_only() {
        assert_eq!(NameCase::Pascal.apply("firstName"), "FirstName");
        assert_eq!(NameCase::AsIs.apply("firstName"), "firstName");
        assert_eq!(NameCase::Pascal.apply(""), "");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [protocol]
            name_case = "as-is"
            type_namespace = "Ns"
            "#,
        )
        .unwrap();
        assert_eq!(config.protocol.name_case, NameCase::AsIs);
        assert_eq!(config.protocol.lambda_prefix, "f");
        assert_eq!(config.builder.expand_depth, DEFAULT_EXPAND_DEPTH);
        assert_eq!(config.protocol.qualify("Employee"), "Ns.Employee");
        assert_eq!(config.protocol.qualify("Other.Employee"), "Other.Employee");
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[builder]\nexpand_depth = 2").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.builder.expand_depth, 2);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = EngineConfig::from_toml_str("[builder\n").unwrap_err();
        assert_eq!(err.code(), "Config");
    }
}
