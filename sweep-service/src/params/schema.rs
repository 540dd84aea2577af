// Parameter Schema Derivation
// Classifies tagged schema fields into input, output, algorithm and performance groups

use crate::params::groups::{BindingWarning, ParamGroup, ParamGroups};
use crate::params::value::Value;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Errors raised while deriving parameter groups
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("field '{field}' has conflicting tags: {tags}")]
    ConflictingTags { field: String, tags: String },

    #[error("field '{0}' is declared more than once")]
    DuplicateField(String),

    #[error("unknown parameter tag '{0}'")]
    UnknownTag(String),

    #[error("node '{node}' has no parameter '{param}'")]
    UnknownParam { node: String, param: String },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Tag attached to a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTag {
    #[serde(alias = "in")]
    InPath,
    #[serde(alias = "out")]
    OutPath,
    /// Marks the canonical output; implies `OutPath`
    Primary,
    #[serde(alias = "perf")]
    PerfParam,
    #[serde(alias = "algo")]
    AlgoParam,
}

impl FieldTag {
    /// The group this tag selects, `None` for the `Primary` modifier
    pub fn group(self) -> Option<ParamGroup> {
        match self {
            FieldTag::InPath => Some(ParamGroup::InPath),
            FieldTag::OutPath => Some(ParamGroup::OutPath),
            FieldTag::PerfParam => Some(ParamGroup::PerfParam),
            FieldTag::AlgoParam => Some(ParamGroup::AlgoParam),
            FieldTag::Primary => None,
        }
    }
}

impl fmt::Display for FieldTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldTag::InPath => "in_path",
            FieldTag::OutPath => "out_path",
            FieldTag::Primary => "primary",
            FieldTag::PerfParam => "perf_param",
            FieldTag::AlgoParam => "algo_param",
        };
        f.write_str(name)
    }
}

impl FromStr for FieldTag {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_path" | "in" => Ok(FieldTag::InPath),
            "out_path" | "out" => Ok(FieldTag::OutPath),
            "primary" => Ok(FieldTag::Primary),
            "perf_param" | "perf" => Ok(FieldTag::PerfParam),
            "algo_param" | "algo" => Ok(FieldTag::AlgoParam),
            other => Err(ParamError::UnknownTag(other.to_string())),
        }
    }
}

/// One field of a tagged configuration schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub default: Value,
    #[serde(default)]
    pub tags: Vec<FieldTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            default: default.into(),
            tags: Vec::new(),
            help: None,
        }
    }

    pub fn tag(mut self, tag: FieldTag) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Resolve the single group this field belongs to
    fn resolve_group(&self) -> Result<(ParamGroup, bool), ParamError> {
        let groups: BTreeSet<ParamGroup> = self.tags.iter().filter_map(|t| t.group()).collect();
        let primary = self.tags.contains(&FieldTag::Primary);

        if groups.len() > 1 {
            return Err(self.conflict());
        }

        let group = match groups.into_iter().next() {
            Some(group) => group,
            None if primary => ParamGroup::OutPath,
            None => ParamGroup::AlgoParam,
        };

        if primary && group != ParamGroup::OutPath {
            return Err(self.conflict());
        }

        Ok((group, primary))
    }

    fn conflict(&self) -> ParamError {
        let tags: Vec<String> = self.tags.iter().map(ToString::to_string).collect();
        ParamError::ConflictingTags {
            field: self.name.clone(),
            tags: tags.join(", "),
        }
    }
}

/// Result of deriving groups from a schema
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedGroups {
    pub groups: ParamGroups,
    pub primary_out_key: Option<String>,
    /// Unbound inputs; never fatal
    pub warnings: Vec<BindingWarning>,
}

/// Partition schema fields into parameter groups.
///
/// Untagged fields are algorithm parameters. Output fields with a null
/// default fall back to the field name as their relative path.
pub fn derive_groups(fields: &[FieldSpec]) -> Result<DerivedGroups, ParamError> {
    let mut groups = ParamGroups::new();
    let mut primaries = Vec::new();
    let mut seen = BTreeSet::new();

    for field in fields {
        if !seen.insert(field.name.as_str()) {
            return Err(ParamError::DuplicateField(field.name.clone()));
        }

        let (group, primary) = field.resolve_group()?;
        if primary {
            primaries.push(field.name.clone());
        }

        match group {
            ParamGroup::InPath => {
                groups
                    .in_paths
                    .insert(field.name.clone(), field.default.clone().into_path_binding());
            }
            ParamGroup::OutPath => {
                let rel = match &field.default {
                    Value::Null => field.name.clone(),
                    Value::String(s) if s.is_empty() => field.name.clone(),
                    other => other.as_arg(),
                };
                groups.out_paths.insert(field.name.clone(), rel);
            }
            ParamGroup::AlgoParam => {
                groups
                    .algo_params
                    .insert(field.name.clone(), field.default.clone());
            }
            ParamGroup::PerfParam => {
                groups
                    .perf_params
                    .insert(field.name.clone(), field.default.clone());
            }
        }
    }

    let primary_out_key = match primaries.len() {
        0 if groups.out_paths.is_empty() => None,
        1 => primaries.pop(),
        0 => {
            return Err(ParamError::Config(
                "schema declares output fields but none is tagged primary".to_string(),
            ))
        }
        _ => {
            return Err(ParamError::Config(format!(
                "schema tags more than one primary output: {}",
                primaries.join(", ")
            )))
        }
    };

    let warnings = groups
        .unbound_in_paths()
        .map(|name| BindingWarning::unbound_in_path(None, name))
        .collect();

    Ok(DerivedGroups {
        groups,
        primary_out_key,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_schema() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new("src", Value::Null).tag(FieldTag::InPath),
            FieldSpec::new("dst", "schema.txt")
                .tag(FieldTag::OutPath)
                .tag(FieldTag::Primary),
            FieldSpec::new("extra", "").tag(FieldTag::OutPath),
            FieldSpec::new("foo", 1),
            FieldSpec::new("workers", 2).tag(FieldTag::PerfParam),
        ]
    }

    #[test]
    fn test_derive_demo_schema() {
        let derived = derive_groups(&demo_schema()).unwrap();

        assert_eq!(derived.groups.in_paths["src"], None);
        assert_eq!(derived.groups.out_paths["dst"], "schema.txt");
        assert_eq!(derived.groups.out_paths["extra"], "extra");
        assert_eq!(derived.groups.algo_params["foo"], Value::Int(1));
        assert_eq!(derived.groups.perf_params["workers"], Value::Int(2));
        assert_eq!(derived.primary_out_key.as_deref(), Some("dst"));

        assert_eq!(derived.warnings.len(), 1);
        assert!(derived.warnings[0].message.contains("in_path \"src\""));
    }

    #[test]
    fn test_empty_string_in_path_is_unbound() {
        let fields = vec![
            FieldSpec::new("src", "").tag(FieldTag::InPath),
            FieldSpec::new("dst", "out.json").tag(FieldTag::Primary),
        ];
        let derived = derive_groups(&fields).unwrap();

        assert_eq!(derived.groups.in_paths["src"], None);
        assert_eq!(derived.warnings.len(), 1);
        assert!(derived.warnings[0].message.contains("in_path \"src\""));
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let first = derive_groups(&demo_schema()).unwrap();
        let second = derive_groups(&demo_schema()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_conflicting_tags() {
        let fields = vec![FieldSpec::new("foo", 1)
            .tag(FieldTag::InPath)
            .tag(FieldTag::OutPath)];
        let err = derive_groups(&fields).unwrap_err();
        assert_eq!(
            err,
            ParamError::ConflictingTags {
                field: "foo".to_string(),
                tags: "in_path, out_path".to_string(),
            }
        );
        assert!(err.to_string().contains("conflicting tags"));
    }

    #[test]
    fn test_primary_on_input_conflicts() {
        let fields = vec![FieldSpec::new("src", "a.txt")
            .tag(FieldTag::InPath)
            .tag(FieldTag::Primary)];
        assert!(matches!(
            derive_groups(&fields),
            Err(ParamError::ConflictingTags { .. })
        ));
    }

    #[test]
    fn test_primary_alone_implies_out_path() {
        let fields = vec![FieldSpec::new("dst", "out.json").tag(FieldTag::Primary)];
        let derived = derive_groups(&fields).unwrap();
        assert_eq!(derived.groups.out_paths["dst"], "out.json");
        assert_eq!(derived.primary_out_key.as_deref(), Some("dst"));
    }

    #[test]
    fn test_missing_primary_is_config_error() {
        let fields = vec![FieldSpec::new("dst", "out.json").tag(FieldTag::OutPath)];
        assert!(matches!(derive_groups(&fields), Err(ParamError::Config(_))));
    }

    #[test]
    fn test_multiple_primaries_is_config_error() {
        let fields = vec![
            FieldSpec::new("a", "a.json").tag(FieldTag::Primary),
            FieldSpec::new("b", "b.json").tag(FieldTag::Primary),
        ];
        let err = derive_groups(&fields).unwrap_err();
        assert!(err.to_string().contains("a, b"));
    }

    #[test]
    fn test_no_outputs_no_primary() {
        let fields = vec![FieldSpec::new("alpha", 0.5)];
        let derived = derive_groups(&fields).unwrap();
        assert!(derived.primary_out_key.is_none());
        assert!(derived.warnings.is_empty());
    }

    #[test]
    fn test_duplicate_field() {
        let fields = vec![FieldSpec::new("a", 1), FieldSpec::new("a", 2)];
        assert_eq!(
            derive_groups(&fields),
            Err(ParamError::DuplicateField("a".to_string()))
        );
    }

    #[test]
    fn test_tag_aliases() {
        assert_eq!("in".parse::<FieldTag>().unwrap(), FieldTag::InPath);
        assert_eq!("out".parse::<FieldTag>().unwrap(), FieldTag::OutPath);
        assert!("bogus".parse::<FieldTag>().is_err());
    }

    #[test]
    fn test_schema_from_yaml() {
        let yaml = r#"
- name: src
  tags: [in_path]
- name: dst
  default: out.json
  tags: [out_path, primary]
- name: workers
  default: 4
  tags: [perf_param]
"#;
        let fields: Vec<FieldSpec> = serde_yaml::from_str(yaml).unwrap();
        let derived = derive_groups(&fields).unwrap();
        assert_eq!(derived.primary_out_key.as_deref(), Some("dst"));
        assert_eq!(derived.groups.perf_params["workers"], Value::Int(4));
    }
}
