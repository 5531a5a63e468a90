//! Domain types for Stencil template bundles.
//!
//! Descriptors are deserialized from `template.yaml` via serde + serde_yaml.
//! Variable values are carried as `serde_json::Value` so they can be fed
//! straight into the rendering context.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Variable bindings for one generation, keyed by variable name.
pub type Variables = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed name for a template bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateName(pub String);

impl TemplateName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TemplateName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TemplateName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Declared type of a template variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    #[default]
    String,
    Boolean,
    Integer,
    Number,
    List,
}

impl VariableType {
    /// Whether `value` is acceptable for this declared type.
    ///
    /// Strings are accepted for every scalar type as long as they parse, since
    /// CLI bindings arrive as text.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (VariableType::String, Value::String(_)) => true,
            (VariableType::Boolean, Value::Bool(_)) => true,
            (VariableType::Boolean, Value::String(s)) => {
                matches!(s.to_ascii_lowercase().as_str(), "true" | "false")
            }
            (VariableType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (VariableType::Integer, Value::String(s)) => s.parse::<i64>().is_ok(),
            (VariableType::Number, Value::Number(_)) => true,
            (VariableType::Number, Value::String(s)) => s.parse::<f64>().is_ok(),
            (VariableType::List, Value::Array(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableType::String => write!(f, "string"),
            VariableType::Boolean => write!(f, "boolean"),
            VariableType::Integer => write!(f, "integer"),
            VariableType::Number => write!(f, "number"),
            VariableType::List => write!(f, "list"),
        }
    }
}

/// Stage at which a hook runs relative to file generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStage {
    PreGen,
    PostGen,
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookStage::PreGen => write!(f, "pre_gen"),
            HookStage::PostGen => write!(f, "post_gen"),
        }
    }
}

/// Which declared hooks take part in a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookInheritance {
    /// Hooks of the template and every ancestor in its `extends` chain.
    #[default]
    Chain,
    /// Only hooks declared by the template itself.
    SelfOnly,
    /// No declared hooks; only registered and caller-supplied ones run.
    Disabled,
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Schema entry for one template variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VariableSpec {
    #[serde(rename = "type", default)]
    pub var_type: VariableType,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
}

/// A shell hook declared in a template descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookDeclaration {
    #[serde(default)]
    pub description: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub ignore_errors: bool,
}

/// A problem found while validating bindings against a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableIssue {
    pub name: String,
    pub expected: VariableType,
    pub reason: String,
}

impl fmt::Display for VariableIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.reason)
    }
}

/// Parsed `template.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDescriptor {
    pub name: TemplateName,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Parent template whose schema and hooks this one inherits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<TemplateName>,
    #[serde(default)]
    pub variables: BTreeMap<String, VariableSpec>,
    #[serde(default)]
    pub hooks: BTreeMap<HookStage, Vec<HookDeclaration>>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

impl TemplateDescriptor {
    /// A descriptor with no variables and no hooks.
    pub fn empty(name: impl Into<TemplateName>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: default_version(),
            extends: None,
            variables: BTreeMap::new(),
            hooks: BTreeMap::new(),
        }
    }

    /// Names of every declared variable, sorted.
    pub fn declared_variables(&self) -> Vec<String> {
        self.variables.keys().cloned().collect()
    }

    /// Declared default values.
    pub fn defaults(&self) -> Variables {
        self.variables
            .iter()
            .filter_map(|(name, spec)| spec.default.clone().map(|v| (name.clone(), v)))
            .collect()
    }

    /// Fill in defaults for variables the caller did not bind.
    pub fn apply_defaults(&self, variables: &Variables) -> Variables {
        let mut merged = self.defaults();
        for (name, value) in variables {
            merged.insert(name.clone(), value.clone());
        }
        merged
    }

    /// Check bindings against the schema.
    ///
    /// Reports required variables that are missing or null and bound values
    /// whose type does not match the declaration. Undeclared variables are
    /// allowed through.
    pub fn validate(&self, variables: &Variables) -> Vec<VariableIssue> {
        let mut issues = Vec::new();
        for (name, spec) in &self.variables {
            match variables.get(name) {
                None | Some(Value::Null) if spec.required => issues.push(VariableIssue {
                    name: name.clone(),
                    expected: spec.var_type,
                    reason: "required variable is missing".to_string(),
                }),
                Some(value) if !value.is_null() && !spec.var_type.accepts(value) => {
                    issues.push(VariableIssue {
                        name: name.clone(),
                        expected: spec.var_type,
                        reason: format!("expected {}", spec.var_type),
                    })
                }
                _ => {}
            }
        }
        issues
    }

    /// Declared hooks for a stage, in declaration order.
    pub fn hooks_for(&self, stage: HookStage) -> &[HookDeclaration] {
        self.hooks.get(&stage).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
