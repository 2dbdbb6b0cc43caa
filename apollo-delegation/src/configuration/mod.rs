//! Declarative delegations.
//!
//! A configuration maps each delegated root field, by the response key the caller uses, to the
//! subschema root field that answers it and the transforms to apply on the way:
//!
//! ```yaml
//! delegations:
//!   addressByUser:
//!     field_name: userById
//!     transforms:
//!       - wrap_query:
//!           path: [userById]
//!           fields: [address]
//! ```
//!
//! [`crate::transforms::TransformQuery`] carries arbitrary functions and has no declarative
//! form.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::str::FromStr;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use displaydoc::Display;
use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use schemars::schema::RootSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::delegation::DelegationRequest;
use crate::delegation::OperationKind;
use crate::error::DelegationError;
use crate::json_ext::Path;
use crate::selection_set::variables_used_by;
use crate::transforms::ExtractField;
use crate::transforms::Transform;
use crate::transforms::WrapQuery;

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },

    /// could not deserialize configuration: {0}
    DeserializeConfigError(serde_json::Error),

    /// no delegation is configured for '{0}'
    UnknownDelegation(String),

    /// delegation '{delegation}' is misconfigured: {error}
    InvalidDelegation {
        delegation: String,
        error: DelegationError,
    },
}

/// The delegations served by a gateway.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Delegated root fields, by the response key the caller uses for them.
    #[serde(default)]
    pub delegations: BTreeMap<String, DelegationConfig>,
}

/// How one root field is delegated.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DelegationConfig {
    /// The root field of the subschema.
    pub field_name: String,

    /// The kind of operation the root field belongs to.
    #[serde(default)]
    pub operation_kind: OperationKind,

    /// Transforms applied to requests in order, and to results in reverse order.
    #[serde(default)]
    pub transforms: Vec<TransformConfig>,
}

/// A declarative transform.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum TransformConfig {
    /// Wrap the selection set at `path` in the chain of `fields`.
    WrapQuery {
        /// The field whose selection set is wrapped.
        path: Path,
        /// The synthetic fields, outermost first.
        fields: Vec<String>,
    },

    /// Move the selection set at `from` to `to`.
    ExtractField {
        /// Where the caller selects the field.
        from: Path,
        /// Where the subschema returns it.
        to: Path,
    },
}

impl TransformConfig {
    fn to_transform(&self) -> Result<Transform, DelegationError> {
        Ok(match self {
            TransformConfig::WrapQuery { path, fields } => {
                WrapQuery::wrap_fields(path.clone(), fields.as_slice())?.into()
            }
            TransformConfig::ExtractField { from, to } => {
                ExtractField::new(from.clone(), to.clone())?.into()
            }
        })
    }
}

impl DelegationConfig {
    pub fn field_name(&self) -> Result<Name, DelegationError> {
        Name::new(&self.field_name).map_err(|_| DelegationError::InvalidTransform {
            reason: format!("'{}' is not a valid field name", self.field_name),
        })
    }

    pub fn transforms(&self) -> Result<Vec<Transform>, DelegationError> {
        self.transforms
            .iter()
            .map(TransformConfig::to_transform)
            .collect()
    }
}

impl Configuration {
    /// The transforms configured for the delegation of `key`.
    pub fn transforms_for(&self, key: &str) -> Result<Vec<Transform>, ConfigurationError> {
        let delegation = self.delegation(key)?;
        delegation
            .transforms()
            .map_err(|error| ConfigurationError::InvalidDelegation {
                delegation: key.to_string(),
                error,
            })
    }

    /// The delegation request resolving `upstream`, a root field selected by the caller in
    /// `operation`.
    ///
    /// The delegation is looked up by the field's name and its result is returned under the
    /// field's response key. Arguments and selection set are taken from the field, along with
    /// the definitions of the operation variables the field uses. The caller sets variable
    /// values and context on the returned request.
    pub fn request_for(
        &self,
        operation: &ast::OperationDefinition,
        upstream: &ast::Field,
    ) -> Result<DelegationRequest, ConfigurationError> {
        let key = upstream.name.as_str();
        let delegation = self.delegation(key)?;
        let invalid = |error| ConfigurationError::InvalidDelegation {
            delegation: key.to_string(),
            error,
        };

        Ok(DelegationRequest::builder()
            .operation_kind(delegation.operation_kind)
            .field_name(delegation.field_name().map_err(invalid)?)
            .response_key(upstream.alias.clone().unwrap_or_else(|| upstream.name.clone()))
            .arguments(upstream.arguments.clone())
            .variable_definitions(variable_definitions(operation, upstream))
            .selection_set(upstream.selection_set.clone())
            .transforms(delegation.transforms().map_err(invalid)?)
            .build())
    }

    fn delegation(&self, key: &str) -> Result<&DelegationConfig, ConfigurationError> {
        self.delegations
            .get(key)
            .ok_or_else(|| ConfigurationError::UnknownDelegation(key.to_string()))
    }

    /// Build every configured transform, reporting the first misconfigured delegation.
    fn validate(&self) -> Result<(), ConfigurationError> {
        for (key, delegation) in &self.delegations {
            delegation
                .field_name()
                .and_then(|_| delegation.transforms())
                .map_err(|error| ConfigurationError::InvalidDelegation {
                    delegation: key.clone(),
                    error,
                })?;
        }
        Ok(())
    }
}

fn variable_definitions(
    operation: &ast::OperationDefinition,
    upstream: &ast::Field,
) -> Vec<Node<ast::VariableDefinition>> {
    let used = variables_used_by(&upstream.arguments, &upstream.selection_set);
    operation
        .variables
        .iter()
        .filter(|definition| used.contains(&definition.name))
        .cloned()
        .collect()
}

impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_configuration(s)
    }
}

/// Generate a JSON schema for the configuration.
pub fn generate_config_schema() -> RootSchema {
    let settings = SchemaSettings::draft07().with(|s| {
        s.option_nullable = true;
        s.option_add_null_type = false;
        s.inline_subschemas = true;
    });
    settings
        .into_generator()
        .into_root_schema_for::<Configuration>()
}

/// Validate configuration yaml against the generated json schema, then deserialize it and check
/// that every configured transform can be built.
pub fn validate_configuration(raw_yaml: &str) -> Result<Configuration, ConfigurationError> {
    let defaulted_yaml = if raw_yaml.trim().is_empty() {
        "{}"
    } else {
        raw_yaml
    };

    let yaml: serde_json::Value = serde_yaml::from_str(defaulted_yaml).map_err(|e| {
        ConfigurationError::InvalidConfiguration {
            message: "failed to parse yaml",
            error: e.to_string(),
        }
    })?;

    let config_schema = serde_json::to_value(generate_config_schema()).map_err(|e| {
        ConfigurationError::InvalidConfiguration {
            message: "failed to generate the configuration schema",
            error: e.to_string(),
        }
    })?;
    let validator = jsonschema::draft7::new(&config_schema).map_err(|e| {
        ConfigurationError::InvalidConfiguration {
            message: "failed to compile the configuration schema",
            error: e.to_string(),
        }
    })?;

    let mut errors = String::new();
    for (index, e) in validator.iter_errors(&yaml).enumerate() {
        let _ = writeln!(&mut errors, "{}. at '{}': {}", index + 1, e.instance_path, e);
    }
    if !errors.is_empty() {
        tracing::debug!(%errors, "configuration does not match its schema");
        return Err(ConfigurationError::InvalidConfiguration {
            message: "configuration had errors",
            error: errors,
        });
    }

    let configuration: Configuration =
        serde_json::from_value(yaml).map_err(ConfigurationError::DeserializeConfigError)?;
    configuration.validate()?;
    Ok(configuration)
}
