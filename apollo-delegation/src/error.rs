//! Delegation errors.
use displaydoc::Display;
use serde::Serialize;
use thiserror::Error;
use tower::BoxError;

pub use crate::configuration::ConfigurationError;
use crate::graphql;
use crate::json_ext::Path;
use crate::json_ext::Value;

/// Error types for delegation.
///
/// These abort a delegated call. Errors reported by the subschema inside its response are not
/// represented here: they are GraphQL data and flow back in [`graphql::Response::errors`].
#[derive(Error, Display, Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(untagged)]
#[ignore_extra_doc_attributes]
#[non_exhaustive]
pub enum DelegationError {
    /// path '{path}' does not resolve to a field selection in the delegated document
    ///
    /// The transform is misconfigured for this document, retrying cannot help.
    PathNotFound {
        /// The path that could not be resolved.
        path: Path,
    },

    /// transform invariant violated at '{path}': {reason}
    ///
    /// A result-side rewrite received a value its request-side rewrite cannot have produced.
    TransformInvariantViolation {
        /// Where in the response the violation was found.
        path: Path,

        /// What was unexpected.
        reason: String,
    },

    /// invalid delegated document: {reason}
    InvalidDocument {
        /// The reason the document cannot be used.
        reason: String,
    },

    /// invalid transform: {reason}
    InvalidTransform {
        /// Why the transform cannot be built.
        reason: String,
    },

    /// subschema request failed: {reason}
    ///
    /// note that this relates to a failure to obtain a response and not to a GraphQL error
    SubschemaRequest {
        /// The reason the subschema call failed.
        reason: String,
    },
}

impl DelegationError {
    pub(crate) fn invariant(path: &Path, reason: impl Into<String>) -> Self {
        DelegationError::TransformInvariantViolation {
            path: path.clone(),
            reason: reason.into(),
        }
    }

    pub(crate) fn from_extractor(path: &Path, error: BoxError) -> Self {
        DelegationError::TransformInvariantViolation {
            path: path.clone(),
            reason: error.to_string(),
        }
    }

    pub(crate) fn subschema(error: BoxError) -> Self {
        DelegationError::SubschemaRequest {
            reason: error.to_string(),
        }
    }

    /// The `extensions.code` used when this error is reported as a GraphQL error.
    pub fn extension_code(&self) -> &'static str {
        match self {
            DelegationError::PathNotFound { .. } => "DELEGATION_PATH_NOT_FOUND",
            DelegationError::TransformInvariantViolation { .. } => {
                "DELEGATION_TRANSFORM_INVARIANT_VIOLATION"
            }
            DelegationError::InvalidDocument { .. } => "DELEGATION_INVALID_DOCUMENT",
            DelegationError::InvalidTransform { .. } => "DELEGATION_INVALID_TRANSFORM",
            DelegationError::SubschemaRequest { .. } => "SUBSCHEMA_REQUEST_ERROR",
        }
    }

    /// Convert the delegation error to a GraphQL error located at `path` in the caller's response.
    pub fn to_graphql_error(&self, path: Option<Path>) -> graphql::Error {
        let mut value: Value = serde_json_bytes::to_value(self).unwrap_or_default();
        let mut extensions = value.as_object_mut().map(std::mem::take).unwrap_or_default();
        if let Some(Value::Array(_)) = extensions.get("path") {
            // keep the response path as the only path of the error
            let faulty = extensions.remove("path").unwrap_or_default();
            extensions.insert("transformPath", faulty);
        }
        extensions.insert("code", self.extension_code().into());

        graphql::Error::builder()
            .message(self.to_string())
            .and_path(path)
            .extensions(extensions)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn display_comes_from_doc_comments() {
        let error = DelegationError::PathNotFound {
            path: Path::from_slice(&["user", "address"]),
        };
        assert_eq!(
            error.to_string(),
            "path '/user/address' does not resolve to a field selection in the delegated document"
        );
    }

    #[test]
    fn converts_to_graphql_error() {
        let error = DelegationError::TransformInvariantViolation {
            path: Path::from_slice(&["userById"]),
            reason: "missing key 'address'".to_string(),
        }
        .to_graphql_error(Some(Path::from_slice(&["addressByUser"])));

        assert_eq!(
            error.message,
            "transform invariant violated at '/userById': missing key 'address'"
        );
        assert_eq!(error.path, Some(Path::from_slice(&["addressByUser"])));
        assert_eq!(
            error.extension_code().as_deref(),
            Some("DELEGATION_TRANSFORM_INVARIANT_VIOLATION")
        );
        assert_eq!(error.extensions.get("transformPath"), Some(&json!(["userById"])));
        assert_eq!(
            error.extensions.get("reason"),
            Some(&json!("missing key 'address'"))
        );
    }
}
