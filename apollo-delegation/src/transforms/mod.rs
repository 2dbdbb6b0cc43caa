//! Request and result rewrites applied around a delegated call.
//!
//! Each transform rewrites the outgoing document so that the subschema can answer it, and
//! rewrites the response so that it has the shape the caller asked for.

use std::sync::Arc;

use apollo_compiler::ast;
use tower::BoxError;

use crate::error::DelegationError;
use crate::graphql::Response;
use crate::json_ext::Path;
use crate::json_ext::Value;

mod extract_field;
mod transform_query;
mod wrap_query;

pub use extract_field::ExtractField;
pub use transform_query::ErrorPathTransformer;
pub use transform_query::QueryTransformer;
pub use transform_query::TransformQuery;
pub use wrap_query::SelectionWrapper;
pub use wrap_query::WrapQuery;

/// Maps a result value. Failures abort the delegation with
/// [`DelegationError::TransformInvariantViolation`].
pub type ResultTransformer = Arc<dyn Fn(Value) -> Result<Value, BoxError> + Send + Sync>;

/// A request and result rewrite.
///
/// Transforms are immutable once built: they can be shared between pipelines and applied to
/// any number of concurrent delegations.
#[derive(Clone, Debug)]
pub enum Transform {
    WrapQuery(WrapQuery),
    ExtractField(ExtractField),
    TransformQuery(TransformQuery),
}

impl Transform {
    /// The document path this transform operates on.
    pub fn path(&self) -> &Path {
        match self {
            Transform::WrapQuery(transform) => transform.path(),
            Transform::ExtractField(transform) => transform.from(),
            Transform::TransformQuery(transform) => transform.path(),
        }
    }

    pub fn transform_request(
        &self,
        document: &ast::Document,
    ) -> Result<ast::Document, DelegationError> {
        match self {
            Transform::WrapQuery(transform) => transform.transform_request(document),
            Transform::ExtractField(transform) => transform.transform_request(document),
            Transform::TransformQuery(transform) => transform.transform_request(document),
        }
    }

    pub fn transform_result(&self, response: Response) -> Result<Response, DelegationError> {
        match self {
            Transform::WrapQuery(transform) => transform.transform_result(response),
            Transform::ExtractField(transform) => transform.transform_result(response),
            Transform::TransformQuery(transform) => transform.transform_result(response),
        }
    }
}

impl From<WrapQuery> for Transform {
    fn from(transform: WrapQuery) -> Self {
        Transform::WrapQuery(transform)
    }
}

impl From<ExtractField> for Transform {
    fn from(transform: ExtractField) -> Self {
        Transform::ExtractField(transform)
    }
}

impl From<TransformQuery> for Transform {
    fn from(transform: TransformQuery) -> Self {
        Transform::TransformQuery(transform)
    }
}
