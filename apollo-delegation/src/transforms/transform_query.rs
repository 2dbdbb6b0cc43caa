use std::sync::Arc;

use apollo_compiler::ast;
use apollo_compiler::ast::Selection;
use derivative::Derivative;
use tower::BoxError;

use super::ResultTransformer;
use crate::error::DelegationError;
use crate::graphql::Response;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::selection_set::replace_selection_set_at_path;
use crate::selection_set::selection_set_at_path;

/// Rewrites the selection set found at a path.
pub type QueryTransformer = Arc<dyn Fn(Vec<Selection>) -> Vec<Selection> + Send + Sync>;

/// Rewrites the part of an error path below the transformed path.
pub type ErrorPathTransformer = Arc<dyn Fn(Path) -> Path + Send + Sync>;

/// General purpose transform of the selection set at `path`, with user supplied rewrites of the
/// request, the result value and the error paths.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct TransformQuery {
    path: Path,
    #[derivative(Debug = "ignore")]
    query_transformer: QueryTransformer,
    #[derivative(Debug = "ignore")]
    result_transformer: ResultTransformer,
    #[derivative(Debug = "ignore")]
    error_path_transformer: ErrorPathTransformer,
}

impl TransformQuery {
    /// Error paths are kept as they are, see [`TransformQuery::with_error_path_transformer`].
    pub fn new<Q, R>(path: impl Into<Path>, query_transformer: Q, result_transformer: R) -> Self
    where
        Q: Fn(Vec<Selection>) -> Vec<Selection> + Send + Sync + 'static,
        R: Fn(Value) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self {
            path: path.into(),
            query_transformer: Arc::new(query_transformer),
            result_transformer: Arc::new(result_transformer),
            error_path_transformer: Arc::new(|path: Path| path),
        }
    }

    /// Error paths under `path` become `path ++ transformer(rest)`, where `rest` is the part
    /// below `path`.
    pub fn with_error_path_transformer<F>(mut self, transformer: F) -> Self
    where
        F: Fn(Path) -> Path + Send + Sync + 'static,
    {
        self.error_path_transformer = Arc::new(transformer);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn transform_request(
        &self,
        document: &ast::Document,
    ) -> Result<ast::Document, DelegationError> {
        let selection_set = selection_set_at_path(document, &self.path)?.to_vec();
        replace_selection_set_at_path(document, &self.path, (self.query_transformer)(selection_set))
    }

    pub(crate) fn transform_result(
        &self,
        mut response: Response,
    ) -> Result<Response, DelegationError> {
        if let Some(data) = response.data.as_mut() {
            data.select_values_and_paths_mut(&self.path, |path, value| {
                *value = (self.result_transformer)(std::mem::take(value))
                    .map_err(|error| DelegationError::from_extractor(path, error))?;
                Ok(())
            })?;
        }
        Ok(response.map_error_paths(|error_path| match error_path.match_prefix(&self.path) {
            Some((matched, rest)) => matched.join((self.error_path_transformer)(rest)),
            None => error_path,
        }))
    }
}
