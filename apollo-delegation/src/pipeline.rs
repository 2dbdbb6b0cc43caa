//! Ordered composition of transforms.

use apollo_compiler::ast;

use crate::error::DelegationError;
use crate::graphql::Response;
use crate::transforms::Transform;

/// An ordered list of transforms.
///
/// Requests go through the transforms first to last, results last to first, so that every
/// result rewrite sees the shape its own request rewrite produced. The empty pipeline leaves
/// both unchanged.
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    transforms: Vec<Transform>,
}

impl Pipeline {
    pub fn new(transforms: impl IntoIterator<Item = impl Into<Transform>>) -> Self {
        Self {
            transforms: transforms.into_iter().map(Into::into).collect(),
        }
    }

    pub fn push(&mut self, transform: impl Into<Transform>) {
        self.transforms.push(transform.into())
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn transforms(&self) -> &[Transform] {
        &self.transforms
    }

    /// Apply every request rewrite, first to last. The input document is left untouched.
    #[tracing::instrument(skip_all, level = "debug", fields(transforms = self.transforms.len()))]
    pub fn transform_request(
        &self,
        document: &ast::Document,
    ) -> Result<ast::Document, DelegationError> {
        let mut transformed = document.clone();
        for transform in &self.transforms {
            transformed = transform.transform_request(&transformed).inspect_err(|error| {
                tracing::debug!(path = %transform.path(), %error, "request transform failed")
            })?;
        }
        Ok(transformed)
    }

    /// Apply every result rewrite, last to first.
    #[tracing::instrument(skip_all, level = "debug", fields(transforms = self.transforms.len()))]
    pub fn transform_result(&self, response: Response) -> Result<Response, DelegationError> {
        self.transforms
            .iter()
            .rev()
            .try_fold(response, |response, transform| {
                transform.transform_result(response).inspect_err(|error| {
                    tracing::debug!(path = %transform.path(), %error, "result transform failed")
                })
            })
    }
}

impl FromIterator<Transform> for Pipeline {
    fn from_iter<I: IntoIterator<Item = Transform>>(iter: I) -> Self {
        Self {
            transforms: iter.into_iter().collect(),
        }
    }
}
