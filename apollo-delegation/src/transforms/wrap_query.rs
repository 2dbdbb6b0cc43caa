use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::ast::Selection;
use derivative::Derivative;
use displaydoc::Display;
use thiserror::Error;
use tower::BoxError;

use super::ResultTransformer;
use crate::error::DelegationError;
use crate::graphql::Response;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::selection_set::field_selection;
use crate::selection_set::replace_selection_set_at_path;
use crate::selection_set::response_key;
use crate::selection_set::selection_set_at_path;
use crate::selection_set::value_kind;

/// Builds the selection that wraps the delegated subtree.
pub type SelectionWrapper = Arc<dyn Fn(Vec<Selection>) -> Selection + Send + Sync>;

const WRAPPED_MARKER: &str = "__delegation_wrapped";

/// Wraps the selection set at `path` in synthetic fields, for a subschema that exposes the
/// requested data one or more levels deeper than the caller asks for it.
///
/// The caller's `userById { streetAddress zip }` becomes `userById { address { streetAddress
/// zip } }` downstream, and the extractor turns the returned `{ address: { .. } }` back into the
/// inner value.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct WrapQuery {
    path: Path,
    /// Response keys of the synthetic fields, outermost first.
    wrapping_path: Path,
    #[derivative(Debug = "ignore")]
    wrapper: SelectionWrapper,
    #[derivative(Debug = "ignore")]
    extractor: ResultTransformer,
}

impl WrapQuery {
    /// Wrap the selection set at `path` with `wrapper`, and map the value found at `path` in
    /// results with `extractor`.
    ///
    /// The extractor receives `null` when the subschema returned `null` (or nothing) at `path`
    /// and must handle it. Errors returned by the extractor fail the delegation as
    /// [`DelegationError::TransformInvariantViolation`].
    pub fn new<W, E>(path: impl Into<Path>, wrapper: W, extractor: E) -> Self
    where
        W: Fn(Vec<Selection>) -> Selection + Send + Sync + 'static,
        E: Fn(Value) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        let wrapper: SelectionWrapper = Arc::new(wrapper);
        let wrapping_path = probe_wrapping_path(&wrapper);
        Self {
            path: path.into(),
            wrapping_path,
            wrapper,
            extractor: Arc::new(extractor),
        }
    }

    /// Wrap the selection set at `path` in the chain of `fields`, outermost first.
    ///
    /// The extractor digs through the same chain: `null` at any level yields `null`, lists are
    /// mapped item by item, and a missing wrapping key is an invariant violation.
    pub fn wrap_fields<S: AsRef<str>>(
        path: impl Into<Path>,
        fields: &[S],
    ) -> Result<Self, DelegationError> {
        let names = fields
            .iter()
            .map(|field| {
                Name::new(field.as_ref()).map_err(|_| DelegationError::InvalidTransform {
                    reason: format!("'{}' is not a valid field name", field.as_ref()),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let Some((outermost, inner)) = names.split_first() else {
            return Err(DelegationError::InvalidTransform {
                reason: "wrapping requires at least one field".to_string(),
            });
        };

        let outermost = outermost.clone();
        let inner = inner.to_vec();
        let wrapping_path: Path = names
            .iter()
            .map(|name| PathElement::Key(name.to_string()))
            .collect();
        let keys = wrapping_path.clone();

        Ok(Self {
            path: path.into(),
            wrapping_path,
            wrapper: Arc::new(move |subtree: Vec<Selection>| {
                let selection_set = inner
                    .iter()
                    .rev()
                    .fold(subtree, |selection_set, name| vec![wrap(name, selection_set)]);
                wrap(&outermost, selection_set)
            }),
            extractor: Arc::new(move |value: Value| extract(value, &keys.0)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn wrapping_path(&self) -> &Path {
        &self.wrapping_path
    }

    pub(crate) fn transform_request(
        &self,
        document: &ast::Document,
    ) -> Result<ast::Document, DelegationError> {
        let subtree = selection_set_at_path(document, &self.path)?.to_vec();
        let wrapped = (self.wrapper)(subtree);
        replace_selection_set_at_path(document, &self.path, vec![wrapped])
    }

    pub(crate) fn transform_result(
        &self,
        mut response: Response,
    ) -> Result<Response, DelegationError> {
        if let Some(data) = response.data.as_mut() {
            data.select_values_and_paths_mut(&self.path, |path, value| {
                let wrapped = std::mem::take(value);
                *value = (self.extractor)(wrapped)
                    .map_err(|error| DelegationError::from_extractor(path, error))?;
                Ok(())
            })?;
        }
        Ok(response.map_error_paths(|path| self.unwrap_error_path(path)))
    }

    /// `[...path, ...wrapping, ...rest]` becomes `[...path, ...rest]`. List indexes along
    /// `path` are kept where the error path has them.
    fn unwrap_error_path(&self, error_path: Path) -> Path {
        let Some((matched, below)) = error_path.match_prefix(&self.path) else {
            return error_path;
        };
        let indexes = below
            .iter()
            .take_while(|element| matches!(element, PathElement::Index(_)))
            .count();
        let (leading_indexes, rest) = below.0.split_at(indexes);
        if rest.is_empty() {
            return error_path;
        }

        match rest.strip_prefix(self.wrapping_path.0.as_slice()) {
            Some(rest) => matched
                .iter()
                .chain(leading_indexes)
                .chain(rest)
                .cloned()
                .collect(),
            None => {
                tracing::debug!(
                    path = %error_path,
                    wrapping_path = %self.wrapping_path,
                    "error path does not go through the wrapping fields, leaving it unmapped"
                );
                error_path
            }
        }
    }
}

fn wrap(name: &Name, selection_set: Vec<Selection>) -> Selection {
    Selection::Field(Node::new(ast::Field {
        alias: None,
        name: name.clone(),
        arguments: Vec::new(),
        directives: Default::default(),
        selection_set,
    }))
}

/// Find which synthetic fields a wrapper adds by wrapping a marker selection and looking for it.
fn probe_wrapping_path(wrapper: &SelectionWrapper) -> Path {
    let marker = match field_selection(WRAPPED_MARKER, Vec::new()) {
        Ok(marker) => marker,
        Err(_) => return Path::empty(),
    };
    let wrapped = wrapper(vec![marker]);

    let mut path = Path::empty();
    if find_marker(std::slice::from_ref(&wrapped), &mut path) {
        return path;
    }
    // the wrapper dropped the subtree, only the outermost field is known to be synthetic
    match &wrapped {
        Selection::Field(field) => Path::from_slice(&[response_key(field)]),
        _ => Path::empty(),
    }
}

fn find_marker(selections: &[Selection], path: &mut Path) -> bool {
    for selection in selections {
        match selection {
            Selection::Field(field) if field.name.as_str() == WRAPPED_MARKER => return true,
            Selection::Field(field) => {
                path.push(response_key(field));
                if find_marker(&field.selection_set, path) {
                    return true;
                }
                path.0.pop();
            }
            Selection::InlineFragment(fragment) => {
                if find_marker(&fragment.selection_set, path) {
                    return true;
                }
            }
            Selection::FragmentSpread(_) => {}
        }
    }
    false
}

#[derive(Debug, Display, Error)]
pub(crate) enum ExtractionError {
    /// expected the wrapping field '{field}' in the subschema result
    MissingField { field: String },

    /// expected an object holding the wrapping field '{field}', found {found}
    NotAnObject { field: String, found: &'static str },
}

fn extract(value: Value, keys: &[PathElement]) -> Result<Value, BoxError> {
    let Some((head, rest)) = keys.split_first() else {
        return Ok(value);
    };
    let field = head.to_string();

    match value {
        Value::Null => Ok(Value::Null),
        Value::Array(items) => Ok(Value::Array(
            items
                .into_iter()
                .map(|item| extract(item, keys))
                .collect::<Result<_, _>>()?,
        )),
        Value::Object(mut object) => match object.remove(field.as_str()) {
            Some(inner) => extract(inner, rest),
            None => Err(ExtractionError::MissingField { field }.into()),
        },
        other => Err(ExtractionError::NotAnObject {
            field,
            found: value_kind(&other),
        }
        .into()),
    }
}
