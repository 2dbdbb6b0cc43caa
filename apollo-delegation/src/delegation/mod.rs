//! Delegation of a root field to a subschema.

use std::fmt::Display;
use std::future::Future;
use std::task::Poll;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::ast::Selection;
use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use tower::BoxError;
use tower::Service;
use tower::ServiceExt;
use tower::util::BoxCloneService;
use tracing::Instrument;

use crate::error::DelegationError;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::pipeline::Pipeline;
use crate::selection_set::operation_mut;
use crate::transforms::Transform;

/// The kind of operation a delegated root field belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
    Subscription,
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.default_type_name())
    }
}

impl OperationKind {
    pub const fn default_type_name(&self) -> &'static str {
        match self {
            OperationKind::Query => "Query",
            OperationKind::Mutation => "Mutation",
            OperationKind::Subscription => "Subscription",
        }
    }

    const fn keyword(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }
}

impl From<OperationKind> for ast::OperationType {
    fn from(value: OperationKind) -> Self {
        match value {
            OperationKind::Query => ast::OperationType::Query,
            OperationKind::Mutation => ast::OperationType::Mutation,
            OperationKind::Subscription => ast::OperationType::Subscription,
        }
    }
}

impl From<ast::OperationType> for OperationKind {
    fn from(value: ast::OperationType) -> Self {
        match value {
            ast::OperationType::Query => OperationKind::Query,
            ast::OperationType::Mutation => OperationKind::Mutation,
            ast::OperationType::Subscription => OperationKind::Subscription,
        }
    }
}

/// What the subschema receives: the transformed document and the caller's variables.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct SubschemaRequest {
    pub document: ast::Document,
    pub operation_kind: OperationKind,
    pub field_name: Name,
    pub variables: Object,
    pub context: Object,
}

/// The subschema a [`Delegator`] sends its documents to.
pub type SubschemaService = BoxCloneService<SubschemaRequest, graphql::Response, BoxError>;

/// A root field to resolve on a subschema, with the transforms to apply around the call.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct DelegationRequest {
    pub operation_kind: OperationKind,
    /// The root field of the subschema.
    pub field_name: Name,
    /// The key the caller expects the result under.
    pub response_key: Name,
    pub arguments: Vec<Node<ast::Argument>>,
    pub variable_definitions: Vec<Node<ast::VariableDefinition>>,
    pub selection_set: Vec<Selection>,
    pub variables: Object,
    pub context: Object,
    pub pipeline: Pipeline,
}

#[buildstructor::buildstructor]
impl DelegationRequest {
    /// Returns a builder for a [`DelegationRequest`].
    ///
    /// `field_name` is required. `response_key` defaults to `field_name`, and `operation_kind`
    /// to [`OperationKind::Query`].
    #[builder(visibility = "pub")]
    #[allow(clippy::too_many_arguments)]
    fn new(
        operation_kind: Option<OperationKind>,
        field_name: Name,
        response_key: Option<Name>,
        arguments: Vec<Node<ast::Argument>>,
        variable_definitions: Vec<Node<ast::VariableDefinition>>,
        selection_set: Vec<Selection>,
        variables: JsonMap<ByteString, Value>,
        context: Option<Object>,
        transforms: Vec<Transform>,
    ) -> Self {
        Self {
            operation_kind: operation_kind.unwrap_or_default(),
            response_key: response_key.unwrap_or_else(|| field_name.clone()),
            field_name,
            arguments,
            variable_definitions,
            selection_set,
            variables,
            context: context.unwrap_or_default(),
            pipeline: transforms.into_iter().collect(),
        }
    }

    /// The document sent before transforms:
    /// `<kind> ($variables) { <field_name>(<arguments>) { <selection_set> } }`.
    pub fn document(&self) -> Result<ast::Document, DelegationError> {
        let skeleton = format!("{} {{ __typename }}", self.operation_kind.keyword());
        let mut document = ast::Document::parse(skeleton, "delegation.graphql").map_err(|errors| {
            DelegationError::InvalidDocument {
                reason: errors.errors.to_string(),
            }
        })?;

        let operation = operation_mut(&mut document)?.make_mut();
        operation.variables = self.variable_definitions.clone();
        operation.selection_set = vec![Selection::Field(Node::new(ast::Field {
            alias: None,
            name: self.field_name.clone(),
            arguments: self.arguments.clone(),
            directives: Default::default(),
            selection_set: self.selection_set.clone(),
        }))];
        Ok(document)
    }
}

/// Resolves [`DelegationRequest`]s against a subschema.
///
/// Cloning a delegator clones the subschema handle, every clone can run delegations
/// concurrently.
#[derive(Clone)]
pub struct Delegator {
    subschema: SubschemaService,
}

impl std::fmt::Debug for Delegator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delegator").finish_non_exhaustive()
    }
}

impl Delegator {
    pub fn new<S>(subschema: S) -> Self
    where
        S: Service<SubschemaRequest, Response = graphql::Response, Error = BoxError>
            + Clone
            + Send
            + 'static,
        S::Future: Send + 'static,
    {
        Self {
            subschema: BoxCloneService::new(subschema),
        }
    }

    /// Delegate `request` to the subschema.
    ///
    /// The returned future owns a handle on the subschema, dropping it cancels the call.
    pub fn delegate(
        &self,
        request: DelegationRequest,
    ) -> impl Future<Output = Result<graphql::Response, DelegationError>> + Send + use<> {
        self.clone().oneshot(request)
    }
}

impl Service<DelegationRequest> for Delegator {
    type Response = graphql::Response;
    type Error = DelegationError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.subschema
            .poll_ready(cx)
            .map_err(DelegationError::subschema)
    }

    fn call(&mut self, request: DelegationRequest) -> Self::Future {
        // the ready service goes with the call, a fresh clone takes its place
        let clone = self.subschema.clone();
        let subschema = std::mem::replace(&mut self.subschema, clone);

        let span = tracing::debug_span!(
            "delegate",
            "delegation.field_name" = %request.field_name,
            "delegation.response_key" = %request.response_key,
            "delegation.transforms" = request.pipeline.len(),
        );
        Box::pin(delegate(subschema, request).instrument(span))
    }
}

async fn delegate(
    mut subschema: SubschemaService,
    request: DelegationRequest,
) -> Result<graphql::Response, DelegationError> {
    let document = request.document()?;
    let document = request.pipeline.transform_request(&document)?;
    tracing::debug!(document = %document, "sending delegated document");

    let DelegationRequest {
        operation_kind,
        field_name,
        response_key,
        variables,
        context,
        pipeline,
        ..
    } = request;

    let response = subschema
        .call(SubschemaRequest {
            document,
            operation_kind,
            field_name: field_name.clone(),
            variables,
            context,
        })
        .await
        .map_err(DelegationError::subschema)?;

    let response = pipeline.transform_result(response)?;
    Ok(reroot(response, &field_name, &response_key))
}

/// Move the subschema's root field to the caller's response key, in data and error paths.
fn reroot(
    mut response: graphql::Response,
    field_name: &Name,
    response_key: &Name,
) -> graphql::Response {
    if field_name == response_key {
        return response;
    }
    if let Some(Value::Object(data)) = response.data.as_mut() {
        if let Some(value) = data.remove(field_name.as_str()) {
            data.insert(response_key.as_str(), value);
        }
    }
    response.map_error_paths(|mut path| {
        if let Some(PathElement::Key(head)) = path.0.first_mut() {
            if head.as_str() == field_name.as_str() {
                *head = response_key.to_string();
            }
        }
        path
    })
}
