use std::sync::Arc;
use std::sync::Mutex;

use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::ast::Selection;
use apollo_compiler::name;
use apollo_delegation::Configuration;
use apollo_delegation::DelegationError;
use apollo_delegation::DelegationRequest;
use apollo_delegation::Delegator;
use apollo_delegation::ExtractField;
use apollo_delegation::Pipeline;
use apollo_delegation::SubschemaRequest;
use apollo_delegation::Transform;
use apollo_delegation::TransformQuery;
use apollo_delegation::WrapQuery;
use apollo_delegation::graphql;
use apollo_delegation::json_ext::Path;
use apollo_delegation::json_ext::Value;
use apollo_delegation::selection_set::operation;
use serde_json_bytes::json;
use tower::BoxError;

const GATEWAY_CONFIG: &str = r#"
delegations:
  addressByUser:
    field_name: userById
    transforms:
      - wrap_query:
          path: [userById]
          fields: [address]
"#;

fn parse(source: &str) -> ast::Document {
    ast::Document::parse(source, "query.graphql").unwrap()
}

fn printed(source: &str) -> String {
    parse(source).to_string()
}

fn root_fields(document: &ast::Document) -> Vec<Node<ast::Field>> {
    operation(document)
        .unwrap()
        .selection_set
        .iter()
        .filter_map(|selection| match selection {
            Selection::Field(field) => Some(field.clone()),
            _ => None,
        })
        .collect()
}

/// A subschema expecting `expected_document` and answering with `response`.
fn subschema(
    expected_document: &str,
    response: graphql::Response,
) -> (Delegator, Arc<Mutex<usize>>) {
    let expected = printed(expected_document);
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let delegator = Delegator::new(tower::service_fn(move |request: SubschemaRequest| {
        *counter.lock().unwrap() += 1;
        let result = if request.document.to_string() == expected {
            Ok(response.clone())
        } else {
            Err(BoxError::from(format!(
                "unexpected document: {}",
                request.document
            )))
        };
        async move { result }
    }));
    (delegator, calls)
}

#[test_log::test(tokio::test)]
async fn address_by_user_is_delegated_to_user_by_id() {
    let configuration: Configuration = GATEWAY_CONFIG.parse().unwrap();
    let (delegator, calls) = subschema(
        r#"query { userById(id: "u1") { address { streetAddress zip } } }"#,
        graphql::Response::builder()
            .data(json!({
                "userById": {"address": {"streetAddress": "Windy Shore 21 A 7", "zip": "12345"}}
            }))
            .build(),
    );

    let upstream = parse(r#"{ addressByUser(id: "u1") { streetAddress zip } }"#);
    let upstream_operation = operation(&upstream).unwrap();
    let request = configuration
        .request_for(upstream_operation, &root_fields(&upstream)[0])
        .unwrap();
    let response = delegator.delegate(request).await.unwrap();

    assert_eq!(
        response.data,
        Some(json!({
            "addressByUser": {"streetAddress": "Windy Shore 21 A 7", "zip": "12345"}
        }))
    );
    assert!(response.errors.is_empty());
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[test_log::test(tokio::test)]
async fn subschema_errors_are_rerooted_and_keep_sibling_data() {
    let configuration: Configuration = GATEWAY_CONFIG.parse().unwrap();
    let (delegator, _) = subschema(
        r#"query { userById(id: "u1") { address { streetAddress zip } } }"#,
        graphql::Response::builder()
            .data(json!({
                "userById": {"address": {"streetAddress": "Windy Shore 21 A 7", "zip": null}}
            }))
            .error(
                graphql::Error::builder()
                    .message("zip code service unavailable")
                    .path(Path::from_slice(&["userById", "address", "zip"]))
                    .extension_code("UNAVAILABLE")
                    .build(),
            )
            .build(),
    );

    let upstream = parse(r#"{ addressByUser(id: "u1") { streetAddress zip } }"#);
    let upstream_operation = operation(&upstream).unwrap();
    let request = configuration
        .request_for(upstream_operation, &root_fields(&upstream)[0])
        .unwrap();
    let response = delegator.delegate(request).await.unwrap();

    assert_eq!(
        response.data,
        Some(json!({"addressByUser": {"streetAddress": "Windy Shore 21 A 7", "zip": null}}))
    );
    let error = &response.errors[0];
    assert_eq!(error.message, "zip code service unavailable");
    assert_eq!(error.path, Some(Path::from_slice(&["addressByUser", "zip"])));
    assert_eq!(error.extension_code().as_deref(), Some("UNAVAILABLE"));
}

#[test_log::test(tokio::test)]
async fn variables_used_by_the_delegated_field_are_declared_downstream() {
    let configuration: Configuration = GATEWAY_CONFIG.parse().unwrap();
    let (delegator, calls) = subschema(
        "query($id: ID!) { userById(id: $id) { address { zip } } }",
        graphql::Response::builder()
            .data(json!({"userById": {"address": {"zip": "12345"}}}))
            .build(),
    );

    let upstream = parse("query($id: ID!, $unused: Int) { addressByUser(id: $id) { zip } }");
    let upstream_operation = operation(&upstream).unwrap();
    let mut request = configuration
        .request_for(upstream_operation, &root_fields(&upstream)[0])
        .unwrap();
    request.variables.insert("id", json!("u1"));
    let response = delegator.delegate(request).await.unwrap();

    assert_eq!(response.data, Some(json!({"addressByUser": {"zip": "12345"}})));
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn pipelines_of_zero_one_and_two_transforms() {
    let document = parse("{ user { profile { name } } }");
    let wrap = Transform::from(
        WrapQuery::wrap_fields(Path::from_slice(&["user"]), &["account"]).unwrap(),
    );
    let extract = Transform::from(
        ExtractField::new(
            Path::from_slice(&["user", "account", "profile"]),
            Path::from_slice(&["user", "account"]),
        )
        .unwrap(),
    );

    let cases = [
        (
            Pipeline::default(),
            "{ user { profile { name } } }",
            json!({"user": {"profile": {"name": "Ada"}}}),
        ),
        (
            Pipeline::new([wrap.clone()]),
            "{ user { account { profile { name } } } }",
            json!({"user": {"account": {"profile": {"name": "Ada"}}}}),
        ),
        (
            Pipeline::new([wrap, extract]),
            "{ user { account { name } } }",
            json!({"user": {"account": {"name": "Ada"}}}),
        ),
    ];

    for (pipeline, downstream_document, downstream_data) in cases {
        let transformed = pipeline.transform_request(&document).unwrap();
        assert_eq!(transformed.to_string(), printed(downstream_document));

        let response = pipeline
            .transform_result(graphql::Response::builder().data(downstream_data).build())
            .unwrap();
        assert_eq!(
            response.data,
            Some(json!({"user": {"profile": {"name": "Ada"}}})),
            "pipeline of {} transforms",
            pipeline.len()
        );
    }
}

#[test]
fn extract_field_nests_the_parent_value() {
    let extract = Pipeline::new([ExtractField::new(
        Path::from_slice(&["a", "b"]),
        Path::from_slice(&["a"]),
    )
    .unwrap()]);

    let response = extract
        .transform_result(graphql::Response::builder().data(json!({"a": 42})).build())
        .unwrap();
    assert_eq!(response.data, Some(json!({"a": {"b": 42}})));
}

#[test]
fn transform_query_rewrites_requests_results_and_errors() {
    let transform = TransformQuery::new(
        Path::from_slice(&["x"]),
        |mut selections: Vec<Selection>| {
            selections.retain(|selection| match selection {
                Selection::Field(field) => field.name.as_str() != "secret",
                _ => true,
            });
            selections
        },
        |value: Value| Ok(value),
    )
    .with_error_path_transformer(|rest| rest.into_iter().skip(1).collect());
    let pipeline = Pipeline::new([transform]);

    let transformed = pipeline
        .transform_request(&parse("{ x { y { z } secret } }"))
        .unwrap();
    assert_eq!(transformed.to_string(), printed("{ x { y { z } } }"));

    let response = pipeline
        .transform_result(
            graphql::Response::builder()
                .data(json!({"x": {"y": null}}))
                .error(
                    graphql::Error::builder()
                        .message("z failed")
                        .path(Path::from_slice(&["x", "y", "z"]))
                        .build(),
                )
                .build(),
        )
        .unwrap();
    assert_eq!(response.errors[0].path, Some(Path::from_slice(&["x", "z"])));
}

#[tokio::test]
async fn shared_transforms_serve_concurrent_delegations() {
    let wrap = Transform::from(
        WrapQuery::wrap_fields(Path::from_slice(&["userById"]), &["address"]).unwrap(),
    );
    let delegator = Delegator::new(tower::service_fn(|request: SubschemaRequest| async move {
        let id = request.variables.get("id").cloned().unwrap_or_default();
        Ok::<_, BoxError>(
            graphql::Response::builder()
                .data(json!({"userById": {"address": {"zip": id}}}))
                .build(),
        )
    }));
    let selection_set = root_fields(&parse("{ f { zip } }"))[0].selection_set.clone();

    let tasks: Vec<_> = (0..16)
        .map(|index| {
            let request = DelegationRequest::builder()
                .field_name(name!("userById"))
                .response_key(name!("addressByUser"))
                .selection_set(selection_set.clone())
                .variable("id", format!("u{index}"))
                .transform(wrap.clone())
                .build();
            tokio::spawn(delegator.delegate(request))
        })
        .collect();

    for (index, task) in tasks.into_iter().enumerate() {
        let response = task.await.unwrap().unwrap();
        assert_eq!(
            response.data,
            Some(json!({"addressByUser": {"zip": format!("u{index}")}}))
        );
    }
}

#[tokio::test]
async fn misconfigured_path_never_reaches_the_subschema() {
    let (delegator, calls) = subschema("{ unused }", graphql::Response::default());
    let request = DelegationRequest::builder()
        .field_name(name!("userById"))
        .transform(
            ExtractField::new(
                Path::from_slice(&["userById", "missing"]),
                Path::from_slice(&["userById"]),
            )
            .unwrap(),
        )
        .build();

    let error = delegator.delegate(request).await.unwrap_err();
    assert_eq!(
        error,
        DelegationError::PathNotFound {
            path: Path::from_slice(&["userById", "missing"])
        }
    );
    assert_eq!(*calls.lock().unwrap(), 0);

    let graphql_error = error.to_graphql_error(Some(Path::from_slice(&["addressByUser"])));
    assert_eq!(
        graphql_error.extension_code().as_deref(),
        Some("DELEGATION_PATH_NOT_FOUND")
    );
}
