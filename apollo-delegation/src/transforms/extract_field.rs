use apollo_compiler::ast;

use crate::error::DelegationError;
use crate::graphql::Response;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::selection_set::remove_selection_at_path;
use crate::selection_set::replace_selection_set_at_path;
use crate::selection_set::selection_set_at_path;
use crate::selection_set::splice_result_at_path;
use crate::selection_set::value_kind;

/// Moves the selection set found at `from` to `to`, for a subschema that returns at `to` what
/// the caller expects deeper, at `from`.
///
/// With `from = [a, b]` and `to = [a]`, the caller's `a { b { x } }` is sent as `a { x }`, and the
/// returned `{ a: v }` is handed back as `{ a: { b: v } }`.
///
/// `to` must not go through a list unless it is the parent of `from`. When the parent of `from`
/// is a list and `to` lies elsewhere, the single value returned at `to` is given to every item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractField {
    from: Path,
    to: Path,
}

impl ExtractField {
    /// `from` must end with a field key.
    pub fn new(from: impl Into<Path>, to: impl Into<Path>) -> Result<Self, DelegationError> {
        let from = from.into();
        if from.last_key().is_none() {
            return Err(DelegationError::InvalidTransform {
                reason: format!("cannot extract from '{from}', it does not end with a field"),
            });
        }
        Ok(Self { from, to: to.into() })
    }

    pub fn from(&self) -> &Path {
        &self.from
    }

    pub fn to(&self) -> &Path {
        &self.to
    }

    pub(crate) fn transform_request(
        &self,
        document: &ast::Document,
    ) -> Result<ast::Document, DelegationError> {
        let selection_set = selection_set_at_path(document, &self.from)?.to_vec();
        if self.from.starts_with(&self.to) {
            // the whole subtree at `to` is replaced, `from` goes with it
            return replace_selection_set_at_path(document, &self.to, selection_set);
        }
        let document = remove_selection_at_path(document, &self.from)?;
        replace_selection_set_at_path(&document, &self.to, selection_set)
    }

    pub(crate) fn transform_result(
        &self,
        mut response: Response,
    ) -> Result<Response, DelegationError> {
        if self.from != self.to {
            if let Some(data) = response.data.take() {
                response.data = Some(self.restore_data(data)?);
            }
        }
        Ok(response.map_error_paths(|path| self.restore_error_path(path)))
    }

    fn restore_data(&self, mut data: Value) -> Result<Value, DelegationError> {
        let (Some(parent), Some(key)) = (self.from.parent(), self.from.last_key()) else {
            return Ok(data);
        };

        if parent == self.to {
            data.select_values_and_paths_mut(&self.to, |_, value| {
                *value = nest(key, std::mem::take(value));
                Ok::<_, DelegationError>(())
            })?;
            return Ok(data);
        }

        match take_at_path(&mut data, &self.to)? {
            Some(value) => splice_result_at_path(data, &parent, nest(key, value)),
            None => Ok(data),
        }
    }

    /// Errors at or under `to` belong to the field at `from`.
    ///
    /// List indexes the error path carries along `to` are kept when `from` lies below `to`.
    /// Otherwise the value at `to` went to every item under `from`, and the restored path has
    /// no indexes.
    fn restore_error_path(&self, error_path: Path) -> Path {
        if self.from == self.to {
            return error_path;
        }
        let Some((matched, rest)) = error_path.match_prefix(&self.to) else {
            return error_path;
        };
        match self.from.strip_prefix(&self.to) {
            Some(below_to) => matched.join(below_to).join(rest),
            None => self.from.join(rest),
        }
    }
}

fn nest(key: &str, value: Value) -> Value {
    let mut object = Object::new();
    object.insert(key, value);
    Value::Object(object)
}

/// Remove and return the value at `path`, following its segments literally.
fn take_at_path(data: &mut Value, path: &Path) -> Result<Option<Value>, DelegationError> {
    let (Some(parent), Some(key)) = (path.parent(), path.last_key()) else {
        return Ok(Some(std::mem::take(data)));
    };

    let mut current = data;
    for element in parent.iter() {
        current = match (element, current) {
            (_, Value::Null) => return Ok(None),
            (PathElement::Key(segment), Value::Object(object)) => {
                match object.get_mut(segment.as_str()) {
                    Some(child) => child,
                    None => return Ok(None),
                }
            }
            (PathElement::Index(index), Value::Array(items)) => match items.get_mut(*index) {
                Some(item) => item,
                None => return Ok(None),
            },
            (PathElement::Key(_), Value::Array(_)) => {
                return Err(DelegationError::invariant(
                    path,
                    "cannot move an extracted field across a list",
                ));
            }
            (_, other) => {
                return Err(DelegationError::invariant(
                    path,
                    format!("expected an object, found {}", value_kind(other)),
                ));
            }
        };
    }

    match current {
        Value::Object(object) => Ok(object.remove(key)),
        Value::Null => Ok(None),
        other => Err(DelegationError::invariant(
            path,
            format!("expected an object, found {}", value_kind(other)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;
    use crate::graphql::Error;
    use crate::selection_set::tests::assert_document_eq;
    use crate::selection_set::tests::parse;

    fn extract(from: &[&str], to: &[&str]) -> ExtractField {
        ExtractField::new(Path::from_slice(from), Path::from_slice(to)).unwrap()
    }

    #[test]
    fn hoists_into_the_parent() {
        let document = parse("{ a { b { x y } c } }");
        let transformed = extract(&["a", "b"], &["a"])
            .transform_request(&document)
            .unwrap();
        assert_document_eq(&transformed, "{ a { x y } }");
    }

    #[test]
    fn nests_the_parent_value_back() {
        let response = Response::builder()
            .data(json!({"a": {"x": 1, "y": 2}, "sibling": true}))
            .build();
        let response = extract(&["a", "b"], &["a"])
            .transform_result(response)
            .unwrap();
        assert_eq!(
            response.data,
            Some(json!({"a": {"b": {"x": 1, "y": 2}}, "sibling": true}))
        );
    }

    #[test]
    fn nests_null_and_list_values_as_is() {
        let extract = extract(&["a", "b"], &["a"]);
        let response = Response::builder().data(json!({"a": null})).build();
        assert_eq!(
            extract.transform_result(response).unwrap().data,
            Some(json!({"a": {"b": null}}))
        );

        let response = Response::builder().data(json!({"a": [1, 2]})).build();
        assert_eq!(
            extract.transform_result(response).unwrap().data,
            Some(json!({"a": {"b": [1, 2]}}))
        );
    }

    #[test]
    fn moves_to_an_unrelated_location() {
        let document = parse("{ user { address { zip } name } account { id } }");
        let extract = extract(&["user", "address"], &["account"]);

        let transformed = extract.transform_request(&document).unwrap();
        assert_document_eq(&transformed, "{ user { name } account { zip } }");

        let response = Response::builder()
            .data(json!({"user": {"name": "Ada"}, "account": {"zip": "12345"}}))
            .build();
        let response = extract.transform_result(response).unwrap();
        assert_eq!(
            response.data,
            Some(json!({"user": {"name": "Ada", "address": {"zip": "12345"}}}))
        );
    }

    #[test]
    fn emptied_parent_keeps_a_typename() {
        let document = parse("{ user { address { zip } } account { id } }");
        let transformed = extract(&["user", "address"], &["account"])
            .transform_request(&document)
            .unwrap();
        assert_document_eq(&transformed, "{ user { __typename } account { zip } }");
    }

    #[test]
    fn identity_when_from_equals_to() {
        let document = parse("{ a { b { x } } }");
        let extract = extract(&["a", "b"], &["a", "b"]);
        assert_document_eq(
            &extract.transform_request(&document).unwrap(),
            "{ a { b { x } } }",
        );

        let response = Response::builder().data(json!({"a": {"b": {"x": 1}}})).build();
        assert_eq!(
            extract.transform_result(response.clone()).unwrap(),
            response
        );
    }

    #[test]
    fn unknown_from_path_fails() {
        let document = parse("{ a { c } }");
        assert_eq!(
            extract(&["a", "b"], &["a"])
                .transform_request(&document)
                .unwrap_err(),
            DelegationError::PathNotFound {
                path: Path::from_slice(&["a", "b"])
            }
        );
    }

    #[test]
    fn moving_across_a_list_is_an_invariant_violation() {
        let response = Response::builder()
            .data(json!({"accounts": [{"zip": "1"}]}))
            .build();
        let error = extract(&["user", "address"], &["accounts", "primary"])
            .transform_result(response)
            .unwrap_err();
        assert!(matches!(
            error,
            DelegationError::TransformInvariantViolation { .. }
        ));
    }

    #[test]
    fn error_paths_are_rerooted_under_from() {
        let error_path: Path = serde_json::from_str(r#"["a",0,"x"]"#).unwrap();
        let response = Response::builder()
            .data(json!({"a": null}))
            .error(Error::builder().message("x failed").path(error_path).build())
            .error(
                Error::builder()
                    .message("elsewhere")
                    .path(Path::from_slice(&["c"]))
                    .build(),
            )
            .build();
        let response = extract(&["a", "b"], &["a"])
            .transform_result(response)
            .unwrap();

        let expected: Path = serde_json::from_str(r#"["a","b",0,"x"]"#).unwrap();
        assert_eq!(response.errors[0].path, Some(expected));
        assert_eq!(response.errors[1].path, Some(Path::from_slice(&["c"])));
    }

    #[test]
    fn every_item_of_a_list_parent_receives_the_moved_value() {
        let extract = extract(&["users", "address"], &["account"]);

        let document = parse("{ users { name address { zip } } account { id } }");
        assert_document_eq(
            &extract.transform_request(&document).unwrap(),
            "{ users { name } account { zip } }",
        );

        let response = Response::builder()
            .data(json!({
                "users": [{"name": "a"}, null, {"name": "b"}],
                "account": {"zip": "1"}
            }))
            .error(
                Error::builder()
                    .message("zip failed")
                    .path(Path::from_slice(&["account", "zip"]))
                    .build(),
            )
            .build();
        let response = extract.transform_result(response).unwrap();
        assert_eq!(
            response.data,
            Some(json!({"users": [
                {"name": "a", "address": {"zip": "1"}},
                null,
                {"name": "b", "address": {"zip": "1"}}
            ]}))
        );
        assert_eq!(
            response.errors[0].path,
            Some(Path::from_slice(&["users", "address", "zip"]))
        );
    }

    #[test]
    fn error_paths_under_a_list_keep_their_indexes() {
        let extract = extract(&["users", "profile", "details"], &["users", "profile"]);
        let cases = [
            (r#"["users",2,"profile","bio"]"#, r#"["users",2,"profile","details","bio"]"#),
            (r#"["users",0,"profile"]"#, r#"["users",0,"profile","details"]"#),
            (r#"["users",0,"name"]"#, r#"["users",0,"name"]"#),
        ];

        for (error_path, expected) in cases {
            let error_path: Path = serde_json::from_str(error_path).unwrap();
            let expected: Path = serde_json::from_str(expected).unwrap();
            let response = Response::builder()
                .error(Error::builder().message("failed").path(error_path.clone()).build())
                .build();
            let response = extract.transform_result(response).unwrap();
            assert_eq!(response.errors[0].path, Some(expected), "error at {error_path}");
        }
    }

    #[test]
    fn from_must_end_with_a_field() {
        assert!(matches!(
            ExtractField::new(Path::empty(), Path::from_slice(&["a"])),
            Err(DelegationError::InvalidTransform { .. })
        ));
    }
}
