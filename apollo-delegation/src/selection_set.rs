//! Structural edits on the selection sets of a delegated document, and the matching splice on
//! response data.
//!
//! Documents are never edited in place. An edit clones the document, which only clones the
//! reference-counted definition nodes, then calls [`Node::make_mut`] on each node along the
//! edited path: ancestors of the edit are copied, every other node stays shared with the input.

use std::collections::HashSet;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::ast;
use apollo_compiler::ast::Selection;
use apollo_compiler::name;

use crate::error::DelegationError;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;

/// The operation a delegated document executes: its first operation definition.
pub fn operation(
    document: &ast::Document,
) -> Result<&Node<ast::OperationDefinition>, DelegationError> {
    document
        .definitions
        .iter()
        .find_map(|definition| match definition {
            ast::Definition::OperationDefinition(operation) => Some(operation),
            _ => None,
        })
        .ok_or_else(no_operation)
}

pub(crate) fn operation_mut(
    document: &mut ast::Document,
) -> Result<&mut Node<ast::OperationDefinition>, DelegationError> {
    document
        .definitions
        .iter_mut()
        .find_map(|definition| match definition {
            ast::Definition::OperationDefinition(operation) => Some(operation),
            _ => None,
        })
        .ok_or_else(no_operation)
}

fn no_operation() -> DelegationError {
    DelegationError::InvalidDocument {
        reason: "the document does not contain any operation".to_string(),
    }
}

/// The key under which a field shows up in response data.
pub(crate) fn response_key(field: &ast::Field) -> &str {
    field.alias.as_ref().unwrap_or(&field.name).as_str()
}

/// Get the selection set of the field at `path`.
///
/// The empty path is the operation's top level selection set. Index segments are skipped:
/// every item of a list shares the selection set of the list field.
pub fn selection_set_at_path<'doc>(
    document: &'doc ast::Document,
    path: &Path,
) -> Result<&'doc [Selection], DelegationError> {
    let mut selections = operation(document)?.selection_set.as_slice();
    for key in path.keys() {
        let field = selections
            .iter()
            .find_map(|selection| match selection {
                Selection::Field(field) if response_key(field) == key => Some(field),
                _ => None,
            })
            .ok_or_else(|| not_found(path))?;
        selections = field.selection_set.as_slice();
    }
    Ok(selections)
}

/// Return a copy of `document` where the selection set of the field at `path` is
/// `selection_set`.
pub fn replace_selection_set_at_path(
    document: &ast::Document,
    path: &Path,
    selection_set: Vec<Selection>,
) -> Result<ast::Document, DelegationError> {
    let mut document = document.clone();
    let operation = operation_mut(&mut document)?;
    *selection_set_mut(&mut operation.make_mut().selection_set, &path.0, path)? = selection_set;
    Ok(document)
}

/// Return a copy of `document` without the field selection at `path`.
///
/// A selection set left empty by the removal gets a `__typename` selection so that the
/// document stays valid.
pub fn remove_selection_at_path(
    document: &ast::Document,
    path: &Path,
) -> Result<ast::Document, DelegationError> {
    let (Some(parent), Some(key)) = (path.parent(), path.last_key()) else {
        return Err(not_found(path));
    };

    let mut document = document.clone();
    let operation = operation_mut(&mut document)?;
    let selections = selection_set_mut(&mut operation.make_mut().selection_set, &parent.0, path)?;
    let position = selections
        .iter()
        .position(|selection| {
            matches!(selection, Selection::Field(field) if response_key(field) == key)
        })
        .ok_or_else(|| not_found(path))?;
    selections.remove(position);
    if selections.is_empty() {
        selections.push(typename_selection());
    }
    Ok(document)
}

fn selection_set_mut<'a>(
    selections: &'a mut Vec<Selection>,
    path: &[PathElement],
    full_path: &Path,
) -> Result<&'a mut Vec<Selection>, DelegationError> {
    let Some((head, rest)) = path.split_first() else {
        return Ok(selections);
    };
    let PathElement::Key(key) = head else {
        return selection_set_mut(selections, rest, full_path);
    };

    let field = selections
        .iter_mut()
        .find_map(|selection| match selection {
            Selection::Field(field) => (response_key(field) == key.as_str()).then_some(field),
            _ => None,
        })
        .ok_or_else(|| not_found(full_path))?;
    selection_set_mut(&mut field.make_mut().selection_set, rest, full_path)
}

fn not_found(path: &Path) -> DelegationError {
    DelegationError::PathNotFound { path: path.clone() }
}

/// A field selection `name { selection_set }` without alias, arguments or directives.
pub fn field_selection(
    name: &str,
    selection_set: Vec<Selection>,
) -> Result<Selection, DelegationError> {
    let name = Name::new(name).map_err(|_| DelegationError::InvalidDocument {
        reason: format!("'{name}' is not a valid GraphQL name"),
    })?;
    Ok(Selection::Field(Node::new(ast::Field {
        alias: None,
        name,
        arguments: Vec::new(),
        directives: Default::default(),
        selection_set,
    })))
}

pub(crate) fn typename_selection() -> Selection {
    Selection::Field(Node::new(ast::Field {
        alias: None,
        name: name!("__typename"),
        arguments: Vec::new(),
        directives: Default::default(),
        selection_set: Vec::new(),
    }))
}

/// Names of the variables a field refers to through its `arguments` and `selection_set`.
///
/// Fragment spreads are not followed: only their directives are read.
pub fn variables_used_by(
    arguments: &[Node<ast::Argument>],
    selection_set: &[Selection],
) -> HashSet<Name> {
    let mut used = HashSet::new();
    for argument in arguments {
        collect_value_variables(&argument.value, &mut used);
    }
    collect_selection_variables(selection_set, &mut used);
    used
}

fn collect_field_variables(field: &ast::Field, used: &mut HashSet<Name>) {
    for argument in &field.arguments {
        collect_value_variables(&argument.value, used);
    }
    collect_directive_variables(&field.directives, used);
    collect_selection_variables(&field.selection_set, used);
}

fn collect_selection_variables(selections: &[Selection], used: &mut HashSet<Name>) {
    for selection in selections {
        match selection {
            Selection::Field(field) => collect_field_variables(field, used),
            Selection::InlineFragment(fragment) => {
                collect_directive_variables(&fragment.directives, used);
                collect_selection_variables(&fragment.selection_set, used);
            }
            Selection::FragmentSpread(spread) => {
                collect_directive_variables(&spread.directives, used)
            }
        }
    }
}

fn collect_directive_variables(directives: &ast::DirectiveList, used: &mut HashSet<Name>) {
    for directive in directives.iter() {
        for argument in &directive.arguments {
            collect_value_variables(&argument.value, used);
        }
    }
}

fn collect_value_variables(value: &ast::Value, used: &mut HashSet<Name>) {
    match value {
        ast::Value::Variable(name) => {
            used.insert(name.clone());
        }
        ast::Value::List(items) => {
            for item in items {
                collect_value_variables(item, used);
            }
        }
        ast::Value::Object(fields) => {
            for (_, value) in fields {
                collect_value_variables(value, used);
            }
        }
        _ => {}
    }
}

/// Merge the fields of `fragment` into the object reached by `path` in `result`.
///
/// Missing objects along the path are created. Lists are traversed item by item. A `null`
/// along the path, or at its end when `fragment` is an object, is kept: the subschema already
/// nulled that subtree. An object `fragment` ending on a list is merged into every item.
/// When `fragment` is not an object it replaces the value at `path`.
pub fn splice_result_at_path(
    mut result: Value,
    path: &Path,
    fragment: Value,
) -> Result<Value, DelegationError> {
    splice(&mut result, &path.0, &mut Path::empty(), &fragment)?;
    Ok(result)
}

fn splice(
    target: &mut Value,
    path: &[PathElement],
    current_path: &mut Path,
    fragment: &Value,
) -> Result<(), DelegationError> {
    let Some((head, rest)) = path.split_first() else {
        match (target, fragment) {
            (Value::Object(target), Value::Object(fields)) => {
                for (key, value) in fields.iter() {
                    target.insert(key.clone(), value.clone());
                }
            }
            (Value::Null, Value::Object(_)) => {}
            (Value::Array(items), Value::Object(_)) => {
                for (index, item) in items.iter_mut().enumerate() {
                    let mut item_path = current_path.clone();
                    item_path.push(index);
                    splice(item, path, &mut item_path, fragment)?;
                }
            }
            (target, fragment) => *target = fragment.clone(),
        }
        return Ok(());
    };

    match (head, target) {
        (_, Value::Null) => Ok(()),
        (PathElement::Index(index), Value::Array(items)) => match items.get_mut(*index) {
            Some(item) => {
                current_path.push(*index);
                splice(item, rest, current_path, fragment)
            }
            None => Err(DelegationError::invariant(
                current_path,
                format!("list has no item at index {index}"),
            )),
        },
        (PathElement::Key(_), Value::Array(items)) => {
            for (index, item) in items.iter_mut().enumerate() {
                let mut item_path = current_path.clone();
                item_path.push(index);
                splice(item, path, &mut item_path, fragment)?;
            }
            Ok(())
        }
        (PathElement::Key(key), Value::Object(object)) => {
            let child = object
                .entry(key.as_str())
                .or_insert(Value::Object(Object::new()));
            current_path.push(key.as_str());
            splice(child, rest, current_path, fragment)
        }
        (_, other) => Err(DelegationError::invariant(
            current_path,
            format!("cannot splice into {}", value_kind(other)),
        )),
    }
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
