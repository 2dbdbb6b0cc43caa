//! Delegation of GraphQL root fields to subschemas.
//!
//! A gateway resolving a field by asking another schema builds a [`DelegationRequest`], and a
//! [`Delegator`] sends it to the subschema. [`transforms`] rewrite the outgoing document so the
//! subschema can answer it, and rewrite the response back into the shape the caller selected.

#![warn(unreachable_pub)]

pub mod json_ext;

pub mod configuration;
pub mod delegation;
pub mod error;
pub mod graphql;
pub mod pipeline;
pub mod selection_set;
pub mod transforms;

pub use configuration::Configuration;
pub use delegation::DelegationRequest;
pub use delegation::Delegator;
pub use delegation::OperationKind;
pub use delegation::SubschemaRequest;
pub use error::DelegationError;
pub use pipeline::Pipeline;
pub use transforms::ExtractField;
pub use transforms::Transform;
pub use transforms::TransformQuery;
pub use transforms::WrapQuery;
