//! Shared domain types for the framegate gateway.
//!
//! This crate defines the vocabulary every other crate speaks:
//!
//! - [`Signature`] - the leading byte sequence that identifies a protocol
//! - [`ProtocolId`] - the stable, filesystem-safe name of a parser
//! - [`FieldValue`] / [`Record`] - the structured output of a parse
//!
//! Keeping these in a leaf crate lets the execution engine, the routing
//! layer, and the oracle clients agree on identifiers without depending on
//! each other.

mod ids;
mod value;

pub use ids::{IdError, ProtocolId, Signature, SignatureError};
pub use value::{FieldValue, Record};
