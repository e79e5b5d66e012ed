//! Schema-driven contracts for remote functions.
//!
//! Types are described once as a graph of [`node::TypeNode`]s held in a
//! [`node::Registry`]. From that graph the crate derives:
//! - [`decode`]: validate (and optionally cast) untrusted JSON, with every
//!   failure reported as a path-qualified [`ErrorEntry`];
//! - [`encode`]: the inverse, optionally projected to a retrieval;
//! - [`retrieve`]: what part of an entity graph a caller may ask for;
//! - [`schema`]: an OpenAPI 3.1 document for the whole surface.
pub mod cli;
pub mod decode;
pub mod defs;
pub mod encode;
pub mod error;
pub mod function;
pub mod jq_exec;
pub mod node;
pub mod retrieve;
pub mod schema;
pub mod value;

#[cfg(test)]
pub(crate) mod fixtures;

pub use decode::{conforms, decode, decode_value, DecodeOptions, ErrorMode};
pub use defs::Definitions;
pub use encode::{encode, encode_projected};
pub use error::{DefinitionError, EncodeError, ErrorEntry, LoadError, Path, RetrieveError};
pub use function::FunctionContract;
pub use node::{Registry, RegistryBuilder, TypeId, TypeNode};
pub use retrieve::{Retrieve, RetrieveOptions};
pub use schema::{DocumentBuilder, DocumentInfo, SchemaGenerator};
pub use value::Value;
