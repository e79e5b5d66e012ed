//! Function contracts: the input/output/error nodes of one remote function
//! and the request pipeline built on them.
use serde_json::Value as Json;

use crate::decode::{decode, DecodeOptions};
use crate::encode::{encode, encode_projected};
use crate::error::{EncodeError, ErrorEntry, Path, RetrieveError};
use crate::node::{Registry, TypeId};
use crate::retrieve::{capabilities_of, complete_retrieve, merge, respects, validate, Retrieve, RetrieveOptions};
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct FunctionContract {
    pub name: String,
    pub description: Option<String>,
    pub input: TypeId,
    pub output: TypeId,
    pub error: Option<TypeId>,
    /// Retrieval applied underneath whatever the caller asks for.
    pub retrieve_defaults: Retrieve,
}

impl FunctionContract {
    pub fn new(name: impl Into<String>, input: TypeId, output: TypeId) -> Self {
        Self {
            name: name.into(),
            description: None,
            input,
            output,
            error: None,
            retrieve_defaults: Retrieve::default(),
        }
    }

    /// Whether the output is (a collection of) an entity, i.e. accepts a
    /// retrieval specification.
    pub fn is_retrievable(&self, registry: &Registry) -> bool {
        capabilities_of(registry, self.output).is_some()
    }

    pub fn decode_input(&self, registry: &Registry, raw: &Json, options: &DecodeOptions) -> Result<Value, Vec<ErrorEntry>> {
        decode(registry, self.input, raw, options)
    }

    /// The retrieval a call runs with: the caller's request validated, merged
    /// over the defaults, then widened to every owned field.
    pub fn effective_retrieve(&self, registry: &Registry, requested: Option<&Json>, options: &RetrieveOptions) -> Result<Retrieve, RetrieveError> {
        if !self.is_retrievable(registry) {
            return match requested {
                None => Ok(Retrieve::default()),
                Some(raw) => Err(RetrieveError::new(&Path::root(), format!("{} does not accept a retrieval", self.name), raw.clone())),
            };
        }
        let requested = match requested {
            Some(raw) => validate(registry, self.output, raw, options)?,
            None => Retrieve::default(),
        };
        let merged = merge(registry, self.output, &self.retrieve_defaults, &requested, options)?;
        Ok(complete_retrieve(registry, self.output, &merged))
    }

    /// Certify that `value` stays within `retrieve`, then encode it projected
    /// to the selected fields.
    pub fn encode_output(&self, registry: &Registry, value: &Value, retrieve: &Retrieve) -> Result<Json, EncodeError> {
        if !self.is_retrievable(registry) {
            return encode(registry, self.output, value);
        }
        if !respects(registry, self.output, retrieve, value) {
            tracing::debug!(function = %self.name, "output carries fields outside of its retrieval");
            return Err(EncodeError::Projection);
        }
        encode_projected(registry, self.output, value, retrieve)
    }
}
