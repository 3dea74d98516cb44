use alloy_primitives::B256;

use super::{encode_type, hash_struct, TypedField};

/// A flat struct instance to be signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedMessage {
    primary_type: String,
    fields: Vec<TypedField>,
}

impl TypedMessage {
    pub fn new(primary_type: impl Into<String>, fields: Vec<TypedField>) -> Self {
        Self {
            primary_type: primary_type.into(),
            fields,
        }
    }

    #[must_use]
    pub fn primary_type(&self) -> &str {
        &self.primary_type
    }

    /// Members in encoding order
    #[must_use]
    pub fn fields(&self) -> &[TypedField] {
        &self.fields
    }

    #[must_use]
    pub fn encode_type(&self) -> String {
        encode_type(&self.primary_type, &self.fields)
    }

    #[must_use]
    pub fn hash_struct(&self) -> B256 {
        hash_struct(&self.primary_type, &self.fields)
    }
}
