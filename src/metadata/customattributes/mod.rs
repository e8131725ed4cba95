//! Custom attributes.
//!
//! An attribute is its constructor plus the decoded fixed and named arguments. Every
//! argument keeps its declared type next to its value; only the declared types carry
//! metadata references. Enum types that the blob names by their serialized name are
//! resolved to tokens when the blob is decoded and turned back into names when it is
//! encoded, so a remapped enum type is written under its new assembly.
//!
//! Blobs that cannot be decoded (generic attribute parameters, enum names of nested
//! types in unknown scopes, truncated data) are kept verbatim in
//! [`CustomAttribute::raw_value`].

mod encoder;
mod parser;
mod types;

pub use encoder::encode_custom_attribute;
pub use parser::parse_custom_attribute;
pub use types::*;

use crate::{
    metadata::{signatures::TypeSignature, token::Token},
    Result,
};

/// Type lookups the blob codec needs from the module that owns an attribute.
pub trait AttributeTypes {
    /// Primitive type backing the enum `token`, `None` if it cannot be determined.
    fn enum_underlying_type(&self, token: Token) -> Option<TypeSignature>;

    /// `TypeDef` or `TypeRef` token for a serialized, possibly assembly-qualified,
    /// type name. May add references to the module.
    ///
    /// # Errors
    /// Returns an error if the name cannot be mapped to a type of this module or a
    /// referenced assembly.
    fn resolve_type_name(&mut self, name: &str) -> Result<Token>;

    /// Serialized name of a `TypeDef` or `TypeRef`, assembly-qualified for references.
    ///
    /// # Errors
    /// Returns an error for tokens that are not type definitions or references.
    fn serialized_type_name(&self, token: Token) -> Result<String>;
}
