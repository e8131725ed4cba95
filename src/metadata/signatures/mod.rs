//! ECMA-335 signature blobs.
//!
//! Signatures describe the types of fields, method parameters and return values, local
//! variables, properties, type specifications and generic method instantiations. The module
//! model keeps them decoded as [`TypeSignature`] trees so the remapper can rewrite nested
//! references in place; the PE writer stores them in their standard blob encoding.
//!
//! # Examples
//!
//! ```rust
//! use refremap::metadata::signatures::{encode_type_signature, parse_type_signature, TypeSignature};
//! use refremap::metadata::token::Token;
//!
//! let signature = TypeSignature::SzArray(Box::new(TypeSignature::Class(Token::new(0x0100_0001))));
//! let blob = encode_type_signature(&signature)?;
//! assert_eq!(parse_type_signature(&blob)?, signature);
//! # Ok::<(), refremap::Error>(())
//! ```

mod encoders;
mod parser;
mod types;

pub use encoders::*;
pub use parser::*;
pub use types::*;

use crate::Result;

#[allow(non_snake_case, dead_code, missing_docs)]
/// Element type bytes used inside signatures - ECMA-335 II.23.1.16
pub mod ELEMENT_TYPE {
    pub const END: u8 = 0x00;
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0a;
    pub const U8: u8 = 0x0b;
    pub const R4: u8 = 0x0c;
    pub const R8: u8 = 0x0d;
    pub const STRING: u8 = 0x0e;
    pub const PTR: u8 = 0x0f;
    pub const BYREF: u8 = 0x10;
    pub const VALUETYPE: u8 = 0x11;
    pub const CLASS: u8 = 0x12;
    pub const VAR: u8 = 0x13;
    pub const ARRAY: u8 = 0x14;
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    pub const I: u8 = 0x18;
    pub const U: u8 = 0x19;
    pub const FNPTR: u8 = 0x1b;
    pub const OBJECT: u8 = 0x1c;
    pub const SZARRAY: u8 = 0x1d;
    pub const MVAR: u8 = 0x1e;
    pub const CMOD_REQD: u8 = 0x1f;
    pub const CMOD_OPT: u8 = 0x20;
    pub const SENTINEL: u8 = 0x41;
    pub const PINNED: u8 = 0x45;
}

#[allow(non_snake_case, dead_code, missing_docs)]
/// Signature header bytes
pub mod SIGNATURE_HEADER {
    pub const FIELD: u8 = 0x06;
    pub const LOCAL_SIG: u8 = 0x07;
    pub const PROPERTY: u8 = 0x08;
    pub const METHOD_SPEC: u8 = 0x0A;
}

#[allow(non_snake_case, dead_code, missing_docs)]
/// Calling convention flags of a method signature header
pub mod CALLING_CONVENTION {
    pub const DEFAULT: u8 = 0x00;
    pub const VARARG: u8 = 0x05;
    pub const GENERIC: u8 = 0x10;
    pub const HASTHIS: u8 = 0x20;
    pub const EXPLICITTHIS: u8 = 0x40;
}

/// Parse a type specification blob.
///
/// # Errors
/// Returns an error if the blob is malformed or has trailing bytes.
pub fn parse_type_signature(data: &[u8]) -> Result<TypeSignature> {
    let mut parser = SignatureParser::new(data);
    let signature = parser.parse_type()?;
    ensure_exhausted(&parser)?;
    Ok(signature)
}

/// Parse a method signature blob.
///
/// # Errors
/// Returns an error if the blob is malformed or has trailing bytes.
pub fn parse_method_signature(data: &[u8]) -> Result<SignatureMethod> {
    let mut parser = SignatureParser::new(data);
    let signature = parser.parse_method_signature()?;
    ensure_exhausted(&parser)?;
    Ok(signature)
}

/// Parse a field signature blob.
///
/// # Errors
/// Returns an error if the blob is malformed or has trailing bytes.
pub fn parse_field_signature(data: &[u8]) -> Result<TypeSignature> {
    let mut parser = SignatureParser::new(data);
    let signature = parser.parse_field_signature()?;
    ensure_exhausted(&parser)?;
    Ok(signature)
}

/// Parse a property signature blob.
///
/// # Errors
/// Returns an error if the blob is malformed or has trailing bytes.
pub fn parse_property_signature(data: &[u8]) -> Result<SignatureProperty> {
    let mut parser = SignatureParser::new(data);
    let signature = parser.parse_property_signature()?;
    ensure_exhausted(&parser)?;
    Ok(signature)
}

/// Parse a local variable signature blob.
///
/// # Errors
/// Returns an error if the blob is malformed or has trailing bytes.
pub fn parse_local_var_signature(data: &[u8]) -> Result<Vec<TypeSignature>> {
    let mut parser = SignatureParser::new(data);
    let signature = parser.parse_local_var_signature()?;
    ensure_exhausted(&parser)?;
    Ok(signature)
}

/// Parse a method instantiation blob.
///
/// # Errors
/// Returns an error if the blob is malformed or has trailing bytes.
pub fn parse_method_spec_signature(data: &[u8]) -> Result<Vec<TypeSignature>> {
    let mut parser = SignatureParser::new(data);
    let signature = parser.parse_method_spec_signature()?;
    ensure_exhausted(&parser)?;
    Ok(signature)
}

fn ensure_exhausted(parser: &SignatureParser<'_>) -> Result<()> {
    if parser.is_exhausted() {
        Ok(())
    } else {
        Err(malformed_error!("Trailing bytes after signature"))
    }
}
