//! # refremap Prelude
//!
//! The types needed to load modules, run a remap and inspect the result, in one glob
//! import.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all refremap operations
pub use crate::Error;

/// The result type used throughout refremap
pub use crate::Result;

/// Low-level file parsing utilities
pub use crate::{File, Parser, Writer};

// ================================================================================================
// Metadata Model
// ================================================================================================

/// The module model and its rows
pub use crate::metadata::module::{
    FieldDef, MemberRef, MemberRefSignature, MethodDef, MethodSpec, ModuleDef, PropertyDef,
    TypeDef, TypeRef, TypeSpec,
};

/// Tokens and tables
pub use crate::metadata::{tables::TableId, token::Token};

/// Signatures
pub use crate::metadata::signatures::{SignatureMethod, SignatureProperty, TypeSignature};

/// Assembly identities
pub use crate::metadata::identity::{AssemblyIdentity, AssemblyVersion};

/// Resources
pub use crate::metadata::resources::{ManifestResource, ResourceEntry, ResourceSet};

// ================================================================================================
// Markup
// ================================================================================================

/// BAML streams
pub use crate::baml::{BamlDocument, BamlRecord, BamlRecordType};

// ================================================================================================
// Remapping
// ================================================================================================

/// Remap runs
pub use crate::remap::{
    remap_file, RemapContext, RemapOptions, RemapPass, RemapRequest, RemapStatus,
};
