//! Metadata tables.
//!
//! The high byte of every [`crate::metadata::token::Token`] names the table the token
//! points into. [`TableId`] lists the ECMA-335 tables plus the pseudo-table of the user
//! string heap, which `ldstr` operands index.
//!
//! The module model keeps most tables as typed arenas. Rows of the remaining tables are
//! carried through load and save as [`RawRow`]s described by [`schema`], with heap
//! references resolved to values and table references resolved to tokens.

mod codedindex;
mod schema;
mod tableinfo;

pub use codedindex::CodedIndexType;
pub use schema::{column_size, row_size, schema, ColumnKind, RawRow, RawValue};
pub use tableinfo::{TableInfo, TableRowInfo};

use strum::{Display, EnumIter, FromRepr};

/// Identifier of a metadata table, as encoded in the high byte of a token.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display, EnumIter, FromRepr,
)]
#[repr(u8)]
pub enum TableId {
    /// The module itself, always a single row
    Module = 0x00,
    /// External type references
    TypeRef = 0x01,
    /// Type definitions owned by the module
    TypeDef = 0x02,
    /// Field indirection, only in uncompressed metadata
    FieldPtr = 0x03,
    /// Field definitions
    Field = 0x04,
    /// Method indirection, only in uncompressed metadata
    MethodPtr = 0x05,
    /// Method definitions
    MethodDef = 0x06,
    /// Parameter indirection, only in uncompressed metadata
    ParamPtr = 0x07,
    /// Parameter names, flags and sequence numbers
    Param = 0x08,
    /// Interfaces implemented by type definitions
    InterfaceImpl = 0x09,
    /// Member references (fields and methods declared elsewhere)
    MemberRef = 0x0A,
    /// Constant values of fields, parameters and properties
    Constant = 0x0B,
    /// Custom attributes
    CustomAttribute = 0x0C,
    /// Marshalling descriptors
    FieldMarshal = 0x0D,
    /// Declarative security
    DeclSecurity = 0x0E,
    /// Explicit type layout
    ClassLayout = 0x0F,
    /// Explicit field offsets
    FieldLayout = 0x10,
    /// Stand-alone signatures: local variable lists and `calli` call sites
    StandAloneSig = 0x11,
    /// Type to event list map
    EventMap = 0x12,
    /// Event indirection, only in uncompressed metadata
    EventPtr = 0x13,
    /// Event definitions
    Event = 0x14,
    /// Type to property list map
    PropertyMap = 0x15,
    /// Property indirection, only in uncompressed metadata
    PropertyPtr = 0x16,
    /// Property definitions
    Property = 0x17,
    /// Property and event accessors
    MethodSemantics = 0x18,
    /// Explicit method overrides
    MethodImpl = 0x19,
    /// References to other modules
    ModuleRef = 0x1A,
    /// Type specifications (constructed types)
    TypeSpec = 0x1B,
    /// Platform invoke imports
    ImplMap = 0x1C,
    /// Initial data of static fields
    FieldRVA = 0x1D,
    /// Edit-and-continue log
    EncLog = 0x1E,
    /// Edit-and-continue map
    EncMap = 0x1F,
    /// The assembly manifest
    Assembly = 0x20,
    /// Unused assembly processor information
    AssemblyProcessor = 0x21,
    /// Unused assembly OS information
    AssemblyOS = 0x22,
    /// References to other assemblies
    AssemblyRef = 0x23,
    /// Unused assembly reference processor information
    AssemblyRefProcessor = 0x24,
    /// Unused assembly reference OS information
    AssemblyRefOS = 0x25,
    /// Files of a multi-file assembly
    File = 0x26,
    /// Types exported or forwarded by the assembly
    ExportedType = 0x27,
    /// Manifest resources
    ManifestResource = 0x28,
    /// Nesting of type definitions
    NestedClass = 0x29,
    /// Generic parameters of types and methods
    GenericParam = 0x2A,
    /// Generic method instantiations
    MethodSpec = 0x2B,
    /// Constraints of generic parameters
    GenericParamConstraint = 0x2C,
    /// User string heap, the operand of `ldstr`
    UserString = 0x70,
}

impl TableId {
    /// True for the tables the `#~` stream can carry.
    #[must_use]
    pub fn is_metadata_table(self) -> bool {
        (self as u8) <= TableId::GenericParamConstraint as u8
    }
}
