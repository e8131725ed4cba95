//! Coded indices (ECMA-335 II.24.2.6).
//!
//! A coded index stores a table tag in its low bits and a row number in the rest, so a
//! single column can point into one of several tables.

use strum::{EnumCount, EnumIter};

use crate::{
    metadata::{tables::TableId, token::Token},
    Result,
};

/// The table combinations a coded index column can reference.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, EnumIter, EnumCount)]
#[repr(usize)]
pub enum CodedIndexType {
    /// `TypeDef`, `TypeRef` or `TypeSpec`
    TypeDefOrRef,
    /// `Field`, `Param` or `Property`
    HasConstant,
    /// Any row that can carry a custom attribute
    HasCustomAttribute,
    /// `Field` or `Param`
    HasFieldMarshal,
    /// `TypeDef`, `MethodDef` or `Assembly`
    HasDeclSecurity,
    /// The parent of a member reference
    MemberRefParent,
    /// `Event` or `Property`
    HasSemantics,
    /// `MethodDef` or `MemberRef`
    MethodDefOrRef,
    /// `Field` or `MethodDef`
    MemberForwarded,
    /// `File`, `AssemblyRef` or `ExportedType`
    Implementation,
    /// The constructor of a custom attribute
    CustomAttributeType,
    /// The scope of a type reference
    ResolutionScope,
    /// The owner of a generic parameter
    TypeOrMethodDef,
}

impl CodedIndexType {
    /// The tables this coded index can reference, in tag order.
    ///
    /// `CustomAttributeType` reserves tags 0, 1 and 4; they decode to the neighbouring
    /// table and are never produced by [`CodedIndexType::encode`].
    #[must_use]
    pub fn tables(&self) -> &'static [TableId] {
        match self {
            CodedIndexType::TypeDefOrRef => {
                &[TableId::TypeDef, TableId::TypeRef, TableId::TypeSpec]
            }
            CodedIndexType::HasConstant => &[TableId::Field, TableId::Param, TableId::Property],
            CodedIndexType::HasCustomAttribute => &[
                TableId::MethodDef,
                TableId::Field,
                TableId::TypeRef,
                TableId::TypeDef,
                TableId::Param,
                TableId::InterfaceImpl,
                TableId::MemberRef,
                TableId::Module,
                TableId::DeclSecurity,
                TableId::Property,
                TableId::Event,
                TableId::StandAloneSig,
                TableId::ModuleRef,
                TableId::TypeSpec,
                TableId::Assembly,
                TableId::AssemblyRef,
                TableId::File,
                TableId::ExportedType,
                TableId::ManifestResource,
                TableId::GenericParam,
                TableId::GenericParamConstraint,
                TableId::MethodSpec,
            ],
            CodedIndexType::HasFieldMarshal => &[TableId::Field, TableId::Param],
            CodedIndexType::HasDeclSecurity => {
                &[TableId::TypeDef, TableId::MethodDef, TableId::Assembly]
            }
            CodedIndexType::MemberRefParent => &[
                TableId::TypeDef,
                TableId::TypeRef,
                TableId::ModuleRef,
                TableId::MethodDef,
                TableId::TypeSpec,
            ],
            CodedIndexType::HasSemantics => &[TableId::Event, TableId::Property],
            CodedIndexType::MethodDefOrRef => &[TableId::MethodDef, TableId::MemberRef],
            CodedIndexType::MemberForwarded => &[TableId::Field, TableId::MethodDef],
            CodedIndexType::Implementation => {
                &[TableId::File, TableId::AssemblyRef, TableId::ExportedType]
            }
            CodedIndexType::CustomAttributeType => &[
                TableId::MethodDef,
                TableId::MethodDef,
                TableId::MethodDef,
                TableId::MemberRef,
                TableId::MemberRef,
            ],
            CodedIndexType::ResolutionScope => &[
                TableId::Module,
                TableId::ModuleRef,
                TableId::AssemblyRef,
                TableId::TypeRef,
            ],
            CodedIndexType::TypeOrMethodDef => &[TableId::TypeDef, TableId::MethodDef],
        }
    }

    /// Number of low bits holding the table tag.
    #[must_use]
    pub fn tag_bits(&self) -> u8 {
        let count = self.tables().len();
        let mut bits = 0;
        while (1usize << bits) < count {
            bits += 1;
        }
        bits
    }

    /// Splits a raw coded index into a token. A zero row keeps the tag's table.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for a tag outside the table list.
    pub fn decode(&self, value: u32) -> Result<Token> {
        let tag_bits = self.tag_bits();
        let tag = (value & ((1 << tag_bits) - 1)) as usize;
        let tables = self.tables();
        if tag >= tables.len() {
            return Err(out_of_bounds_error!());
        }

        Ok(Token::from_parts(tables[tag], value >> tag_bits))
    }

    /// Packs a token into a raw coded index. Null tokens encode as 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] when the token's table is not part of this
    /// coded index.
    pub fn encode(&self, token: Token) -> Result<u32> {
        if token.row() == 0 {
            return Ok(0);
        }

        let tag = match self {
            CodedIndexType::CustomAttributeType => match token.table_id() {
                Some(TableId::MethodDef) => Some(2),
                Some(TableId::MemberRef) => Some(3),
                _ => None,
            },
            _ => token
                .table_id()
                .and_then(|table| self.tables().iter().position(|candidate| *candidate == table)),
        };
        let Some(tag) = tag else {
            return Err(malformed_error!(
                "Token {} cannot be stored in a {:?} coded index",
                token,
                self
            ));
        };

        #[allow(clippy::cast_possible_truncation)]
        Ok((token.row() << self.tag_bits()) | tag as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_bits() {
        assert_eq!(CodedIndexType::TypeDefOrRef.tag_bits(), 2);
        assert_eq!(CodedIndexType::HasCustomAttribute.tag_bits(), 5);
        assert_eq!(CodedIndexType::MethodDefOrRef.tag_bits(), 1);
        assert_eq!(CodedIndexType::CustomAttributeType.tag_bits(), 3);
        assert_eq!(CodedIndexType::ResolutionScope.tag_bits(), 2);
    }

    #[test]
    fn decode_encode() {
        let token = CodedIndexType::TypeDefOrRef.decode(0x0D).unwrap();
        assert_eq!(token, Token::from_parts(TableId::TypeRef, 3));
        assert_eq!(CodedIndexType::TypeDefOrRef.encode(token).unwrap(), 0x0D);

        let ctor = Token::from_parts(TableId::MemberRef, 5);
        let value = CodedIndexType::CustomAttributeType.encode(ctor).unwrap();
        assert_eq!(value, (5 << 3) | 3);
        assert_eq!(CodedIndexType::CustomAttributeType.decode(value).unwrap(), ctor);

        let null = CodedIndexType::ResolutionScope.decode(0).unwrap();
        assert_eq!(null.row(), 0);
        assert_eq!(CodedIndexType::ResolutionScope.encode(null).unwrap(), 0);
    }

    #[test]
    fn rejects_foreign_tables() {
        assert!(CodedIndexType::HasFieldMarshal.decode(0x02).is_err());
        let method = Token::from_parts(TableId::MethodDef, 1);
        assert!(CodedIndexType::TypeDefOrRef.encode(method).is_err());
    }
}
