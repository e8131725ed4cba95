//! Column layout of every metadata table (ECMA-335 II.22) and the generic row type the
//! image reader and writer use for tables the module model does not own.

use crate::{
    file::{io::read_le_at, writer::Writer},
    metadata::{
        streams::{HeapBuilder, Heaps},
        tables::{CodedIndexType, TableId, TableInfo},
        token::Token,
    },
    Result,
};

/// Kind of a single table column.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ColumnKind {
    /// Two-byte constant
    U16,
    /// Four-byte constant
    U32,
    /// Index into `#Strings`
    Str,
    /// Index into `#GUID`
    Guid,
    /// Index into `#Blob`
    Blob,
    /// Plain index into another table
    Table(TableId),
    /// Coded index into one of several tables
    Coded(CodedIndexType),
}

/// A decoded column value. Heap indices are resolved to their contents and table
/// references to tokens, so rows stay valid when heaps are rebuilt.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum RawValue {
    /// Constant column
    Int(u32),
    /// `#Strings` content
    Str(String),
    /// `#GUID` content, all zero for the null index
    Guid([u8; 16]),
    /// `#Blob` content
    Blob(Vec<u8>),
    /// Table or coded index, row 0 for null
    Token(Token),
}

/// A table row as a list of column values.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct RawRow(pub Vec<RawValue>);

/// The columns of `table`. The user string pseudo-table has none.
#[must_use]
pub fn schema(table: TableId) -> &'static [ColumnKind] {
    use ColumnKind::{Blob, Coded, Guid, Str, Table, U16, U32};
    use CodedIndexType as C;

    match table {
        TableId::Module => &[U16, Str, Guid, Guid, Guid],
        TableId::TypeRef => &[Coded(C::ResolutionScope), Str, Str],
        TableId::TypeDef => &[
            U32,
            Str,
            Str,
            Coded(C::TypeDefOrRef),
            Table(TableId::Field),
            Table(TableId::MethodDef),
        ],
        TableId::FieldPtr => &[Table(TableId::Field)],
        TableId::Field => &[U16, Str, Blob],
        TableId::MethodPtr => &[Table(TableId::MethodDef)],
        TableId::MethodDef => &[U32, U16, U16, Str, Blob, Table(TableId::Param)],
        TableId::ParamPtr => &[Table(TableId::Param)],
        TableId::Param => &[U16, U16, Str],
        TableId::InterfaceImpl => &[Table(TableId::TypeDef), Coded(C::TypeDefOrRef)],
        TableId::MemberRef => &[Coded(C::MemberRefParent), Str, Blob],
        TableId::Constant => &[U16, Coded(C::HasConstant), Blob],
        TableId::CustomAttribute => &[
            Coded(C::HasCustomAttribute),
            Coded(C::CustomAttributeType),
            Blob,
        ],
        TableId::FieldMarshal => &[Coded(C::HasFieldMarshal), Blob],
        TableId::DeclSecurity => &[U16, Coded(C::HasDeclSecurity), Blob],
        TableId::ClassLayout => &[U16, U32, Table(TableId::TypeDef)],
        TableId::FieldLayout => &[U32, Table(TableId::Field)],
        TableId::StandAloneSig => &[Blob],
        TableId::EventMap => &[Table(TableId::TypeDef), Table(TableId::Event)],
        TableId::EventPtr => &[Table(TableId::Event)],
        TableId::Event => &[U16, Str, Coded(C::TypeDefOrRef)],
        TableId::PropertyMap => &[Table(TableId::TypeDef), Table(TableId::Property)],
        TableId::PropertyPtr => &[Table(TableId::Property)],
        TableId::Property => &[U16, Str, Blob],
        TableId::MethodSemantics => &[U16, Table(TableId::MethodDef), Coded(C::HasSemantics)],
        TableId::MethodImpl => &[
            Table(TableId::TypeDef),
            Coded(C::MethodDefOrRef),
            Coded(C::MethodDefOrRef),
        ],
        TableId::ModuleRef => &[Str],
        TableId::TypeSpec => &[Blob],
        TableId::ImplMap => &[U16, Coded(C::MemberForwarded), Str, Table(TableId::ModuleRef)],
        TableId::FieldRVA => &[U32, Table(TableId::Field)],
        TableId::EncLog => &[U32, U32],
        TableId::EncMap => &[U32],
        TableId::Assembly => &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
        TableId::AssemblyProcessor => &[U32],
        TableId::AssemblyOS => &[U32, U32, U32],
        TableId::AssemblyRef => &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
        TableId::AssemblyRefProcessor => &[U32, Table(TableId::AssemblyRef)],
        TableId::AssemblyRefOS => &[U32, U32, U32, Table(TableId::AssemblyRef)],
        TableId::File => &[U32, Str, Blob],
        TableId::ExportedType => &[U32, U32, Str, Str, Coded(C::Implementation)],
        TableId::ManifestResource => &[U32, U32, Str, Coded(C::Implementation)],
        TableId::NestedClass => &[Table(TableId::TypeDef), Table(TableId::TypeDef)],
        TableId::GenericParam => &[U16, U16, Coded(C::TypeOrMethodDef), Str],
        TableId::MethodSpec => &[Coded(C::MethodDefOrRef), Blob],
        TableId::GenericParamConstraint => {
            &[Table(TableId::GenericParam), Coded(C::TypeDefOrRef)]
        }
        TableId::UserString => &[],
    }
}

/// Byte width of one column under `info`.
#[must_use]
pub fn column_size(column: ColumnKind, info: &TableInfo) -> usize {
    match column {
        ColumnKind::U16 => 2,
        ColumnKind::U32 => 4,
        ColumnKind::Str => info.str_bytes(),
        ColumnKind::Guid => info.guid_bytes(),
        ColumnKind::Blob => info.blob_bytes(),
        ColumnKind::Table(table) => info.table_index_bytes(table),
        ColumnKind::Coded(coded) => info.coded_index_bytes(coded),
    }
}

/// Byte width of one row of `table` under `info`.
#[must_use]
pub fn row_size(table: TableId, info: &TableInfo) -> usize {
    schema(table)
        .iter()
        .map(|column| column_size(*column, info))
        .sum()
}

fn read_index(data: &[u8], offset: &mut usize, size: usize) -> Result<u32> {
    if size == 4 {
        read_le_at::<u32>(data, offset)
    } else {
        Ok(u32::from(read_le_at::<u16>(data, offset)?))
    }
}

fn write_index(writer: &mut Writer, value: u32, size: usize) -> Result<()> {
    if size == 4 {
        writer.write_le::<u32>(value);
    } else {
        let Ok(value) = u16::try_from(value) else {
            return Err(malformed_error!("Index {} does not fit two bytes", value));
        };
        writer.write_le::<u16>(value);
    }
    Ok(())
}

impl RawRow {
    /// Decode one row of `table` at `offset`, advancing it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] when the row or one of its heap references
    /// lies outside the data, and [`crate::Error::Malformed`] for invalid heap entries.
    pub fn read(
        data: &[u8],
        offset: &mut usize,
        table: TableId,
        info: &TableInfo,
        heaps: &Heaps<'_>,
    ) -> Result<RawRow> {
        let columns = schema(table);
        let mut values = Vec::with_capacity(columns.len());
        for column in columns {
            let value = match column {
                ColumnKind::U16 => RawValue::Int(u32::from(read_le_at::<u16>(data, offset)?)),
                ColumnKind::U32 => RawValue::Int(read_le_at::<u32>(data, offset)?),
                ColumnKind::Str => {
                    let index = read_index(data, offset, info.str_bytes())?;
                    RawValue::Str(heaps.string(index)?.to_string())
                }
                ColumnKind::Guid => {
                    let index = read_index(data, offset, info.guid_bytes())?;
                    RawValue::Guid(heaps.guid(index)?)
                }
                ColumnKind::Blob => {
                    let index = read_index(data, offset, info.blob_bytes())?;
                    RawValue::Blob(heaps.blob(index)?.to_vec())
                }
                ColumnKind::Table(target) => {
                    let row = read_index(data, offset, info.table_index_bytes(*target))?;
                    RawValue::Token(Token::from_parts(*target, row))
                }
                ColumnKind::Coded(coded) => {
                    let value = read_index(data, offset, info.coded_index_bytes(*coded))?;
                    RawValue::Token(coded.decode(value)?)
                }
            };
            values.push(value);
        }

        Ok(RawRow(values))
    }

    /// Add every heap value of this row to `heaps`, so heap sizes are known before any
    /// row is written.
    pub fn intern(&self, heaps: &mut HeapBuilder) {
        for value in &self.0 {
            match value {
                RawValue::Str(value) => {
                    heaps.strings.intern(value);
                }
                RawValue::Blob(value) => {
                    heaps.blobs.intern(value);
                }
                RawValue::Guid(value) => {
                    heaps.guids.intern(*value);
                }
                RawValue::Int(_) | RawValue::Token(_) => {}
            }
        }
    }

    /// Encode this row as `table` under `info`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] when a value does not match its column or a
    /// token cannot be stored in its coded index.
    pub fn write(
        &self,
        writer: &mut Writer,
        table: TableId,
        info: &TableInfo,
        heaps: &mut HeapBuilder,
    ) -> Result<()> {
        let columns = schema(table);
        if columns.len() != self.0.len() {
            return Err(malformed_error!(
                "{} row has {} values for {} columns",
                table,
                self.0.len(),
                columns.len()
            ));
        }

        for (column, value) in columns.iter().zip(&self.0) {
            match (column, value) {
                (ColumnKind::U16, RawValue::Int(value)) => {
                    let Ok(value) = u16::try_from(*value) else {
                        return Err(malformed_error!("{} value {} exceeds u16", table, value));
                    };
                    writer.write_le::<u16>(value);
                }
                (ColumnKind::U32, RawValue::Int(value)) => writer.write_le::<u32>(*value),
                (ColumnKind::Str, RawValue::Str(value)) => {
                    let index = heaps.strings.intern(value);
                    write_index(writer, index, info.str_bytes())?;
                }
                (ColumnKind::Guid, RawValue::Guid(value)) => {
                    let index = heaps.guids.intern(*value);
                    write_index(writer, index, info.guid_bytes())?;
                }
                (ColumnKind::Blob, RawValue::Blob(value)) => {
                    let index = heaps.blobs.intern(value);
                    write_index(writer, index, info.blob_bytes())?;
                }
                (ColumnKind::Table(target), RawValue::Token(token)) => {
                    if token.row() != 0 && !token.is_table(*target) {
                        return Err(malformed_error!(
                            "{} column expects a {} token, got {}",
                            table,
                            target,
                            token
                        ));
                    }
                    write_index(writer, token.row(), info.table_index_bytes(*target))?;
                }
                (ColumnKind::Coded(coded), RawValue::Token(token)) => {
                    let value = coded.encode(*token)?;
                    write_index(writer, value, info.coded_index_bytes(*coded))?;
                }
                (column, value) => {
                    return Err(malformed_error!(
                        "{} column {:?} cannot hold {:?}",
                        table,
                        column,
                        value
                    ));
                }
            }
        }

        Ok(())
    }

    /// The constant at `column`, 0 if the column holds something else.
    #[must_use]
    pub fn int(&self, column: usize) -> u32 {
        match self.0.get(column) {
            Some(RawValue::Int(value)) => *value,
            _ => 0,
        }
    }

    /// The string at `column`, empty if the column holds something else.
    #[must_use]
    pub fn str(&self, column: usize) -> &str {
        match self.0.get(column) {
            Some(RawValue::Str(value)) => value,
            _ => "",
        }
    }

    /// The blob at `column`, empty if the column holds something else.
    #[must_use]
    pub fn blob(&self, column: usize) -> &[u8] {
        match self.0.get(column) {
            Some(RawValue::Blob(value)) => value,
            _ => &[],
        }
    }

    /// The GUID at `column`, all zero if the column holds something else.
    #[must_use]
    pub fn guid(&self, column: usize) -> [u8; 16] {
        match self.0.get(column) {
            Some(RawValue::Guid(value)) => *value,
            _ => [0; 16],
        }
    }

    /// The token at `column`, the null token if the column holds something else.
    #[must_use]
    pub fn token(&self, column: usize) -> Token {
        match self.0.get(column) {
            Some(RawValue::Token(value)) => *value,
            _ => Token(0),
        }
    }

    /// Visit every non-null token of this row mutably.
    pub fn for_each_token_mut(&mut self, mut f: impl FnMut(&mut Token)) {
        for value in &mut self.0 {
            if let RawValue::Token(token) = value {
                if token.row() != 0 {
                    f(token);
                }
            }
        }
    }
}
