//! Row counts and index widths of a `#~` stream.

use strum::{EnumCount, IntoEnumIterator};

use crate::metadata::tables::{CodedIndexType, TableId};

/// Row count of one table and the bits needed to index it.
#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub struct TableRowInfo {
    /// Number of rows
    pub rows: u32,
    /// Bits needed to store the largest row number
    pub bits: u8,
    /// True when a plain index into the table takes 4 bytes
    pub is_large: bool,
}

impl TableRowInfo {
    /// Create the row information for a table with `rows` rows.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(rows: u32) -> Self {
        let bits = if rows == 0 {
            1
        } else {
            (32 - rows.leading_zeros()) as u8
        };

        Self {
            rows,
            bits,
            is_large: rows > u32::from(u16::MAX),
        }
    }
}

/// Row counts of all tables plus the heap index widths, which together fix every column
/// width of the table stream.
#[derive(Clone, Debug)]
pub struct TableInfo {
    rows: Vec<TableRowInfo>,
    coded_indexes: Vec<u8>,
    is_large_index_str: bool,
    is_large_index_guid: bool,
    is_large_index_blob: bool,
}

impl TableInfo {
    /// Build the table information from per-table row counts and the heap-size flags
    /// byte of the `#~` header.
    #[must_use]
    pub fn new(row_counts: &[(TableId, u32)], heap_size_flags: u8) -> Self {
        let mut info = TableInfo {
            rows: vec![TableRowInfo::default(); TableId::GenericParamConstraint as usize + 1],
            coded_indexes: vec![0; CodedIndexType::COUNT],
            is_large_index_str: heap_size_flags & 1 == 1,
            is_large_index_guid: heap_size_flags & 2 == 2,
            is_large_index_blob: heap_size_flags & 4 == 4,
        };

        for (table, rows) in row_counts {
            if table.is_metadata_table() {
                info.rows[*table as usize] = TableRowInfo::new(*rows);
            }
        }

        for coded_index in CodedIndexType::iter() {
            let max_bits = coded_index
                .tables()
                .iter()
                .map(|table| info.rows[*table as usize].bits)
                .max()
                .unwrap_or(1);
            info.coded_indexes[coded_index as usize] = max_bits + coded_index.tag_bits();
        }

        info
    }

    /// Row information of `table`.
    #[must_use]
    pub fn get(&self, table: TableId) -> TableRowInfo {
        self.rows
            .get(table as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Width in bytes of a `#Strings` index.
    #[must_use]
    pub fn str_bytes(&self) -> usize {
        if self.is_large_index_str {
            4
        } else {
            2
        }
    }

    /// Width in bytes of a `#GUID` index.
    #[must_use]
    pub fn guid_bytes(&self) -> usize {
        if self.is_large_index_guid {
            4
        } else {
            2
        }
    }

    /// Width in bytes of a `#Blob` index.
    #[must_use]
    pub fn blob_bytes(&self) -> usize {
        if self.is_large_index_blob {
            4
        } else {
            2
        }
    }

    /// Width in bytes of a plain index into `table`.
    #[must_use]
    pub fn table_index_bytes(&self, table: TableId) -> usize {
        if self.get(table).bits > 16 {
            4
        } else {
            2
        }
    }

    /// Width in bytes of a coded index.
    #[must_use]
    pub fn coded_index_bytes(&self, coded_index: CodedIndexType) -> usize {
        if self.coded_indexes[coded_index as usize] > 16 {
            4
        } else {
            2
        }
    }

    /// The heap-size flags byte describing this layout.
    #[must_use]
    pub fn heap_size_flags(&self) -> u8 {
        u8::from(self.is_large_index_str)
            | (u8::from(self.is_large_index_guid) << 1)
            | (u8::from(self.is_large_index_blob) << 2)
    }

    /// Tables with at least one row, in table order.
    pub fn present(&self) -> impl Iterator<Item = TableId> + '_ {
        TableId::iter().filter(|table| table.is_metadata_table() && self.get(*table).rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_widths() {
        let info = TableInfo::new(&[(TableId::TypeDef, 3), (TableId::MethodDef, 70_000)], 0x05);
        assert_eq!(info.get(TableId::TypeDef).bits, 2);
        assert_eq!(info.table_index_bytes(TableId::TypeDef), 2);
        assert_eq!(info.table_index_bytes(TableId::MethodDef), 4);
        assert!(info.get(TableId::MethodDef).is_large);
        assert_eq!(info.str_bytes(), 4);
        assert_eq!(info.guid_bytes(), 2);
        assert_eq!(info.blob_bytes(), 4);
        assert_eq!(info.heap_size_flags(), 0x05);
        assert_eq!(info.present().collect::<Vec<_>>(), vec![TableId::TypeDef, TableId::MethodDef]);
    }

    #[test]
    fn coded_index_widths() {
        // 2^14 rows leave no room for a two-bit tag in 16 bits
        let info = TableInfo::new(&[(TableId::TypeRef, 1 << 14)], 0);
        assert_eq!(info.coded_index_bytes(CodedIndexType::TypeDefOrRef), 4);
        assert_eq!(info.coded_index_bytes(CodedIndexType::MethodDefOrRef), 2);

        let small = TableInfo::new(&[(TableId::TypeRef, (1 << 14) - 1)], 0);
        assert_eq!(small.coded_index_bytes(CodedIndexType::TypeDefOrRef), 2);
    }
}
