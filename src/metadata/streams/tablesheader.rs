//! The `#~` stream: a header with row counts followed by the rows of every present table.

use std::collections::BTreeMap;

use strum::IntoEnumIterator;

use crate::{
    file::{io::read_le_at, writer::Writer},
    metadata::{
        streams::{HeapBuilder, Heaps},
        tables::{row_size, RawRow, TableId, TableInfo},
    },
    Result,
};

/// Tables that only appear in uncompressed (`#-`) metadata.
const POINTER_TABLES: [TableId; 5] = [
    TableId::FieldPtr,
    TableId::MethodPtr,
    TableId::ParamPtr,
    TableId::EventPtr,
    TableId::PropertyPtr,
];

/// Heap-size flag announcing four extra bytes after the row counts.
const EXTRA_DATA: u8 = 0x40;

/// The decoded `#~` stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TablesHeader {
    /// Major schema version, 2 for current metadata
    pub major_version: u8,
    /// Minor schema version
    pub minor_version: u8,
    /// Bit vector of tables declared as sorted
    pub sorted: u64,
    /// Rows of every present table
    pub tables: BTreeMap<TableId, Vec<RawRow>>,
}

impl TablesHeader {
    /// Decode a `#~` stream, resolving heap references through `heaps`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for truncated streams,
    /// [`crate::Error::Unsupported`] for pointer tables or tables beyond
    /// `GenericParamConstraint`, and heap errors for invalid references.
    pub fn read(data: &[u8], heaps: &Heaps<'_>) -> Result<TablesHeader> {
        let mut offset = 4;
        let major_version = read_le_at::<u8>(data, &mut offset)?;
        let minor_version = read_le_at::<u8>(data, &mut offset)?;
        let heap_sizes = read_le_at::<u8>(data, &mut offset)?;
        offset += 1;
        let valid = read_le_at::<u64>(data, &mut offset)?;
        let sorted = read_le_at::<u64>(data, &mut offset)?;

        if valid >> (TableId::GenericParamConstraint as u8 + 1) != 0 {
            return Err(unsupported_error!(
                "Table stream declares unknown tables - 0x{:016x}",
                valid
            ));
        }

        let mut row_counts = Vec::new();
        for table in TableId::iter().filter(|table| table.is_metadata_table()) {
            if valid & (1 << table as u8) == 0 {
                continue;
            }
            if POINTER_TABLES.contains(&table) {
                return Err(unsupported_error!("Uncompressed metadata with {} table", table));
            }
            row_counts.push((table, read_le_at::<u32>(data, &mut offset)?));
        }
        if heap_sizes & EXTRA_DATA != 0 {
            offset += 4;
        }

        let info = TableInfo::new(&row_counts, heap_sizes);
        let mut tables = BTreeMap::new();
        for (table, rows) in row_counts {
            let size = row_size(table, &info);
            let needed = (rows as usize).checked_mul(size);
            if needed.map_or(true, |needed| offset + needed > data.len()) {
                return Err(out_of_bounds_error!());
            }

            let mut table_rows = Vec::with_capacity(rows as usize);
            for _ in 0..rows {
                table_rows.push(RawRow::read(data, &mut offset, table, &info, heaps)?);
            }
            tables.insert(table, table_rows);
        }

        Ok(TablesHeader {
            major_version,
            minor_version,
            sorted,
            tables,
        })
    }

    /// Encode the stream. Every heap value of every row is interned into `heaps` first,
    /// so the heap index widths are final before the first row is written.
    ///
    /// # Errors
    /// Returns the first row encoding error.
    pub fn write(&self, heaps: &mut HeapBuilder) -> Result<Vec<u8>> {
        for rows in self.tables.values() {
            for row in rows {
                row.intern(heaps);
            }
        }

        let mut heap_sizes = 0u8;
        if heaps.strings.len() > 0xFFFF {
            heap_sizes |= 0x01;
        }
        if heaps.guids.len() > 0xFFFF {
            heap_sizes |= 0x02;
        }
        if heaps.blobs.len() > 0xFFFF {
            heap_sizes |= 0x04;
        }

        #[allow(clippy::cast_possible_truncation)]
        let row_counts: Vec<(TableId, u32)> = self
            .tables
            .iter()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(table, rows)| (*table, rows.len() as u32))
            .collect();
        let info = TableInfo::new(&row_counts, heap_sizes);

        let valid = row_counts
            .iter()
            .fold(0u64, |valid, (table, _)| valid | (1 << *table as u8));

        let mut writer = Writer::new();
        writer.write_le::<u32>(0);
        writer.write_le::<u8>(self.major_version);
        writer.write_le::<u8>(self.minor_version);
        writer.write_le::<u8>(heap_sizes);
        writer.write_le::<u8>(1);
        writer.write_le::<u64>(valid);
        writer.write_le::<u64>(self.sorted & valid);
        for (_, rows) in &row_counts {
            writer.write_le::<u32>(*rows);
        }

        for (table, _) in &row_counts {
            for row in &self.tables[table] {
                row.write(&mut writer, *table, &info, heaps)?;
            }
        }
        writer.align(4, 0);

        Ok(writer.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{tables::RawValue, token::Token};

    fn sample() -> TablesHeader {
        let mut tables = BTreeMap::new();
        tables.insert(
            TableId::Module,
            vec![RawRow(vec![
                RawValue::Int(0),
                RawValue::Str("Sample.dll".to_string()),
                RawValue::Guid([7; 16]),
                RawValue::Guid([0; 16]),
                RawValue::Guid([0; 16]),
            ])],
        );
        tables.insert(
            TableId::TypeRef,
            vec![RawRow(vec![
                RawValue::Token(Token::from_parts(TableId::AssemblyRef, 1)),
                RawValue::Str("Object".to_string()),
                RawValue::Str("System".to_string()),
            ])],
        );
        tables.insert(
            TableId::AssemblyRef,
            vec![RawRow(vec![
                RawValue::Int(4),
                RawValue::Int(0),
                RawValue::Int(0),
                RawValue::Int(0),
                RawValue::Int(0),
                RawValue::Blob(vec![0xB0, 0x3F, 0x5F, 0x7F, 0x11, 0xD5, 0x0A, 0x3A]),
                RawValue::Str("System.Runtime".to_string()),
                RawValue::Str(String::new()),
                RawValue::Blob(Vec::new()),
            ])],
        );

        TablesHeader {
            major_version: 2,
            minor_version: 0,
            sorted: 0x0000_1600_3301_FA00,
            tables,
        }
    }

    #[test]
    fn write_then_read() {
        let header = sample();
        let mut heaps = HeapBuilder::default();
        let data = header.write(&mut heaps).unwrap();
        assert_eq!(data.len() % 4, 0);
        // Module, TypeRef and AssemblyRef
        assert_eq!(&data[8..16], &0x0000_0008_0000_0003u64.to_le_bytes());

        let strings = heaps.strings.finish();
        let blobs = heaps.blobs.finish();
        let guids = heaps.guids.finish();
        let read = TablesHeader::read(&data, &Heaps::new(&strings, &blobs, &guids).unwrap())
            .unwrap();
        assert_eq!(read.tables, header.tables);
        assert_eq!(read.major_version, 2);
        assert_eq!(read.sorted, header.sorted & 0x0000_0008_0000_0003);
    }

    #[test]
    fn rejects_pointer_tables() {
        let mut data = vec![0, 0, 0, 0, 2, 0, 0, 1];
        data.extend_from_slice(&(1u64 << TableId::MethodPtr as u8).to_le_bytes());
        data.extend_from_slice(&0u64.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&[1, 0]);
        let heaps = Heaps::new(&[], &[], &[]).unwrap();
        assert!(matches!(
            TablesHeader::read(&data, &heaps),
            Err(crate::Error::Unsupported { .. })
        ));
    }

    #[test]
    fn rejects_truncated_rows() {
        let mut data = vec![0, 0, 0, 0, 2, 0, 0, 1];
        data.extend_from_slice(&(1u64 << TableId::TypeSpec as u8).to_le_bytes());
        data.extend_from_slice(&0u64.to_le_bytes());
        data.extend_from_slice(&100u32.to_le_bytes());
        let heaps = Heaps::new(&[], &[], &[]).unwrap();
        assert!(TablesHeader::read(&data, &heaps).is_err());
    }
}
