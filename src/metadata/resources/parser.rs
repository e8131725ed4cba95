//! `.resources` container parsing.
//!
//! Layout of a resource set (all offsets relative to the magic number):
//!
//! ```text
//! Magic number (0xBEEFCACE)                               Int32
//! Resource manager header version                         Int32
//! Num bytes to skip from here to get past this header     Int32
//! Class name of IResourceReader                           String
//! Class name of ResourceSet                               String
//! ResourceReader version number                           Int32
//! Number of resources                                     Int32
//! Number of types in the type table                       Int32
//! Name of each type                                       Set of Strings
//! Padding bytes for 8-byte alignment ("PAD")              Bytes (0-7)
//! Hash values for each resource name                      Int32 array, sorted
//! Virtual offset of each resource name                    Int32 array
//! Absolute location of the data section                   Int32
//! Name section: (UTF-16 name, Int32 data offset) pairs
//! Data section: (7-bit type code, value) pairs
//! ```
//!
//! Values are kept as raw bytes; an entry's value extends to the next entry's data
//! offset, or to the end of the container for the last one.

use crate::{
    file::parser::Parser,
    metadata::resources::{
        ResourceEntry, ResourceSet, RESOURCE_MAGIC, RESOURCE_READER_VERSION,
    },
    Result,
};

struct NameEntry {
    position: usize,
    name: String,
    data_offset: usize,
}

impl ResourceSet {
    /// Parse a resource set.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a wrong magic number, an unsupported reader
    /// version, or offsets outside the data.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 12 {
            return Err(malformed_error!("Resource data too small"));
        }

        let mut parser = Parser::new(data);

        let magic = parser.read_le::<u32>()?;
        if magic != RESOURCE_MAGIC {
            return Err(malformed_error!("Invalid resource magic: 0x{:X}", magic));
        }

        let _header_version = parser.read_le::<u32>()?;
        let header_size = parser.read_le::<u32>()? as usize;
        let rr_header_offset = parser.pos() + header_size;

        let reader_type = parser.read_prefixed_string_utf8()?;
        let resource_set_type = parser.read_prefixed_string_utf8()?;
        parser.seek(rr_header_offset)?;

        let rr_version = parser.read_le::<u32>()?;
        if rr_version != RESOURCE_READER_VERSION {
            return Err(malformed_error!(
                "Unsupported resource reader version - {}",
                rr_version
            ));
        }

        let resource_count = parser.read_le::<u32>()? as usize;
        let type_count = parser.read_le::<u32>()? as usize;
        let mut type_names = Vec::with_capacity(type_count.min(parser.remaining()));
        for _ in 0..type_count {
            type_names.push(parser.read_prefixed_string_utf8()?);
        }

        let padding = (8 - parser.pos() % 8) % 8;
        parser.advance_by(padding)?;

        if resource_count.saturating_mul(8) > parser.remaining() {
            return Err(malformed_error!(
                "Resource count exceeds data - {}",
                resource_count
            ));
        }

        // Hashes are recomputed on write
        parser.advance_by(resource_count * 4)?;

        let mut name_positions = Vec::with_capacity(resource_count);
        for _ in 0..resource_count {
            name_positions.push(parser.read_le::<u32>()? as usize);
        }

        let data_section_offset = parser.read_le::<u32>()? as usize;
        let name_section_offset = parser.pos();
        if data_section_offset < name_section_offset || data_section_offset > data.len() {
            return Err(malformed_error!(
                "Invalid data section offset - {}",
                data_section_offset
            ));
        }

        let mut names = Vec::with_capacity(resource_count);
        for position in name_positions {
            parser.seek(name_section_offset + position)?;
            let name = parser.read_prefixed_string_utf16()?;
            let data_offset = parser.read_le::<u32>()? as usize;
            if data_section_offset + data_offset >= data.len() {
                return Err(malformed_error!(
                    "Resource '{}' data offset out of range - {}",
                    name,
                    data_offset
                ));
            }
            names.push(NameEntry {
                position,
                name,
                data_offset: data_section_offset + data_offset,
            });
        }
        names.sort_by_key(|entry| entry.position);

        let mut value_starts: Vec<usize> = names.iter().map(|entry| entry.data_offset).collect();
        value_starts.sort_unstable();
        value_starts.dedup();

        let mut entries = Vec::with_capacity(names.len());
        for entry in names {
            let end = value_starts
                .iter()
                .copied()
                .find(|&start| start > entry.data_offset)
                .unwrap_or(data.len());

            parser.seek(entry.data_offset)?;
            let type_code = parser.read_7bit_encoded_int()?;
            if parser.pos() > end {
                return Err(malformed_error!(
                    "Resource '{}' type code overlaps the next value",
                    entry.name
                ));
            }
            let value = parser.read_bytes(end - parser.pos())?;

            entries.push(ResourceEntry {
                name: entry.name,
                type_code,
                data: value.to_vec(),
            });
        }

        Ok(ResourceSet {
            reader_type,
            resource_set_type,
            type_names,
            entries,
        })
    }
}
