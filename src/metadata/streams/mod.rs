//! Metadata streams (ECMA-335 II.24.2).
//!
//! A metadata root lists its streams by name: the `#~` table stream and the `#Strings`,
//! `#US`, `#GUID` and `#Blob` heaps. Each heap has a borrowed read view for loading and
//! a deduplicating builder for saving.

mod blob;
mod guid;
mod strings;
mod tablesheader;
mod userstrings;

pub use blob::{Blob, BlobBuilder};
pub use guid::{Guid, GuidBuilder};
pub use strings::{Strings, StringsBuilder};
pub use tablesheader::TablesHeader;
pub use userstrings::{UserStrings, UserStringsBuilder};

use crate::{
    file::{io::read_le_at, writer::Writer},
    Result,
};

/// An entry of the metadata root's stream directory.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StreamHeader {
    /// Offset of the stream from the metadata root
    pub offset: u32,
    /// Size of the stream in bytes
    pub size: u32,
    /// Stream name, e.g. `#Strings`
    pub name: String,
}

impl StreamHeader {
    /// Read a stream header at `offset`, advancing past its padded name.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] on truncated data and
    /// [`crate::Error::Malformed`] for unterminated or overlong names.
    pub fn read(data: &[u8], offset: &mut usize) -> Result<StreamHeader> {
        let stream_offset = read_le_at::<u32>(data, offset)?;
        let size = read_le_at::<u32>(data, offset)?;

        let Some(name_data) = data.get(*offset..) else {
            return Err(out_of_bounds_error!());
        };
        let Some(name_len) = name_data.iter().take(32).position(|byte| *byte == 0) else {
            return Err(malformed_error!("Stream name at offset {} is not terminated", offset));
        };
        let name = String::from_utf8_lossy(&name_data[..name_len]).into_owned();
        *offset += (name_len + 1).next_multiple_of(4);

        Ok(StreamHeader {
            offset: stream_offset,
            size,
            name,
        })
    }

    /// Append this header with its name padded to four bytes.
    pub fn write(&self, writer: &mut Writer) {
        writer.write_le::<u32>(self.offset);
        writer.write_le::<u32>(self.size);
        writer.write_bytes(self.name.as_bytes());
        writer.write_le::<u8>(0);
        writer.align(4, 0);
    }

    /// Encoded size of this header.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        8 + (self.name.len() + 1).next_multiple_of(4)
    }
}

/// Read views of the heaps the table stream indexes.
pub struct Heaps<'a> {
    strings: Strings<'a>,
    blobs: Blob<'a>,
    guids: Guid<'a>,
}

impl<'a> Heaps<'a> {
    /// Wrap the three heaps. Missing heaps are passed as empty slices.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a heap fails its basic layout check.
    pub fn new(strings: &'a [u8], blobs: &'a [u8], guids: &'a [u8]) -> Result<Heaps<'a>> {
        Ok(Heaps {
            strings: Strings::from(strings)?,
            blobs: Blob::from(blobs)?,
            guids: Guid::from(guids)?,
        })
    }

    /// The `#Strings` entry at `index`.
    ///
    /// # Errors
    /// See [`Strings::get`].
    pub fn string(&self, index: u32) -> Result<&'a str> {
        self.strings.get(index as usize)
    }

    /// The `#Blob` entry at `index`.
    ///
    /// # Errors
    /// See [`Blob::get`].
    pub fn blob(&self, index: u32) -> Result<&'a [u8]> {
        self.blobs.get(index as usize)
    }

    /// The `#GUID` entry at `index`.
    ///
    /// # Errors
    /// See [`Guid::get`].
    pub fn guid(&self, index: u32) -> Result<[u8; 16]> {
        self.guids.get(index as usize)
    }
}

/// Builders for every heap of a metadata root being written.
#[derive(Debug, Default)]
pub struct HeapBuilder {
    /// `#Strings`
    pub strings: StringsBuilder,
    /// `#Blob`
    pub blobs: BlobBuilder,
    /// `#GUID`
    pub guids: GuidBuilder,
    /// `#US`
    pub user_strings: UserStringsBuilder,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_header_roundtrip() {
        let header = StreamHeader {
            offset: 0x6C,
            size: 0x1F4,
            name: "#Strings".to_string(),
        };
        let mut writer = Writer::new();
        header.write(&mut writer);
        assert_eq!(writer.pos(), header.encoded_len());
        assert_eq!(writer.pos(), 20);

        let mut offset = 0;
        assert_eq!(StreamHeader::read(writer.data(), &mut offset).unwrap(), header);
        assert_eq!(offset, 20);
    }

    #[test]
    fn stream_header_rejects_unterminated_name() {
        let mut data = vec![0, 0, 0, 0, 4, 0, 0, 0];
        data.extend_from_slice(&[b'#'; 40]);
        assert!(StreamHeader::read(&data, &mut 0).is_err());
    }
}
