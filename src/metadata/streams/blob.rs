//! The `#Blob` heap: length-prefixed byte strings holding signatures, attribute values
//! and public keys.

use std::collections::HashMap;

use crate::{file::parser::Parser, file::writer::Writer, Result};

/// Read view of a `#Blob` heap.
pub struct Blob<'a> {
    data: &'a [u8],
}

impl<'a> Blob<'a> {
    /// Wrap heap data. An empty slice is accepted and only resolves index 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a non-empty heap does not start with 0.
    pub fn from(data: &'a [u8]) -> Result<Blob<'a>> {
        if !data.is_empty() && data[0] != 0 {
            return Err(malformed_error!("Invalid memory for #Blob heap"));
        }

        Ok(Blob { data })
    }

    /// The blob starting at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the blob runs past the heap end.
    pub fn get(&self, index: usize) -> Result<&'a [u8]> {
        if index == 0 {
            return Ok(&[]);
        }
        if index >= self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let mut parser = Parser::new(&self.data[index..]);
        let len = parser.read_compressed_uint()? as usize;
        parser.read_bytes(len)
    }
}

/// Builder of a `#Blob` heap with one entry per distinct blob.
#[derive(Debug)]
pub struct BlobBuilder {
    data: Writer,
    offsets: HashMap<Vec<u8>, u32>,
}

impl Default for BlobBuilder {
    fn default() -> Self {
        let mut data = Writer::new();
        data.write_le::<u8>(0);
        BlobBuilder {
            data,
            offsets: HashMap::new(),
        }
    }
}

impl BlobBuilder {
    /// Heap index of `value`, adding it on first use.
    #[allow(clippy::cast_possible_truncation)]
    pub fn intern(&mut self, value: &[u8]) -> u32 {
        if value.is_empty() {
            return 0;
        }
        if let Some(offset) = self.offsets.get(value) {
            return *offset;
        }

        let offset = self.data.pos() as u32;
        // Blobs are bounded by the 29-bit compressed length long before this can fail
        if self.data.write_compressed_uint(value.len() as u32).is_err() {
            return 0;
        }
        self.data.write_bytes(value);
        self.offsets.insert(value.to_vec(), offset);
        offset
    }

    /// Current heap size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.pos()
    }

    /// Heap bytes padded to four.
    #[must_use]
    pub fn finish(&self) -> Vec<u8> {
        let mut data = self.data.data().to_vec();
        data.resize(data.len().next_multiple_of(4), 0);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        let data = [0x00, 0x03, 0x20, 0x00, 0x01, 0x02, 0x08, 0x08];
        let blob = Blob::from(&data).unwrap();
        assert_eq!(blob.get(0).unwrap(), &[] as &[u8]);
        assert_eq!(blob.get(1).unwrap(), &[0x20, 0x00, 0x01]);
        assert_eq!(blob.get(5).unwrap(), &[0x08, 0x08]);
        assert!(blob.get(6).is_err());
        assert!(blob.get(8).is_err());
    }

    #[test]
    fn builder_deduplicates() {
        let mut builder = BlobBuilder::default();
        assert_eq!(builder.intern(&[]), 0);
        assert_eq!(builder.intern(&[0x06, 0x08]), 1);
        assert_eq!(builder.intern(&[0x07, 0x01, 0x08]), 4);
        assert_eq!(builder.intern(&[0x06, 0x08]), 1);

        let long = vec![0xAA; 200];
        let offset = builder.intern(&long) as usize;
        let data = builder.finish();
        let blob = Blob::from(&data).unwrap();
        assert_eq!(blob.get(offset).unwrap(), long.as_slice());
    }
}
