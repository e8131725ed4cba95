//! The `#US` heap: length-prefixed UTF-16 string literals loaded by `ldstr`.

use std::collections::HashMap;

use widestring::U16Str;

use crate::{file::parser::Parser, file::writer::Writer, Result};

/// Read view of a `#US` heap.
pub struct UserStrings<'a> {
    data: &'a [u8],
}

impl<'a> UserStrings<'a> {
    /// Wrap heap data.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a non-empty heap does not start with 0.
    pub fn from(data: &'a [u8]) -> Result<UserStrings<'a>> {
        if !data.is_empty() && data[0] != 0 {
            return Err(malformed_error!("Invalid memory for #US heap"));
        }

        Ok(UserStrings { data })
    }

    /// The string literal at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] past the heap end and
    /// [`crate::Error::Malformed`] for an entry with an even length or invalid UTF-16.
    pub fn get(&self, offset: usize) -> Result<String> {
        if offset == 0 || offset >= self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let mut parser = Parser::new(&self.data[offset..]);
        let len = parser.read_compressed_uint()? as usize;
        if len % 2 != 1 {
            return Err(malformed_error!("Invalid string data length at offset - {}", offset));
        }

        let bytes = parser.read_bytes(len - 1)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        U16Str::from_slice(&units)
            .to_string()
            .map_err(|_| malformed_error!("Invalid string from offset - {}", offset))
    }
}

/// True if a UTF-16 unit needs the trailing "special handling" byte (ECMA-335 II.24.2.4).
fn needs_special_handling(unit: u16) -> bool {
    unit >= 0x80
        || (0x01..=0x08).contains(&unit)
        || (0x0E..=0x1F).contains(&unit)
        || unit == 0x27
        || unit == 0x2D
        || unit == 0x7F
}

/// Builder of a `#US` heap with one entry per distinct literal.
#[derive(Debug)]
pub struct UserStringsBuilder {
    data: Writer,
    offsets: HashMap<String, u32>,
}

impl Default for UserStringsBuilder {
    fn default() -> Self {
        let mut data = Writer::new();
        data.write_le::<u8>(0);
        UserStringsBuilder {
            data,
            offsets: HashMap::new(),
        }
    }
}

impl UserStringsBuilder {
    /// Heap offset of `value`, adding it on first use.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for literals beyond the compressed length range.
    #[allow(clippy::cast_possible_truncation)]
    pub fn intern(&mut self, value: &str) -> Result<u32> {
        if let Some(offset) = self.offsets.get(value) {
            return Ok(*offset);
        }

        let offset = self.data.pos() as u32;
        let units: Vec<u16> = value.encode_utf16().collect();
        self.data.write_compressed_uint(units.len() as u32 * 2 + 1)?;
        for unit in &units {
            self.data.write_le::<u16>(*unit);
        }
        self.data
            .write_le::<u8>(u8::from(units.iter().any(|unit| needs_special_handling(*unit))));
        self.offsets.insert(value.to_string(), offset);
        Ok(offset)
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
