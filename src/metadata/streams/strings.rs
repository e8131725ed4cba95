//! The `#Strings` heap: NUL-terminated UTF-8 identifiers.

use std::{collections::HashMap, ffi::CStr};

use crate::Result;

/// Read view of a `#Strings` heap.
pub struct Strings<'a> {
    data: &'a [u8],
}

impl<'a> Strings<'a> {
    /// Wrap heap data. An empty slice is accepted and only resolves index 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a non-empty heap does not start with NUL.
    pub fn from(data: &'a [u8]) -> Result<Strings<'a>> {
        if !data.is_empty() && data[0] != 0 {
            return Err(malformed_error!("Provided #Strings heap does not start with NUL"));
        }

        Ok(Strings { data })
    }

    /// The string starting at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] past the heap end and
    /// [`crate::Error::Malformed`] for unterminated or non-UTF-8 strings.
    pub fn get(&self, index: usize) -> Result<&'a str> {
        if index == 0 {
            return Ok("");
        }
        if index >= self.data.len() {
            return Err(out_of_bounds_error!());
        }

        match CStr::from_bytes_until_nul(&self.data[index..]) {
            Ok(result) => result
                .to_str()
                .map_err(|_| malformed_error!("Invalid string at index - {}", index)),
            Err(_) => Err(malformed_error!("Unterminated string at index - {}", index)),
        }
    }
}

/// Builder of a `#Strings` heap with one entry per distinct string.
#[derive(Debug)]
pub struct StringsBuilder {
    data: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl Default for StringsBuilder {
    fn default() -> Self {
        StringsBuilder {
            data: vec![0],
            offsets: HashMap::new(),
        }
    }
}

impl StringsBuilder {
    /// Heap index of `value`, adding it on first use.
    #[allow(clippy::cast_possible_truncation)]
    pub fn intern(&mut self, value: &str) -> u32 {
        if value.is_empty() {
            return 0;
        }
        if let Some(offset) = self.offsets.get(value) {
            return *offset;
        }

        let offset = self.data.len() as u32;
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        self.offsets.insert(value.to_string(), offset);
        offset
    }

    /// Current heap size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Heap bytes padded to four.
    #[must_use]
    pub fn finish(&self) -> Vec<u8> {
        let mut data = self.data.clone();
        data.resize(data.len().next_multiple_of(4), 0);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let data = [
            0x00,
            b'<', b'M', b'o', b'd', b'u', b'l', b'e', b'>', 0x00,
            b'S', b'y', b's', b't', b'e', b'm', 0x00,
        ];

        let strings = Strings::from(&data).unwrap();
        assert_eq!(strings.get(0).unwrap(), "");
        assert_eq!(strings.get(1).unwrap(), "<Module>");
        assert_eq!(strings.get(10).unwrap(), "System");
        assert_eq!(strings.get(13).unwrap(), "tem");
        assert!(strings.get(17).is_err());
    }

    #[test]
    fn invalid() {
        assert!(Strings::from(&[0x41, 0x00]).is_err());
        let strings = Strings::from(&[0x00, 0x41]).unwrap();
        assert!(strings.get(1).is_err());
    }

    #[test]
    fn builder_deduplicates() {
        let mut builder = StringsBuilder::default();
        assert_eq!(builder.intern(""), 0);
        assert_eq!(builder.intern("Program"), 1);
        assert_eq!(builder.intern("Main"), 9);
        assert_eq!(builder.intern("Program"), 1);

        let data = builder.finish();
        assert_eq!(data.len() % 4, 0);
        let strings = Strings::from(&data).unwrap();
        assert_eq!(strings.get(9).unwrap(), "Main");
    }
}
